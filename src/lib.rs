#[macro_use]
extern crate lazy_static;

pub mod background;
pub mod config;
pub mod constants;
pub mod histogram;
pub mod pipeline;
pub mod utils;

// All angles handed between modules are in degrees unless the name says otherwise
pub type Degrees = f64;
pub type Radians = f64;

pub type Count = u64;
pub type JulianDay = f64;
