pub mod coordinates;
pub mod io;
pub mod loader;
pub mod time;

use indicatif::{ProgressBar, ProgressStyle};
use num_format::{Locale, ToFormattedString};

use crate::constants::PROGRESS_INTERVAL;

/// A spinner for record loops of unknown length. Call [`tick_progress`] once per record.
pub fn record_spinner(label: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{elapsed_precise}] {prefix} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_prefix(label.to_string());
    spinner
}

/// Updates `spinner` every `PROGRESS_INTERVAL` records.
pub fn tick_progress(spinner: &ProgressBar, records: u64) {
    if records % PROGRESS_INTERVAL == 0 {
        spinner.set_message(format!(
            "{} records processed",
            records.to_formatted_string(&Locale::en)
        ));
        spinner.tick();
    }
}
