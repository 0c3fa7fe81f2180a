// Progress bars shared by the training loop and evaluation.

use indicatif::{ProgressBar, ProgressStyle};

pub fn bar(len: usize, unit: &str) -> ProgressBar {
    let style = ProgressStyle::with_template(&format!(
        "[{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {unit} {{msg}}"
    ))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-");

    let bar = ProgressBar::new(len as u64);
    bar.set_style(style);
    bar
}
