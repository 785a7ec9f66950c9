// UI module for consistent terminal output with spinners and styling
//
// Every line the CLI prints goes through here; library code only logs.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use console::{Term, style};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Spinner style similar to uv/pnpm
const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Check if stderr is a TTY (for interactive output)
fn is_tty() -> bool {
    Term::stderr().is_term()
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Create a styled spinner for long-running network work
pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if !is_tty() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    if let Ok(spinner_style) = ProgressStyle::default_spinner()
        .tick_chars(SPINNER_CHARS)
        .template("{spinner:.cyan} {msg}")
    {
        pb.set_style(spinner_style);
    }
    pb.set_message(message.to_string());

    if is_tty() {
        pb.enable_steady_tick(Duration::from_millis(80));
    }

    pb
}

/// Finish a spinner with success
pub fn finish_spinner_success(pb: &ProgressBar, message: &str) {
    let msg = format!("{} {}", style("✓").green(), message);
    if is_tty() {
        pb.set_style(plain_style());
        pb.finish_with_message(msg);
    } else {
        pb.finish_and_clear();
        println!("{}", msg);
    }
}

/// Finish a spinner with error
pub fn finish_spinner_error(pb: &ProgressBar, message: &str) {
    let msg = format!("{} {}", style("✗").red(), message);
    if is_tty() {
        pb.set_style(plain_style());
        pb.finish_with_message(msg);
    } else {
        pb.finish_and_clear();
        eprintln!("{}", msg);
    }
}

/// Print a success message with checkmark
pub fn success(message: &str) {
    println!("{} {}", style("✓").green(), message);
}

/// Print an info/action message with arrow
pub fn action(message: &str) {
    println!("{} {}", style("→").cyan(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    eprintln!("{} {}", style("⚠").yellow(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red(), message);
}

/// Print a header/section message
pub fn header(message: &str) {
    println!("{}", style(message).bold());
}

/// Print a dimmed/secondary message
pub fn dim(message: &str) {
    println!("{}", style(message).dim());
}

/// Print a status message (for dry-run, etc.)
pub fn status(prefix: &str, message: &str) {
    println!("{} {}", style(prefix).cyan().bold(), message);
}

/// Print machine-readable output verbatim
pub fn raw(text: &str) {
    println!("{}", text);
}
