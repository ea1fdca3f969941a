//! Output formatting utilities for the CLI
//!
//! Colored status lines go to stderr so stdout carries only the agent's
//! replies.

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

/// Print an agent reply to stdout
pub fn print_response(content: &str) {
    println!("{}", content);
}

/// Print a success message (green checkmark)
pub fn print_success(msg: &str) {
    print_status(Color::Green, "✓ ", msg);
}

/// Print an error message (red X)
pub fn print_error(msg: &str) {
    print_status(Color::Red, "✗ ", msg);
}

/// Print a warning message (yellow)
pub fn print_warning(msg: &str) {
    print_status(Color::Yellow, "⚠ ", msg);
}

/// Print an info message (cyan)
pub fn print_info(msg: &str) {
    print_status(Color::Cyan, "ℹ ", msg);
}

fn print_status(color: Color, marker: &str, msg: &str) {
    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(color),
        Print(marker),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
