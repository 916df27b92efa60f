use anyhow::{Context, Result};
use colored::Colorize;
use std::io::{self, BufRead, Write};

pub fn header(title: &str) {
    println!("{}", title.bold());
}

pub fn success(message: &str) {
    println!("  {} {}", "✓".green(), message);
}

pub fn warn(message: &str) {
    println!("  {} {}", "⚠".yellow(), message);
}

pub fn fail(message: &str) {
    println!("  {} {}", "✗".red(), message);
}

pub fn skip(message: &str) {
    println!("  {} {}", "⊘".yellow(), message.dimmed());
}

pub fn info(message: &str) {
    println!("  {}", message);
}

pub fn dry_run_notice() {
    println!("{}", "(dry run - no changes made)".dimmed());
}

/// Asks a yes/no question on stdin. Anything but `y`/`yes` is a no.
pub fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N]: ", prompt);
    io::stdout().flush().context("Failed to flush stdout")?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read answer")?;

    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
