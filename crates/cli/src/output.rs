//! CLI output formatting utilities.
//!
//! Status lines go to stderr so that stdout carries only data: digests, blob
//! contents and the command's own output.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
}

/// Leading characters of a hash, enough to tell blobs apart in status lines.
pub fn truncate_hash(hash: &str) -> &str {
  hash.get(..12).unwrap_or(hash)
}

pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 3] = ["KB", "MB", "GB"];

  if bytes < 1024 {
    return format!("{bytes} B");
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit + 1 < UNITS.len() {
    value /= 1024.0;
    unit += 1;
  }
  format!("{value:.1} {}", UNITS[unit])
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

fn status(symbol: &str, message: &str, paint: fn(&str) -> String) {
  let symbol = symbol.if_supports_color(Stream::Stderr, |s| paint(s));
  eprintln!("{symbol} {message}");
}

pub fn print_success(message: &str) {
  status(symbols::SUCCESS, message, |s| s.green().to_string());
}

pub fn print_error(message: &str) {
  status(symbols::ERROR, message, |s| s.red().bold().to_string());
}

pub fn print_warning(message: &str) {
  status(symbols::WARNING, message, |s| s.yellow().to_string());
}

/// An indented `label: value` line under a status message.
pub fn print_stat(label: &str, value: &str) {
  let label = label.if_supports_color(Stream::Stderr, |s| s.dimmed());
  eprintln!("  {label}: {value}");
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}
