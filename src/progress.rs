//! Progress reporting for ingest runs
//!
//! Provides a file-level progress bar using indicatif and the console
//! header and summary printed around a run.

use crate::ingest::RunReport;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Snapshot of run progress
#[derive(Debug, Clone, Default)]
pub struct IngestProgress {
    /// Files finished (any outcome)
    pub files_done: u64,

    /// Files in this run
    pub files_total: u64,

    /// Files failed so far
    pub files_failed: u64,

    /// Rows appended so far
    pub rows_written: u64,

    /// Rows rejected so far
    pub rows_rejected: u64,

    /// Shard bytes written so far
    pub bytes_written: u64,

    /// Elapsed time
    pub elapsed: Duration,
}

impl IngestProgress {
    /// Calculate rows per second rate
    pub fn rows_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.rows_written as f64 / secs
        } else {
            0.0
        }
    }

    /// Completed share of files, 0-100
    pub fn percent(&self) -> u64 {
        if self.files_total == 0 {
            100
        } else {
            self.files_done * 100 / self.files_total
        }
    }
}

/// Progress bar over the input files of a run
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);

        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} files ({percent}%) ETA {eta} {msg}",
                )
                .expect("Invalid progress template")
                .progress_chars("=> ")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Set the number of files in the run
    pub fn set_total(&self, files: u64) {
        self.bar.set_length(files);
    }

    /// Update the progress display
    pub fn update(&self, progress: &IngestProgress) {
        self.bar.set_length(progress.files_total);
        self.bar.set_position(progress.files_done);

        let mut msg = format!(
            "Rows: {} | Rejected: {} | Written: {} | Rate: {:.0} rows/s",
            format_number(progress.rows_written),
            format_number(progress.rows_rejected),
            format_size(progress.bytes_written, BINARY),
            progress.rows_per_second(),
        );
        if progress.files_failed > 0 {
            msg.push_str(&format!(" | Failed: {}", progress.files_failed));
        }

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of the run
pub fn print_summary(report: &RunReport) {
    let duration_secs = report.duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        report.rows_written as f64 / duration_secs
    } else {
        0.0
    };

    let title = if report.cancelled {
        style("Ingest Cancelled").yellow().bold()
    } else if report.is_success() {
        style("Ingest Complete").green().bold()
    } else {
        style("Ingest Finished With Errors").red().bold()
    };

    println!();
    println!("{}", title);
    println!("{}", style("─".repeat(50)).dim());
    println!(
        "  {} {} of {} ({} failed, {} cancelled)",
        style("Files:").bold(),
        format_number(report.files_succeeded as u64),
        format_number(report.files_total as u64),
        report.files_failed,
        report.files_cancelled,
    );
    println!(
        "  {} {}",
        style("Rows written:").bold(),
        format_number(report.rows_written)
    );
    if report.rows_rejected > 0 {
        let reasons = report
            .rejections
            .iter()
            .map(|(reason, count)| format!("{} {}", format_number(*count), reason))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  {} {} ({})",
            style("Rows rejected:").yellow().bold(),
            format_number(report.rows_rejected),
            reasons
        );
    }
    println!(
        "  {} {} ({})",
        style("Shards:").bold(),
        format_number(report.shards_touched as u64),
        format_size(report.bytes_written, BINARY)
    );
    println!(
        "  {} {:.1}s ({:.0} rows/sec)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    if !report.skipped.is_empty() {
        println!(
            "  {} {} (already ingested)",
            style("Skipped:").bold(),
            report.skipped.len()
        );
    }
    for file in &report.needs_attention {
        println!(
            "  {} {} (previous attempt {}, {} rows written)",
            style("Needs attention:").yellow().bold(),
            file.path.display(),
            file.status,
            format_number(file.rows_written)
        );
    }
    for file in &report.failed {
        println!(
            "  {} {}: {}",
            style("Failed:").red().bold(),
            file.path.display(),
            file.error
        );
    }
    println!("  {} {}", style("Catalog:").bold(), report.output_root.display());
    println!();
}

/// Print a header at the start of the run
pub fn print_header(inputs: usize, workers: usize, output: &str, indexer: &str, depth: u8) {
    println!();
    println!(
        "{} {}",
        style("skyshard").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {} files", style("Inputs:").bold(), format_number(inputs as u64));
    println!("  {} {}", style("Workers:").bold(), workers);
    println!("  {} {} (depth {})", style("Index:").bold(), indexer, depth);
    println!("  {} {}", style("Output:").bold(), output);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }

    #[test]
    fn test_progress_rates() {
        let progress = IngestProgress {
            files_done: 25,
            files_total: 100,
            rows_written: 50_000,
            elapsed: Duration::from_secs(10),
            ..IngestProgress::default()
        };

        assert!((progress.rows_per_second() - 5000.0).abs() < 0.1);
        assert_eq!(progress.percent(), 25);
        assert_eq!(IngestProgress::default().percent(), 100);
    }
}
