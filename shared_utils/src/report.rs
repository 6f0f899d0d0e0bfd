//! Report Module
//!
//! End-of-run summary shared by the batch tools. A summary is printed for
//! every run, including cancelled and aborted ones, and reflects only the
//! work that actually committed.

use crate::progress::format_duration;
use console::style;
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

/// Failed paths listed in the human report; the rest are counted.
pub const FAILED_SAMPLE_LIMIT: usize = 10;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub failed: Vec<PathBuf>,
    /// Images processed by tasks of the pooled global batch.
    pub global_processed: usize,
    pub tasks_dispatched: usize,
    pub tasks_total: usize,
    pub cancelled: bool,
    /// Structural failure that ended the run early, if any.
    pub aborted: Option<String>,
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl RunSummary {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.processed + self.failed.len();
        if total == 0 {
            100.0
        } else {
            (self.processed as f64 / total as f64) * 100.0
        }
    }

    /// At most `limit` failed paths, in the order they were recorded.
    pub fn failed_sample(&self, limit: usize) -> &[PathBuf] {
        &self.failed[..self.failed.len().min(limit)]
    }

    pub fn status_label(&self) -> &'static str {
        if self.aborted.is_some() {
            "ABORTED"
        } else if self.cancelled {
            "CANCELLED"
        } else if self.failed.is_empty() {
            "COMPLETE"
        } else {
            "COMPLETE WITH ERRORS"
        }
    }
}

pub fn render_summary_report(summary: &RunSummary, operation_name: &str) -> String {
    let mut out = String::new();
    let line = "━".repeat(60);

    let status = match summary.status_label() {
        "COMPLETE" => style(summary.status_label()).green().bold(),
        "COMPLETE WITH ERRORS" | "CANCELLED" => style(summary.status_label()).yellow().bold(),
        _ => style(summary.status_label()).red().bold(),
    };
    out.push_str(&format!("\n📊 {} Summary Report [{}]\n", operation_name, status));
    out.push_str(&line);
    out.push('\n');
    out.push_str(&format!("  ✅ Processed:        {:>10}\n", summary.processed));
    out.push_str(&format!("     from global pool: {:>9}\n", summary.global_processed));
    out.push_str(&format!("  ❌ Failed:           {:>10}\n", summary.failed_count()));
    out.push_str(&format!(
        "  📦 Tasks:            {:>10}\n",
        format!("{}/{}", summary.tasks_dispatched, summary.tasks_total)
    ));
    out.push_str(&format!("  📈 Success Rate:     {:>9.1}%\n", summary.success_rate()));
    out.push_str(&format!("  ⏱️  Total Time:       {:>10}\n", format_duration(summary.elapsed)));
    if let Some(reason) = &summary.aborted {
        out.push_str(&format!("  🚨 Aborted:          {}\n", reason));
    }
    out.push_str(&line);
    out.push('\n');

    if !summary.failed.is_empty() {
        out.push_str("❌ Failed files:\n");
        for path in summary.failed_sample(FAILED_SAMPLE_LIMIT) {
            out.push_str(&format!("   {}\n", path.display()));
        }
        let hidden = summary.failed.len().saturating_sub(FAILED_SAMPLE_LIMIT);
        if hidden > 0 {
            out.push_str(&format!("   … and {} more\n", hidden));
        }
    }

    out
}

pub fn print_summary_report(summary: &RunSummary, operation_name: &str) {
    println!("{}", render_summary_report(summary, operation_name));
}

pub fn print_summary_json(summary: &RunSummary) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}
