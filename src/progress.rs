use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;

/// Progress tracking and reporting functionality.
///
/// Provides the observer interface pushed to by running jobs, a wrapper that
/// keeps a job's percentage non-decreasing, and the batch-level tracker that
/// logs completion rates, time estimates and failures.

/// One-way observer of a percentage in `[0, 100]`.
///
/// Called synchronously from the job's execution context; implementations
/// must return quickly.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, percent: f64);
}

impl<F> ProgressSink for F
where
    F: Fn(f64) + Send + Sync,
{
    fn on_progress(&self, percent: f64) {
        self(percent)
    }
}

/// Forwards byte counts to an optional sink as a non-decreasing percentage.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use ytmark::progress::{MonotonicProgress, ProgressSink};
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = {
///     let seen = Arc::clone(&seen);
///     move |p: f64| seen.lock().unwrap().push(p)
/// };
/// let progress = MonotonicProgress::new(Some(Arc::new(sink) as Arc<dyn ProgressSink>));
/// progress.report_bytes(50, Some(100));
/// progress.report_bytes(10, Some(100));
/// progress.finish();
/// assert_eq!(*seen.lock().unwrap(), vec![50.0, 100.0]);
/// ```
pub struct MonotonicProgress {
    sink: Option<Arc<dyn ProgressSink>>,
    last: Mutex<f64>,
}

impl MonotonicProgress {
    pub fn new(sink: Option<Arc<dyn ProgressSink>>) -> Self {
        Self {
            sink,
            last: Mutex::new(0.0),
        }
    }

    /// Reports `downloaded / total * 100`. Unknown or zero totals are ignored.
    pub fn report_bytes(&self, downloaded: u64, total: Option<u64>) {
        match total {
            Some(total) if total > 0 => {
                self.report(downloaded as f64 / total as f64 * 100.0);
            }
            _ => {}
        }
    }

    /// Pushes `percent` if it is above the last pushed value.
    pub fn report(&self, percent: f64) {
        let percent = percent.clamp(0.0, 100.0);
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if percent <= *last {
            return;
        }
        *last = percent;
        drop(last);

        if let Some(sink) = &self.sink {
            sink.on_progress(percent);
        }
    }

    /// Forces the final 100% signal, even if it was already sent or byte
    /// totals were never known.
    pub fn finish(&self) {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = 100.0;
        if let Some(sink) = &self.sink {
            sink.on_progress(100.0);
        }
    }

    pub fn last(&self) -> f64 {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Tracks and reports progress for a batch of pipeline jobs.
///
/// Maintains statistics about the batch including:
/// - Number of selected entries
/// - Processed, successful and failed entries
/// - Time estimates
///
/// # Examples
///
/// ```
/// use ytmark::BatchProgress;
///
/// let mut progress = BatchProgress::new(4);
/// progress.update(true);
/// progress.update(false);
/// assert_eq!(progress.completed, 1);
/// assert_eq!(progress.percent(), 25.0);
/// ```
pub struct BatchProgress {
    pub selected: usize,
    pub processed: usize,
    /// Entries whose pipeline succeeded.
    pub completed: usize,
    pub errors: usize,
    pub start_time: Instant,
    failed_urls: Vec<(String, String)>, // (URL, error message)
}

impl BatchProgress {
    pub fn new(selected: usize) -> Self {
        Self {
            selected,
            processed: 0,
            completed: 0,
            errors: 0,
            start_time: Instant::now(),
            failed_urls: Vec::new(),
        }
    }

    pub fn update(&mut self, success: bool) {
        self.processed += 1;
        if success {
            self.completed += 1;
        } else {
            self.errors += 1;
        }
        self.log_progress();
    }

    /// `completed / selected * 100`; an empty batch counts as done.
    pub fn percent(&self) -> f64 {
        if self.selected == 0 {
            return 100.0;
        }
        self.completed as f64 / self.selected as f64 * 100.0
    }

    pub fn log_progress(&self) {
        let elapsed = self.start_time.elapsed();
        let avg_time_per_entry = if self.processed > 0 {
            elapsed.div_f64(self.processed as f64)
        } else {
            Duration::from_secs(0)
        };

        let remaining = self.selected.saturating_sub(self.processed);
        let est_remaining_time = avg_time_per_entry.mul_f64(remaining as f64);

        info!(
            processed = self.processed,
            selected = self.selected,
            successful = self.completed,
            failed = self.errors,
            elapsed_secs = elapsed.as_secs_f64(),
            remaining_secs = est_remaining_time.as_secs_f64(),
            "Progress: {}/{} entries processed ({:.1}% complete)",
            self.processed,
            self.selected,
            self.percent()
        );
    }

    pub fn record_failure(&mut self, url: &str, error: String) {
        self.failed_urls.push((url.to_string(), error));
    }

    pub fn failures(&self) -> &[(String, String)] {
        &self.failed_urls
    }

    /// Exports failed download information to a file
    ///
    /// Creates or appends to `path` with details of each failed entry
    pub fn export_failures(&self, path: &Path) -> std::io::Result<()> {
        if self.failed_urls.is_empty() {
            return Ok(());
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let mut writer = std::io::BufWriter::new(file);

        writeln!(
            writer,
            "\n=== Failed Downloads Report {} ===",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;

        for (url, error) in &self.failed_urls {
            writeln!(writer, "URL: {}", url)?;
            writeln!(writer, "Error: {}", error)?;
            writeln!(writer, "---")?;
        }

        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<f64>>>, Arc<dyn ProgressSink>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink: Arc<dyn ProgressSink> = {
            let seen = Arc::clone(&seen);
            Arc::new(move |p: f64| seen.lock().unwrap().push(p))
        };
        (seen, sink)
    }

    #[test]
    fn monotonic_progress_never_decreases() {
        let (seen, sink) = recorder();
        let progress = MonotonicProgress::new(Some(sink));

        progress.report_bytes(25, Some(100));
        progress.report_bytes(100, Some(100));
        // second stream restarts from zero
        progress.report_bytes(5, Some(10));
        progress.report_bytes(1, None);
        progress.report_bytes(1, Some(0));
        progress.finish();

        assert_eq!(*seen.lock().unwrap(), vec![25.0, 100.0, 100.0]);
    }

    #[test]
    fn finish_without_totals() {
        let (seen, sink) = recorder();
        let progress = MonotonicProgress::new(Some(sink));
        progress.report_bytes(4096, None);
        progress.finish();
        assert_eq!(*seen.lock().unwrap(), vec![100.0]);
        assert_eq!(progress.last(), 100.0);
    }

    #[test]
    fn batch_progress_export() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("failed.txt");

        let mut progress = BatchProgress::new(3);
        progress.update(true);
        progress.record_failure("https://youtu.be/bad", "[DownloadFailed] 403".into());
        progress.update(false);
        progress.update(true);

        assert_eq!(progress.completed, 2);
        assert_eq!(progress.errors, 1);
        progress.export_failures(&report).unwrap();

        let content = std::fs::read_to_string(&report).unwrap();
        assert!(content.contains("URL: https://youtu.be/bad"));
        assert!(content.contains("Error: [DownloadFailed] 403"));
    }

    #[test]
    fn no_report_without_failures() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("failed.txt");
        BatchProgress::new(1).export_failures(&report).unwrap();
        assert!(!report.exists());
    }
}
