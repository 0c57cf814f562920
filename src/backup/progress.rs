use derive_more::Display;

/// Percentage step between two progress reports.
pub static PROGRESS_STEP: u8 = 10;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[display("{percent}% ({files_processed}/{files_total} files)")]
pub struct Progress {
    pub percent: u8,
    /// Files handled so far, written or skipped.
    pub files_processed: usize,
    pub files_written: usize,
    pub files_total: usize,
}

/// Turns a running file count into progress reports, one per
/// [`PROGRESS_STEP`] percent crossed.
#[derive(Debug)]
pub struct ProgressTracker {
    files_total: usize,
    files_processed: usize,
    files_written: usize,
    last_step: u8,
}

impl ProgressTracker {
    pub fn new(files_total: usize) -> Self {
        Self {
            files_total,
            files_processed: 0,
            files_written: 0,
            last_step: 0,
        }
    }

    pub fn file_written(&mut self) -> Option<Progress> {
        self.files_written += 1;
        self.advance()
    }

    pub fn file_skipped(&mut self) -> Option<Progress> {
        self.advance()
    }

    fn advance(&mut self) -> Option<Progress> {
        self.files_processed += 1;
        if self.files_total == 0 {
            return None;
        }

        let percent = (self.files_processed.min(self.files_total) * 100 / self.files_total) as u8;
        let step = percent / PROGRESS_STEP;
        if step <= self.last_step {
            return None;
        }

        self.last_step = step;
        Some(Progress {
            percent,
            files_processed: self.files_processed,
            files_written: self.files_written,
            files_total: self.files_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hundred_files_report_every_ten_percent() {
        let mut tracker = ProgressTracker::new(100);
        let reports: Vec<_> = (0..100).filter_map(|_| tracker.file_written()).collect();

        let percents: Vec<_> = reports.iter().map(|p| p.percent).collect();
        assert_eq!(percents, vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
        assert_eq!(reports.last().unwrap().files_written, 100);
    }

    #[test]
    fn test_reports_are_bounded_and_monotonic() {
        for total in [1, 3, 7, 33, 99, 101, 1000, 4321] {
            let mut tracker = ProgressTracker::new(total);
            let reports: Vec<_> = (0..total).filter_map(|_| tracker.file_written()).collect();

            assert!(reports.len() <= 11, "{total} files gave {} reports", reports.len());
            assert!(reports.windows(2).all(|w| w[0].percent < w[1].percent));
            assert_eq!(reports.last().unwrap().percent, 100);
        }
    }

    #[test]
    fn test_few_files_jump_several_steps() {
        let mut tracker = ProgressTracker::new(3);
        let percents: Vec<_> = (0..3)
            .filter_map(|_| tracker.file_written())
            .map(|p| p.percent)
            .collect();
        assert_eq!(percents, vec![33, 66, 100]);
    }

    #[test]
    fn test_skipped_files_count_towards_progress() {
        let mut tracker = ProgressTracker::new(2);
        assert_eq!(
            tracker.file_skipped(),
            Some(Progress {
                percent: 50,
                files_processed: 1,
                files_written: 0,
                files_total: 2,
            })
        );
        let last = tracker.file_written().unwrap();
        assert_eq!(last.percent, 100);
        assert_eq!(last.files_written, 1);
        assert_eq!(last.to_string(), "100% (2/2 files)");
    }

    #[test]
    fn test_zero_total_never_reports() {
        let mut tracker = ProgressTracker::new(0);
        assert_eq!(tracker.file_written(), None);
    }
}
