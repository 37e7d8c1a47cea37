//! The diagnostics visitor from spec.md §4.F: a bottom-up walk over the
//! tree reporting, per page, how many bucket slots are populated and how
//! many entries its local map (or hashing cache) currently holds. Used
//! for diagnostics only -- `DataPage::report` never mutates a page, and
//! no code path in `page::data_page` depends on a `Reporter`'s output.
//!
//! Grounded on the teacher's `check_integrity` recursive validators
//! (`btree/page/leaf_page.rs`, `btree/page/internal_page.rs`): same shape
//! of "recurse into every child, assert/record something about this page
//! along the way," generalized from an assertion-only walk to a
//! caller-supplied visitor.

/// Implemented by callers of `page::data_page::report` to collect
/// per-page statistics during the recursive walk (spec.md §4.F).
pub trait Reporter {
    /// Called once per page visited, after all of that page's children
    /// have already been reported (bottom-up).
    ///
    /// - `level`: the page's `TreeLevel` (root is 0).
    /// - `buckets_used`: count of non-null entries in `Buckets[0..16]`.
    /// - `entries_in_map`: live entry count, taken from the `HashingMap`
    ///   view when all buckets are full, otherwise from the
    ///   `NibbleBasedMap` view (spec.md §4.D `Report`).
    fn report_data_usage(&mut self, level: u8, buckets_used: usize, entries_in_map: usize);
}

/// A `Reporter` that tallies total pages, total buckets in use, and total
/// live entries across the whole walk, plus the deepest level visited.
/// The natural "just tell me the aggregate numbers" reporter, the way a
/// caller of `check_integrity` usually just wants a boolean back.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SummaryReporter {
    pub pages_visited: usize,
    pub total_buckets_used: usize,
    pub total_entries: usize,
    pub max_level: u8,
}

impl Reporter for SummaryReporter {
    fn report_data_usage(&mut self, level: u8, buckets_used: usize, entries_in_map: usize) {
        self.pages_visited += 1;
        self.total_buckets_used += buckets_used;
        self.total_entries += entries_in_map;
        self.max_level = self.max_level.max(level);
    }
}

/// A `Reporter` that records one `(level, buckets_used, entries_in_map)`
/// triple per page visited, in visitation order, for tests that want to
/// assert on the shape of the walk rather than just its totals.
#[derive(Debug, Default, Clone)]
pub struct RecordingReporter {
    pub records: Vec<(u8, usize, usize)>,
}

impl Reporter for RecordingReporter {
    fn report_data_usage(&mut self, level: u8, buckets_used: usize, entries_in_map: usize) {
        self.records.push((level, buckets_used, entries_in_map));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reporter_aggregates_across_calls() {
        let mut reporter = SummaryReporter::default();
        reporter.report_data_usage(0, 2, 5);
        reporter.report_data_usage(1, 0, 3);
        assert_eq!(reporter.pages_visited, 2);
        assert_eq!(reporter.total_buckets_used, 2);
        assert_eq!(reporter.total_entries, 8);
        assert_eq!(reporter.max_level, 1);
    }

    #[test]
    fn recording_reporter_preserves_order() {
        let mut reporter = RecordingReporter::default();
        reporter.report_data_usage(1, 1, 1);
        reporter.report_data_usage(0, 2, 2);
        assert_eq!(reporter.records, vec![(1, 1, 1), (0, 2, 2)]);
    }
}
