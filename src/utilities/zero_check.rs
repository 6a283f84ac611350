//! Post-hoc scan of correlation rows for suspicious runs of exact zeros.
//!
//! The scan is pure; writing the reports is a separate step so the caller
//! decides which stream receives them. Neither step can fail the call.

use crate::utilities::enums::CheckZeros;
use std::fmt;
use std::io::Write;

/// Fraction of exact-zero cells a row may hold before it is reported.
pub const DEFAULT_MAX_ZERO_FRACTION: f64 = 0.01;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ZeroRunPolicy {
    pub max_zero_fraction: f64,
}

impl Default for ZeroRunPolicy {
    fn default() -> Self {
        Self {
            max_zero_fraction: DEFAULT_MAX_ZERO_FRACTION,
        }
    }
}

impl ZeroRunPolicy {
    #[inline(always)]
    pub fn is_flagged(&self, zeros: usize, len: usize) -> bool {
        len > 0 && zeros as f64 > self.max_zero_fraction * len as f64
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ZeroRunReport {
    pub row: usize,
    pub zeros: usize,
    pub len: usize,
    /// Row 0 under `CheckZeros::First` is reported as "first" rather than by index.
    pub first_only: bool,
}

impl fmt::Display for ZeroRunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first_only {
            f.write_str("Detected too many zeros in first row of correlation computation")?;
        } else {
            write!(
                f,
                "Detected too many zeros in {}-th row of correlation computation",
                self.row
            )?;
        }
        write!(f, " ({}/{} values are zero)", self.zeros, self.len)
    }
}

#[inline]
fn count_zeros(row: &[f32]) -> usize {
    row.iter().filter(|&&v| v == 0.0).count()
}

/// Inspects `values` laid out as `rows x cols` according to `mode`.
pub fn scan_zero_runs(
    values: &[f32],
    rows: usize,
    cols: usize,
    mode: CheckZeros,
    policy: &ZeroRunPolicy,
) -> Vec<ZeroRunReport> {
    debug_assert_eq!(values.len(), rows * cols);
    if !mode.is_enabled() || cols == 0 {
        return Vec::new();
    }
    let scanned = match mode {
        CheckZeros::First => rows.min(1),
        _ => rows,
    };

    values
        .chunks_exact(cols)
        .take(scanned)
        .enumerate()
        .filter_map(|(row, chunk)| {
            let zeros = count_zeros(chunk);
            policy.is_flagged(zeros, cols).then(|| ZeroRunReport {
                row,
                zeros,
                len: cols,
                first_only: mode == CheckZeros::First,
            })
        })
        .collect()
}

/// One line per report. Write failures are ignored so a closed stream never
/// turns a finished computation into an error.
pub fn emit_zero_runs<W: Write + ?Sized>(reports: &[ZeroRunReport], sink: &mut W) {
    for report in reports {
        if writeln!(sink, "{}", report).is_err() {
            return;
        }
    }
    let _ = sink.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn render(reports: &[ZeroRunReport]) -> String {
        let mut buf = Vec::new();
        emit_zero_runs(reports, &mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_single_zero_cell_flagged_in_every_mode() {
        let policy = ZeroRunPolicy::default();
        let first = scan_zero_runs(&[0.0], 1, 1, CheckZeros::First, &policy);
        assert_eq!(first.len(), 1);
        assert!(render(&first)
            .contains("Detected too many zeros in first row of correlation computation"));

        let all = scan_zero_runs(&[0.0], 1, 1, CheckZeros::All, &policy);
        assert!(
            render(&all).contains("Detected too many zeros in 0-th row of correlation computation")
        );

        assert!(scan_zero_runs(&[0.0], 1, 1, CheckZeros::Disabled, &policy).is_empty());
    }

    #[test]
    fn test_first_mode_only_looks_at_row_zero() {
        let values = [0.5, 0.25, 0.0, 0.0];
        let policy = ZeroRunPolicy::default();
        assert!(scan_zero_runs(&values, 2, 2, CheckZeros::First, &policy).is_empty());

        let all = scan_zero_runs(&values, 2, 2, CheckZeros::All, &policy);
        assert_eq!(
            all,
            vec![ZeroRunReport {
                row: 1,
                zeros: 2,
                len: 2,
                first_only: false
            }]
        );
        assert_eq!(
            render(&all),
            "Detected too many zeros in 1-th row of correlation computation (2/2 values are zero)\n"
        );
    }

    #[test]
    fn test_threshold_is_strictly_greater() {
        let policy = ZeroRunPolicy {
            max_zero_fraction: 0.25,
        };
        assert!(!policy.is_flagged(1, 4));
        assert!(policy.is_flagged(2, 4));
        assert!(!policy.is_flagged(0, 0));

        let strict = ZeroRunPolicy {
            max_zero_fraction: 0.0,
        };
        assert!(strict.is_flagged(1, 1000));
        assert!(!strict.is_flagged(0, 1000));
    }

    #[test]
    fn test_empty_output_reports_nothing() {
        let policy = ZeroRunPolicy::default();
        assert!(scan_zero_runs(&[], 3, 0, CheckZeros::All, &policy).is_empty());
        assert!(scan_zero_runs(&[], 0, 5, CheckZeros::First, &policy).is_empty());
    }

    #[test]
    fn test_negative_zero_counts_as_zero() {
        let policy = ZeroRunPolicy::default();
        let reports = scan_zero_runs(&[-0.0, 0.0], 1, 2, CheckZeros::All, &policy);
        assert_eq!(reports[0].zeros, 2);
    }

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn test_emit_swallows_io_errors() {
        let reports = scan_zero_runs(&[0.0, 0.0], 2, 1, CheckZeros::All, &ZeroRunPolicy::default());
        assert_eq!(reports.len(), 2);
        emit_zero_runs(&reports, &mut Closed);
    }
}
