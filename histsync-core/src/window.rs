//! Processing window derivation.
//!
//! The configured default window is immutable for the whole batch; each
//! symbol gets a freshly computed [`ProcessingWindow`], so nothing decided
//! for one symbol can carry over to the next.

use chrono::NaiveDate;
use std::fmt;

/// Default date range from configuration. `end_date == None` means "today".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultWindow {
    pub init_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

/// Inclusive date range exported and imported for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingWindow {
    pub init_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl fmt::Display for ProcessingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.init_date, self.end_date)
    }
}

/// Why a symbol needs no work this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Watermark is today (or, after a clock change, later than today).
    AlreadyCurrent { watermark: NaiveDate },
    /// First run, but the default window ends before it starts.
    EmptyRange { init_date: NaiveDate, end_date: NaiveDate },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyCurrent { watermark } => {
                write!(f, "already processed through {watermark}")
            }
            SkipReason::EmptyRange {
                init_date,
                end_date,
            } => write!(f, "empty window {init_date} to {end_date}"),
        }
    }
}

/// Outcome of window derivation for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDecision {
    Process(ProcessingWindow),
    Skip(SkipReason),
}

/// Derive the window for one symbol from its watermark.
///
/// - no watermark: the configured default, with a missing end date
///   resolved to `today`
/// - watermark on or after `today`: skip
/// - earlier watermark: `(watermark, today)`
pub fn derive_window(
    defaults: &DefaultWindow,
    watermark: Option<NaiveDate>,
    today: NaiveDate,
) -> WindowDecision {
    match watermark {
        None => {
            let end_date = defaults.end_date.unwrap_or(today);
            if end_date < defaults.init_date {
                WindowDecision::Skip(SkipReason::EmptyRange {
                    init_date: defaults.init_date,
                    end_date,
                })
            } else {
                WindowDecision::Process(ProcessingWindow {
                    init_date: defaults.init_date,
                    end_date,
                })
            }
        }
        Some(last) if last >= today => {
            WindowDecision::Skip(SkipReason::AlreadyCurrent { watermark: last })
        }
        Some(last) => WindowDecision::Process(ProcessingWindow {
            init_date: last,
            end_date: today,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn defaults() -> DefaultWindow {
        DefaultWindow {
            init_date: d(2023, 1, 1),
            end_date: None,
        }
    }

    #[test]
    fn first_run_uses_default_init_and_today() {
        let decision = derive_window(&defaults(), None, d(2023, 6, 1));
        assert_eq!(
            decision,
            WindowDecision::Process(ProcessingWindow {
                init_date: d(2023, 1, 1),
                end_date: d(2023, 6, 1),
            })
        );
    }

    #[test]
    fn first_run_honours_configured_end() {
        let defaults = DefaultWindow {
            init_date: d(2023, 1, 1),
            end_date: Some(d(2023, 3, 31)),
        };
        let decision = derive_window(&defaults, None, d(2023, 6, 1));
        assert_eq!(
            decision,
            WindowDecision::Process(ProcessingWindow {
                init_date: d(2023, 1, 1),
                end_date: d(2023, 3, 31),
            })
        );
    }

    #[test]
    fn watermark_today_skips() {
        let decision = derive_window(&defaults(), Some(d(2023, 6, 1)), d(2023, 6, 1));
        assert_eq!(
            decision,
            WindowDecision::Skip(SkipReason::AlreadyCurrent {
                watermark: d(2023, 6, 1)
            })
        );
    }

    #[test]
    fn future_watermark_skips() {
        let decision = derive_window(&defaults(), Some(d(2023, 6, 3)), d(2023, 6, 1));
        assert!(matches!(decision, WindowDecision::Skip(SkipReason::AlreadyCurrent { .. })));
    }

    #[test]
    fn earlier_watermark_resumes_to_today() {
        let defaults = DefaultWindow {
            init_date: d(2023, 1, 1),
            end_date: Some(d(2023, 3, 31)),
        };
        let decision = derive_window(&defaults, Some(d(2023, 5, 20)), d(2023, 6, 1));
        assert_eq!(
            decision,
            WindowDecision::Process(ProcessingWindow {
                init_date: d(2023, 5, 20),
                end_date: d(2023, 6, 1),
            })
        );
    }

    #[test]
    fn default_starting_after_today_is_empty() {
        let defaults = DefaultWindow {
            init_date: d(2024, 1, 1),
            end_date: None,
        };
        let decision = derive_window(&defaults, None, d(2023, 6, 1));
        assert!(matches!(decision, WindowDecision::Skip(SkipReason::EmptyRange { .. })));
    }

    proptest! {
        #[test]
        fn processed_windows_are_never_inverted(
            init_offset in 0i64..2000,
            wm_offset in proptest::option::of(0i64..2000),
            today_offset in 0i64..2000,
        ) {
            let base = d(2015, 1, 1);
            let defaults = DefaultWindow {
                init_date: base + chrono::Duration::days(init_offset),
                end_date: None,
            };
            let watermark = wm_offset.map(|o| base + chrono::Duration::days(o));
            let today = base + chrono::Duration::days(today_offset);

            match derive_window(&defaults, watermark, today) {
                WindowDecision::Process(w) => {
                    prop_assert!(w.init_date <= w.end_date);
                    prop_assert!(w.end_date <= today);
                    if let Some(wm) = watermark {
                        prop_assert_eq!(w.init_date, wm);
                    } else {
                        prop_assert_eq!(w.init_date, defaults.init_date);
                    }
                }
                WindowDecision::Skip(SkipReason::AlreadyCurrent { watermark: wm }) => {
                    prop_assert!(wm >= today);
                }
                WindowDecision::Skip(SkipReason::EmptyRange { .. }) => {
                    prop_assert!(watermark.is_none());
                }
            }
        }
    }
}
