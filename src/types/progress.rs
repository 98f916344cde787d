use serde::{Deserialize, Serialize};

use crate::error::{DocBatchError, Result};
use crate::text::TextLengths;

/// Document and length counters over some set of documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub documents: u64,
    pub sentences: u64,
    pub words: u64,
    pub chars: u64,
}

impl Totals {
    pub fn add(&mut self, lengths: TextLengths) {
        self.documents += 1;
        self.sentences += lengths.sentences;
        self.words += lengths.words;
        self.chars += lengths.chars;
    }

    #[must_use]
    pub fn from_lengths<I: IntoIterator<Item = TextLengths>>(lengths: I) -> Self {
        let mut totals = Self::default();
        for item in lengths {
            totals.add(item);
        }
        totals
    }
}

/// Aggregate statistics of one committed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub documents: u64,
    pub sentences: u64,
    pub words: u64,
    pub chars: u64,
    pub seconds: u64,
}

impl BatchStats {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("documents", self.documents),
            ("sentences", self.sentences),
            ("words", self.words),
            ("chars", self.chars),
            ("seconds", self.seconds),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(DocBatchError::InvalidStatistics {
                reason: format!("{name} must be positive in {self:?}"),
            }),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn rates(&self) -> Rates {
        Rates::over(
            Totals {
                documents: self.documents,
                sentences: self.sentences,
                words: self.words,
                chars: self.chars,
            },
            self.seconds as f64,
        )
    }
}

/// Per-second throughput.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rates {
    pub documents: f64,
    pub sentences: f64,
    pub words: f64,
    pub chars: f64,
}

impl Rates {
    /// Zero rates when `seconds` is not positive.
    #[must_use]
    pub fn over(totals: Totals, seconds: f64) -> Self {
        if seconds <= 0.0 {
            return Self::default();
        }
        Self {
            documents: totals.documents as f64 / seconds,
            sentences: totals.sentences as f64 / seconds,
            words: totals.words as f64 / seconds,
            chars: totals.chars as f64 / seconds,
        }
    }
}

/// What the monitor publishes after every batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// 1-based index of the batch just posted.
    pub batch_index: u64,
    pub batch: BatchStats,
    pub batch_rates: Rates,
    pub processed: Totals,
    pub elapsed_secs: u64,
    pub cumulative_rates: Rates,
    pub input: Totals,
    pub chars_remaining: u64,
    pub remaining_secs: f64,
    pub estimated_total_secs: f64,
    /// Elapsed time as a fraction of the time budget.
    pub budget_used: f64,
    /// Estimated total time as a fraction of the time budget.
    pub budget_projected: f64,
}

impl ProgressReport {
    #[must_use]
    pub fn percent_complete(&self) -> f64 {
        if self.input.chars == 0 {
            return 100.0;
        }
        100.0 * (self.input.chars - self.chars_remaining) as f64 / self.input.chars as f64
    }
}

/// Render seconds as `"{h}h {m}m {s}s"`.
#[must_use]
pub fn format_hms(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "unknown".to_owned();
    }
    let whole = seconds.round() as u64;
    format!("{}h {}m {}s", whole / 3600, (whole % 3600) / 60, whole % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_fields_are_rejected_by_name() {
        let stats = BatchStats {
            documents: 1,
            sentences: 1,
            words: 1,
            chars: 1,
            seconds: 0,
        };
        let err = stats.validate().expect_err("zero seconds");
        assert!(err.to_string().contains("seconds"));
    }

    #[test]
    fn rates_divide_by_seconds() {
        let stats = BatchStats {
            documents: 4,
            sentences: 40,
            words: 400,
            chars: 2000,
            seconds: 10,
        };
        let rates = stats.rates();
        assert_eq!(rates.sentences, 4.0);
        assert_eq!(rates.chars, 200.0);
        assert_eq!(Rates::over(Totals::default(), 0.0), Rates::default());
    }

    #[test]
    fn hms_formatting() {
        assert_eq!(format_hms(3725.0), "1h 2m 5s");
        assert_eq!(format_hms(0.0), "0h 0m 0s");
        assert_eq!(format_hms(f64::INFINITY), "unknown");
    }
}
