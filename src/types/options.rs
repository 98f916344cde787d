//! Builder-style options controlling a batch job.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_SENTENCE_CHARS, DEFAULT_PREDICTED_STATISTICS_KEY,
    DEFAULT_SLOWDOWN_FACTOR, DEFAULT_SLOWDOWN_WINDOW, DEFAULT_TIME_BUDGET_HOURS,
};
use crate::error::{DocBatchError, Result};

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_sentence_chars() -> usize {
    DEFAULT_MAX_SENTENCE_CHARS
}

fn default_predicted_statistics_key() -> String {
    DEFAULT_PREDICTED_STATISTICS_KEY.to_owned()
}

fn default_time_budget_hours() -> u64 {
    DEFAULT_TIME_BUDGET_HOURS
}

fn default_slowdown_window() -> usize {
    DEFAULT_SLOWDOWN_WINDOW
}

fn default_slowdown_factor() -> f64 {
    DEFAULT_SLOWDOWN_FACTOR
}

/// When the output log is flushed to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Leave flushing to the operating system.
    Never,
    /// `sync_data` after every committed batch.
    #[default]
    PerBatch,
}

/// Deliberately slow the job down once the slowdown window is full, so the
/// restart path can be exercised end to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowdownDrill {
    /// Full-window batches to let pass before the drill starts sleeping.
    pub delay_batches: usize,
}

/// Tunable options for a batch job. Every field has a default, so a config
/// file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Sentences longer than this many characters are truncated.
    #[serde(default = "default_max_sentence_chars")]
    pub max_sentence_chars: usize,
    /// JSON key the annotation payload is written under in the output log.
    #[serde(default = "default_predicted_statistics_key")]
    pub predicted_statistics_key: String,
    /// Advisory only; progress reports express elapsed time as a fraction of it.
    #[serde(default = "default_time_budget_hours")]
    pub time_budget_hours: u64,
    #[serde(default = "default_slowdown_window")]
    pub slowdown_window: usize,
    #[serde(default = "default_slowdown_factor")]
    pub slowdown_factor: f64,
    #[serde(default)]
    pub sync: SyncPolicy,
    #[serde(default)]
    pub slowdown_drill: Option<SlowdownDrill>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_sentence_chars: default_max_sentence_chars(),
            predicted_statistics_key: default_predicted_statistics_key(),
            time_budget_hours: default_time_budget_hours(),
            slowdown_window: default_slowdown_window(),
            slowdown_factor: default_slowdown_factor(),
            sync: SyncPolicy::default(),
            slowdown_drill: None,
        }
    }
}

impl EngineOptions {
    /// Start a fluent builder for `EngineOptions`.
    #[must_use]
    pub fn builder() -> EngineOptionsBuilder {
        EngineOptionsBuilder::default()
    }

    /// Read options from a JSON file and validate them.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let options: Self = serde_json::from_slice(&bytes)?;
        options.validate()?;
        tracing::debug!(config.path = %path.display(), ?options, "loaded engine options");
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(DocBatchError::InvalidOptions {
                reason: reason.to_owned(),
            })
        };
        if self.batch_size == 0 {
            return invalid("batch_size must be positive");
        }
        if self.max_sentence_chars == 0 {
            return invalid("max_sentence_chars must be positive");
        }
        if self.predicted_statistics_key.is_empty() {
            return invalid("predicted_statistics_key must not be empty");
        }
        if self.time_budget_hours == 0 {
            return invalid("time_budget_hours must be positive");
        }
        if self.slowdown_window == 0 {
            return invalid("slowdown_window must be positive");
        }
        if !self.slowdown_factor.is_finite() || self.slowdown_factor <= 1.0 {
            return invalid("slowdown_factor must be a finite number greater than 1.0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineOptionsBuilder {
    inner: EngineOptions,
}

impl EngineOptionsBuilder {
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.inner.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn max_sentence_chars(mut self, max_chars: usize) -> Self {
        self.inner.max_sentence_chars = max_chars;
        self
    }

    pub fn predicted_statistics_key<S: Into<String>>(mut self, key: S) -> Self {
        self.inner.predicted_statistics_key = key.into();
        self
    }

    #[must_use]
    pub fn time_budget_hours(mut self, hours: u64) -> Self {
        self.inner.time_budget_hours = hours;
        self
    }

    #[must_use]
    pub fn slowdown_window(mut self, window: usize) -> Self {
        self.inner.slowdown_window = window;
        self
    }

    #[must_use]
    pub fn slowdown_factor(mut self, factor: f64) -> Self {
        self.inner.slowdown_factor = factor;
        self
    }

    #[must_use]
    pub fn sync(mut self, policy: SyncPolicy) -> Self {
        self.inner.sync = policy;
        self
    }

    #[must_use]
    pub fn slowdown_drill(mut self, drill: SlowdownDrill) -> Self {
        self.inner.slowdown_drill = Some(drill);
        self
    }

    pub fn build(self) -> Result<EngineOptions> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}
