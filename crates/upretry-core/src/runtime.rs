//! Runtime feature flags expressed as percentages.

use std::collections::HashMap;

use crate::retry::RandomSource;

/// Feature key that gates all retries.
pub const USE_RETRY: &str = "upstream.use_retry";

/// Percentage-based feature switches. A feature not listed here uses the
/// default percentage given at the call site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Runtime {
    features: HashMap<String, u64>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_features(features: HashMap<String, u64>) -> Self {
        Self { features }
    }

    /// Override the percentage for `key`. Values above 100 behave as 100.
    pub fn set(&mut self, key: impl Into<String>, percent: u64) {
        self.features.insert(key.into(), percent);
    }

    /// Sample the feature: true for roughly `percent`% of calls.
    pub fn feature_enabled(
        &self,
        key: &str,
        default_percent: u64,
        random: &mut dyn RandomSource,
    ) -> bool {
        let percent = self.features.get(key).copied().unwrap_or(default_percent);
        match percent {
            0 => false,
            p if p >= 100 => true,
            p => random.random() % 100 < p,
        }
    }
}
