//! Quantization ladder selection.
//!
//! Picks the highest-fidelity precision whose estimated footprint fits the
//! available device budget. The estimate is `size_gb * factor(level)`; the
//! factor table is policy, not physics, and can be overridden per level.

use std::collections::HashMap;

use serde::Deserialize;

use crate::types::{ModelMetadata, QuantizationLevel};

/// Per-level size factor overrides, as read from configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuantizationFactors {
    #[serde(default)]
    pub fp32: Option<f64>,
    #[serde(default)]
    pub fp16: Option<f64>,
    #[serde(default)]
    pub bf16: Option<f64>,
    #[serde(default)]
    pub int8: Option<f64>,
    #[serde(default)]
    pub int4: Option<f64>,
}

/// Default size factor for a level relative to the full-precision footprint.
pub fn default_factor(level: QuantizationLevel) -> f64 {
    match level {
        QuantizationLevel::Fp32 => 1.0,
        QuantizationLevel::Fp16 | QuantizationLevel::Bf16 => 0.5,
        QuantizationLevel::Int8 => 0.25,
        QuantizationLevel::Int4 => 0.125,
    }
}

/// Pure selector over the quantization ladder.
#[derive(Debug, Clone)]
pub struct QuantizationStrategy {
    factors: HashMap<QuantizationLevel, f64>,
}

impl Default for QuantizationStrategy {
    fn default() -> Self {
        Self {
            factors: QuantizationLevel::LADDER
                .iter()
                .map(|&level| (level, default_factor(level)))
                .collect(),
        }
    }
}

impl QuantizationStrategy {
    /// Create a strategy with the default factor table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the size factor of one level.
    ///
    /// Non-finite or non-positive factors are ignored.
    pub fn with_factor(mut self, level: QuantizationLevel, factor: f64) -> Self {
        if factor.is_finite() && factor > 0.0 {
            self.factors.insert(level, factor);
        }
        self
    }

    /// Apply configured overrides on top of the current table.
    pub fn with_factors(self, overrides: &QuantizationFactors) -> Self {
        [
            (QuantizationLevel::Fp32, overrides.fp32),
            (QuantizationLevel::Fp16, overrides.fp16),
            (QuantizationLevel::Bf16, overrides.bf16),
            (QuantizationLevel::Int8, overrides.int8),
            (QuantizationLevel::Int4, overrides.int4),
        ]
        .into_iter()
        .fold(self, |strategy, (level, factor)| match factor {
            Some(f) => strategy.with_factor(level, f),
            None => strategy,
        })
    }

    pub fn factor(&self, level: QuantizationLevel) -> f64 {
        self.factors
            .get(&level)
            .copied()
            .unwrap_or_else(|| default_factor(level))
    }

    /// Estimated device footprint of `metadata` at `level`, in GB.
    pub fn estimated_size(&self, metadata: &ModelMetadata, level: QuantizationLevel) -> f64 {
        metadata.size_gb * self.factor(level)
    }

    /// Tiers eligible for this model, highest fidelity first.
    pub fn ladder(&self, metadata: &ModelMetadata) -> Vec<QuantizationLevel> {
        if metadata.supports_quantization {
            QuantizationLevel::LADDER.to_vec()
        } else {
            vec![QuantizationLevel::top()]
        }
    }

    /// Select a precision for `metadata` within `available_device_gb`.
    ///
    /// An eligible `preferred` level that fits wins outright. Otherwise the
    /// first fitting tier on the ladder is returned, so higher fidelity
    /// always beats lower when both fit. `None` means nothing fits.
    pub fn select(
        &self,
        metadata: &ModelMetadata,
        available_device_gb: f64,
        preferred: Option<QuantizationLevel>,
    ) -> Option<QuantizationLevel> {
        let ladder = self.ladder(metadata);
        let fits = |level: QuantizationLevel| {
            self.estimated_size(metadata, level) <= available_device_gb
        };

        if let Some(level) = preferred {
            if ladder.contains(&level) && fits(level) {
                return Some(level);
            }
        }

        ladder.into_iter().find(|&level| fits(level))
    }
}
