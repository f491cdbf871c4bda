//! Numeric precision tiers.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HeimdallError, Result};

/// A numeric precision a model can be loaded at.
///
/// Ordered by fidelity: `Fp32 > Fp16 > Bf16 > Int8 > Int4`. FP16 and BF16
/// share a footprint; FP16 ranks higher because it keeps more mantissa bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantizationLevel {
    Fp32,
    Fp16,
    Bf16,
    Int8,
    Int4,
}

impl QuantizationLevel {
    /// All tiers, highest fidelity first.
    pub const LADDER: [QuantizationLevel; 5] =
        [Self::Fp32, Self::Fp16, Self::Bf16, Self::Int8, Self::Int4];

    fn fidelity(self) -> u8 {
        match self {
            Self::Fp32 => 4,
            Self::Fp16 => 3,
            Self::Bf16 => 2,
            Self::Int8 => 1,
            Self::Int4 => 0,
        }
    }

    /// The unquantized tier; the only one eligible for models that do not
    /// support quantization.
    pub fn top() -> Self {
        Self::Fp32
    }

    pub fn is_quantized(self) -> bool {
        self != Self::top()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fp32 => "fp32",
            Self::Fp16 => "fp16",
            Self::Bf16 => "bf16",
            Self::Int8 => "int8",
            Self::Int4 => "int4",
        }
    }
}

impl Ord for QuantizationLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fidelity().cmp(&other.fidelity())
    }
}

impl PartialOrd for QuantizationLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for QuantizationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuantizationLevel {
    type Err = HeimdallError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fp32" | "f32" => Ok(Self::Fp32),
            "fp16" | "f16" => Ok(Self::Fp16),
            "bf16" => Ok(Self::Bf16),
            "int8" | "8bit" => Ok(Self::Int8),
            "int4" | "4bit" => Ok(Self::Int4),
            other => Err(HeimdallError::Configuration(format!(
                "unknown quantization level: {other}"
            ))),
        }
    }
}
