//! Model catalog types.
//!
//! Declarative descriptions of model variants: what family they come from,
//! what they do, and how much memory they need.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HeimdallError, Result};

/// Known model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Llama,
    Mistral,
    Qwen,
    Gemma,
    Phi,
    StableDiffusion,
    Flux,
    Whisper,
    Bark,
    Kokoro,
    Ltx,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llama => "llama",
            Self::Mistral => "mistral",
            Self::Qwen => "qwen",
            Self::Gemma => "gemma",
            Self::Phi => "phi",
            Self::StableDiffusion => "stable_diffusion",
            Self::Flux => "flux",
            Self::Whisper => "whisper",
            Self::Bark => "bark",
            Self::Kokoro => "kokoro",
            Self::Ltx => "ltx",
        }
    }

    pub fn all() -> &'static [Provider] {
        &[
            Self::Llama,
            Self::Mistral,
            Self::Qwen,
            Self::Gemma,
            Self::Phi,
            Self::StableDiffusion,
            Self::Flux,
            Self::Whisper,
            Self::Bark,
            Self::Kokoro,
            Self::Ltx,
        ]
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = HeimdallError;

    fn from_str(s: &str) -> Result<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| HeimdallError::Configuration(format!("unknown provider: {s}")))
    }
}

/// What a model does, which also decides which working set it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    Llm,
    TextToImage,
    TextToSpeech,
    SpeechToText,
    TextToVideo,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::TextToImage => "text_to_image",
            Self::TextToSpeech => "text_to_speech",
            Self::SpeechToText => "speech_to_text",
            Self::TextToVideo => "text_to_video",
        }
    }

    pub fn all() -> &'static [ModelType] {
        &[
            Self::Llm,
            Self::TextToImage,
            Self::TextToSpeech,
            Self::SpeechToText,
            Self::TextToVideo,
        ]
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = HeimdallError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "llm" => Ok(Self::Llm),
            "text_to_image" | "tti" => Ok(Self::TextToImage),
            "text_to_speech" | "tts" => Ok(Self::TextToSpeech),
            "speech_to_text" | "stt" => Ok(Self::SpeechToText),
            "text_to_video" | "ttv" => Ok(Self::TextToVideo),
            other => Err(HeimdallError::Configuration(format!(
                "unknown model type: {other}"
            ))),
        }
    }
}

/// Resource requirements of one model variant.
///
/// Registered once at startup and never mutated. All sizes are in GB.
/// `size_gb` is the footprint at full (unquantized) precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Opaque identifier handed to the external loader; also the registry key.
    pub external_id: String,
    /// Human-readable name.
    pub name: String,
    pub provider: Provider,
    pub model_type: ModelType,
    pub size_gb: f64,
    pub min_device_memory_gb: f64,
    pub min_host_memory_gb: f64,
    pub recommended_device_memory_gb: f64,
    pub recommended_host_memory_gb: f64,
    #[serde(default)]
    pub supports_quantization: bool,
}

impl ModelMetadata {
    /// Create metadata whose device requirements default to the full
    /// model size and whose host requirements default to zero.
    pub fn new(
        external_id: impl Into<String>,
        name: impl Into<String>,
        provider: Provider,
        model_type: ModelType,
        size_gb: f64,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            name: name.into(),
            provider,
            model_type,
            size_gb,
            min_device_memory_gb: size_gb,
            min_host_memory_gb: 0.0,
            recommended_device_memory_gb: size_gb,
            recommended_host_memory_gb: 0.0,
            supports_quantization: false,
        }
    }

    /// Set the minimum device and host memory.
    pub fn with_min_memory(mut self, device_gb: f64, host_gb: f64) -> Self {
        self.min_device_memory_gb = device_gb;
        self.min_host_memory_gb = host_gb;
        self
    }

    /// Set the recommended device and host memory.
    pub fn with_recommended_memory(mut self, device_gb: f64, host_gb: f64) -> Self {
        self.recommended_device_memory_gb = device_gb;
        self.recommended_host_memory_gb = host_gb;
        self
    }

    /// Mark whether tiers below full precision may be used.
    pub fn with_quantization(mut self, supported: bool) -> Self {
        self.supports_quantization = supported;
        self
    }

    /// Check the catalog invariants: sizes are finite and non-negative, and
    /// every minimum is at most its recommendation.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("size_gb", self.size_gb),
            ("min_device_memory_gb", self.min_device_memory_gb),
            ("min_host_memory_gb", self.min_host_memory_gb),
            ("recommended_device_memory_gb", self.recommended_device_memory_gb),
            ("recommended_host_memory_gb", self.recommended_host_memory_gb),
        ];
        for (field, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(HeimdallError::InvalidMetadata(format!(
                    "{}: {field} must be a non-negative number, got {value}",
                    self.external_id
                )));
            }
        }
        if self.min_device_memory_gb > self.recommended_device_memory_gb {
            return Err(HeimdallError::InvalidMetadata(format!(
                "{}: min device memory {} exceeds recommended {}",
                self.external_id, self.min_device_memory_gb, self.recommended_device_memory_gb
            )));
        }
        if self.min_host_memory_gb > self.recommended_host_memory_gb {
            return Err(HeimdallError::InvalidMetadata(format!(
                "{}: min host memory {} exceeds recommended {}",
                self.external_id, self.min_host_memory_gb, self.recommended_host_memory_gb
            )));
        }
        if self.external_id.is_empty() {
            return Err(HeimdallError::InvalidMetadata(
                "external_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
