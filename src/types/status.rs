//! Residency status notifications.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ModelType;

/// Residency status of one model category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Failed => "failed",
        })
    }
}

/// A one-way status notification published on every residency transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub model_type: ModelType,
    pub status: ModelStatus,
    /// Catalog id, when the transition concerns a specific variant.
    pub model_id: Option<String>,
    /// Failure reason for `Failed` events.
    pub detail: Option<String>,
}

impl StatusEvent {
    pub fn new(model_type: ModelType, status: ModelStatus) -> Self {
        Self {
            model_type,
            status,
            model_id: None,
            detail: None,
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
