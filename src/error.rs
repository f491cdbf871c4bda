//! Heimdall error types

use crate::types::ModelType;

/// Why an admission request was turned down.
///
/// These are advisory results, not faults: the `Display` output is a
/// one-line reason suitable for showing to a user as-is.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("requires {required_gb:.1}GB device memory, {available_gb:.1}GB available")]
    InsufficientDeviceMemory { required_gb: f64, available_gb: f64 },

    #[error("requires {required_gb:.1}GB host memory, {available_gb:.1}GB available")]
    InsufficientHostMemory { required_gb: f64, available_gb: f64 },

    /// No precision tier, including the unquantized one, fits.
    #[error("no precision fits: {size_gb:.1}GB model, {available_gb:.1}GB device memory available")]
    QuantizationInfeasible { size_gb: f64, available_gb: f64 },

    /// The memory exists but is held by other reservations.
    #[error(
        "device memory is reserved by other models: requested {requested_gb:.1}GB, {uncommitted_gb:.1}GB uncommitted"
    )]
    AllocationConflict {
        requested_gb: f64,
        uncommitted_gb: f64,
    },

    /// The model already holds a reservation that has not been cleaned up.
    #[error("{0} already holds a reservation")]
    AlreadyReserved(String),
}

impl Rejection {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownModel(_) => "unknown_model",
            Self::InsufficientDeviceMemory { .. } => "insufficient_device_memory",
            Self::InsufficientHostMemory { .. } => "insufficient_host_memory",
            Self::QuantizationInfeasible { .. } => "quantization_infeasible",
            Self::AllocationConflict { .. } => "allocation_conflict",
            Self::AlreadyReserved(_) => "already_reserved",
        }
    }
}

/// Heimdall error types
#[derive(Debug, thiserror::Error)]
pub enum HeimdallError {
    // Worker errors
    #[error("{model_type} worker failed to load: {message}")]
    WorkerLoadFailed {
        model_type: ModelType,
        message: String,
    },

    #[error("{model_type} worker failed to unload: {message}")]
    WorkerUnloadFailed {
        model_type: ModelType,
        message: String,
    },

    // Working-set errors
    #[error("unknown working-set group: {0}")]
    UnknownGroup(String),

    #[error("a working-set switch is already in progress")]
    SwitchInProgress,

    // Hardware errors
    #[error("device probe failed: {0}")]
    DeviceProbe(String),

    // Catalog errors
    #[error("invalid model metadata: {0}")]
    InvalidMetadata(String),

    #[error("admission rejected: {0}")]
    Rejected(#[from] Rejection),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HeimdallError {
    /// Whether this error came from an external worker rather than from
    /// the resource core itself.
    pub fn is_worker_failure(&self) -> bool {
        matches!(
            self,
            Self::WorkerLoadFailed { .. } | Self::WorkerUnloadFailed { .. }
        )
    }
}

/// Result type alias for Heimdall operations
pub type Result<T> = std::result::Result<T, HeimdallError>;
