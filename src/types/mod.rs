//! Public value types for the Heimdall API.

mod hardware;
mod model;
mod quantization;
mod status;

pub use hardware::HardwareProfile;
pub use model::{ModelMetadata, ModelType, Provider};
pub use quantization::QuantizationLevel;
pub use status::{ModelStatus, StatusEvent};
