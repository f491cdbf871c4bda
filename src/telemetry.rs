//! Telemetry metric name constants.
//!
//! Centralised metric names for heimdall operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `heimdall_`. Counters end in `_total`,
//! gauges and histograms carry their unit (`_gb`, `_seconds`).
//!
//! # Common labels
//!
//! - `model_type`: category (e.g. "llm", "text_to_image")
//! - `reason`: rejection kind (e.g. "insufficient_device_memory")
//! - `group`: working-set group name
//! - `status`: outcome: "ok", "partial" or "error"

/// Admission requests that produced a reservation.
///
/// Labels: `model_type`.
pub const ADMISSIONS_TOTAL: &str = "heimdall_admissions_total";

/// Admission requests that were turned down.
///
/// Labels: `reason`.
pub const REJECTIONS_TOTAL: &str = "heimdall_rejections_total";

/// Reservations removed from the ledger.
pub const RELEASES_TOTAL: &str = "heimdall_releases_total";

/// Device memory currently committed in the ledger, in GB.
pub const COMMITTED_DEVICE_GB: &str = "heimdall_committed_device_gb";

/// Host memory currently committed in the ledger, in GB.
pub const COMMITTED_HOST_GB: &str = "heimdall_committed_host_gb";

/// Working-set switches performed.
///
/// Labels: `group` (target), `status` ("ok" | "partial").
pub const GROUP_SWITCHES_TOTAL: &str = "heimdall_group_switches_total";

/// Working-set switch duration in seconds.
///
/// Labels: `group` (target).
pub const GROUP_SWITCH_DURATION_SECONDS: &str = "heimdall_group_switch_duration_seconds";

/// Worker load/unload/shutdown failures.
///
/// Labels: `worker` (the category for model workers, the task name for
/// supervised tasks), `operation` ("load" | "unload" | "shutdown").
pub const WORKER_FAILURES_TOTAL: &str = "heimdall_worker_failures_total";
