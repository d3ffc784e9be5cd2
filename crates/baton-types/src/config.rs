//! Engine configuration types for Baton.
//!
//! `EngineConfig` represents the top-level `config.toml` that tunes the
//! orchestration loop, payload offload thresholds, and background drivers.
//! It is constructed once and injected; nothing reads it from global state.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Baton engine.
///
/// Loaded from `~/.baton/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay before a workflow pushed to the decider queue is swept again.
    #[serde(default = "default_sweep_frequency_secs")]
    pub sweep_frequency_secs: u64,

    /// A domain counts as active if a worker polled it within this window.
    #[serde(default = "default_active_worker_last_poll_secs")]
    pub active_worker_last_poll_secs: u64,

    /// Upper bound on decide passes per `decide` call.
    #[serde(default = "default_max_decide_passes")]
    pub max_decide_passes: u32,

    #[serde(default = "default_task_payload_threshold_kb")]
    pub task_input_payload_threshold_kb: u64,

    #[serde(default = "default_task_payload_threshold_kb")]
    pub task_output_payload_threshold_kb: u64,

    #[serde(default = "default_workflow_payload_threshold_kb")]
    pub workflow_input_payload_threshold_kb: u64,

    #[serde(default = "default_workflow_payload_threshold_kb")]
    pub workflow_output_payload_threshold_kb: u64,

    /// Idle wait between system task queue polls.
    #[serde(default = "default_system_task_poll_interval_ms")]
    pub system_task_poll_interval_ms: u64,

    /// Maximum task ids popped per system task queue poll.
    #[serde(default = "default_system_task_poll_count")]
    pub system_task_poll_count: usize,

    /// Visibility timeout applied while a system task executes.
    #[serde(default = "default_system_task_unack_timeout_secs")]
    pub system_task_unack_timeout_secs: u64,

    /// How long a driver waits to acquire a workflow lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Lease after which an unreleased workflow lock expires.
    #[serde(default = "default_lock_lease_ms")]
    pub lock_lease_ms: u64,

    /// Maximum workflow ids popped per sweep.
    #[serde(default = "default_sweeper_batch_size")]
    pub sweeper_batch_size: usize,

    /// Queue that receives workflow ids on completion and termination.
    #[serde(default = "default_status_listener_queue")]
    pub status_listener_queue: String,
}

fn default_sweep_frequency_secs() -> u64 {
    30
}

fn default_active_worker_last_poll_secs() -> u64 {
    10
}

fn default_max_decide_passes() -> u32 {
    32
}

fn default_task_payload_threshold_kb() -> u64 {
    3072
}

fn default_workflow_payload_threshold_kb() -> u64 {
    5120
}

fn default_system_task_poll_interval_ms() -> u64 {
    500
}

fn default_system_task_poll_count() -> usize {
    10
}

fn default_system_task_unack_timeout_secs() -> u64 {
    30
}

fn default_lock_timeout_ms() -> u64 {
    500
}

fn default_lock_lease_ms() -> u64 {
    60_000
}

fn default_sweeper_batch_size() -> usize {
    50
}

fn default_status_listener_queue() -> String {
    "_callbackQueue".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_frequency_secs: default_sweep_frequency_secs(),
            active_worker_last_poll_secs: default_active_worker_last_poll_secs(),
            max_decide_passes: default_max_decide_passes(),
            task_input_payload_threshold_kb: default_task_payload_threshold_kb(),
            task_output_payload_threshold_kb: default_task_payload_threshold_kb(),
            workflow_input_payload_threshold_kb: default_workflow_payload_threshold_kb(),
            workflow_output_payload_threshold_kb: default_workflow_payload_threshold_kb(),
            system_task_poll_interval_ms: default_system_task_poll_interval_ms(),
            system_task_poll_count: default_system_task_poll_count(),
            system_task_unack_timeout_secs: default_system_task_unack_timeout_secs(),
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_lease_ms: default_lock_lease_ms(),
            sweeper_batch_size: default_sweeper_batch_size(),
            status_listener_queue: default_status_listener_queue(),
        }
    }
}
