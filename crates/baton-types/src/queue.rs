//! Queue naming shared by the orchestration loop and queue implementations.

/// Queue holding workflow ids awaiting periodic re-evaluation by the sweeper.
pub const DECIDER_QUEUE: &str = "_deciderQueue";

/// Derive the work queue name for a task type, optionally pinned to a domain.
///
/// Domain-pinned queues are named `domain:task_type`.
pub fn queue_name(task_type: &str, domain: Option<&str>) -> String {
    match domain {
        Some(domain) if !domain.is_empty() => format!("{domain}:{task_type}"),
        _ => task_type.to_string(),
    }
}
