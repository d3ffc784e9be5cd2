//! Work queue trait definition.
//!
//! Queues hold task ids (or workflow ids for the decider queue). An item
//! becomes visible once its offset has elapsed. Popping hides it for an
//! unack timeout; an item not acked before that timeout becomes visible
//! again.

use baton_types::error::RepositoryError;
use uuid::Uuid;

pub trait WorkQueue: Send + Sync {
    /// Add `id` with a visibility delay, replacing any existing entry.
    fn push(
        &self,
        queue: &str,
        id: &Uuid,
        offset_secs: u64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn remove(
        &self,
        queue: &str,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// `true` when `id` is in the queue, visible or not.
    fn exists(
        &self,
        queue: &str,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Reset the visibility delay of an existing item. Returns `false` when
    /// the item is absent.
    fn set_offset_time(
        &self,
        queue: &str,
        id: &Uuid,
        offset_secs: u64,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Extend (or shorten) how long a popped item stays hidden. Returns
    /// `false` when the item is absent.
    fn set_unack_timeout(
        &self,
        queue: &str,
        id: &Uuid,
        unack_timeout_ms: u64,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Pop up to `count` visible items, oldest deadline first.
    fn pop(
        &self,
        queue: &str,
        count: usize,
    ) -> impl std::future::Future<Output = Result<Vec<Uuid>, RepositoryError>> + Send;

    /// Acknowledge a popped item, removing it. Returns `false` when absent.
    fn ack(
        &self,
        queue: &str,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn size(
        &self,
        queue: &str,
    ) -> impl std::future::Future<Output = Result<usize, RepositoryError>> + Send;
}
