//! Progressive update sinks.
//!
//! The orchestrator pushes one [`ResourceUpdate`] per state change into an
//! injected [`UpdateSink`]. Sinks must not block: they run inline with the
//! resolution futures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::resource::{LevelContext, ResolutionBatch, ResolvedResource, ResourceStatus};

// ============================================================================
// ResourceUpdate
// ============================================================================

/// Category of an update. Only resource updates exist today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// A resource changed state.
    #[default]
    Resource,
}

/// An owned snapshot of one resource after a state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUpdate {
    /// Update category.
    pub kind: UpdateKind,
    /// Id of the resource.
    pub id: String,
    /// The resource as of this update.
    pub resource: ResolvedResource,
    /// When the update was emitted.
    pub emitted_at: DateTime<Utc>,
}

impl ResourceUpdate {
    /// Wraps a resource snapshot, stamping it with the current time.
    #[must_use]
    pub fn new(resource: ResolvedResource) -> Self {
        Self {
            kind: UpdateKind::Resource,
            id: resource.id().to_string(),
            resource,
            emitted_at: Utc::now(),
        }
    }

    /// Status carried by this update.
    #[must_use]
    pub const fn status(&self) -> ResourceStatus {
        self.resource.status
    }
}

// ============================================================================
// UpdateSink
// ============================================================================

/// Receives progressive updates.
pub trait UpdateSink: Send + Sync {
    /// Accepts one update. Must return promptly.
    fn emit(&self, update: ResourceUpdate);
}

impl<F> UpdateSink for F
where
    F: Fn(ResourceUpdate) + Send + Sync,
{
    fn emit(&self, update: ResourceUpdate) {
        self(update);
    }
}

impl UpdateSink for mpsc::UnboundedSender<ResourceUpdate> {
    fn emit(&self, update: ResourceUpdate) {
        if let Err(e) = self.send(update) {
            debug!(resource_id = %e.0.id, "Update receiver dropped");
        }
    }
}

impl<S> UpdateSink for Arc<S>
where
    S: UpdateSink + ?Sized,
{
    fn emit(&self, update: ResourceUpdate) {
        (**self).emit(update);
    }
}

/// Fans every update out to both sinks, first `A` then `B`.
impl<A, B> UpdateSink for (A, B)
where
    A: UpdateSink,
    B: UpdateSink,
{
    fn emit(&self, update: ResourceUpdate) {
        self.0.emit(update.clone());
        self.1.emit(update);
    }
}

// ============================================================================
// ResourceBoard
// ============================================================================

#[derive(Debug, Default)]
struct BoardState {
    generation: u64,
    context: Option<LevelContext>,
    order: Vec<String>,
    resources: HashMap<String, ResolvedResource>,
}

/// Why [`ResourceBoard::begin_retry`] refused to restart a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RetryRefused {
    /// No tracked resource has this id.
    #[error("resource is not tracked")]
    Untracked,
    /// The resource has not settled yet.
    #[error("resource is still being resolved")]
    Busy,
}

/// In-memory view of the current batch, as a UI store would keep it.
///
/// `track` replaces the interest set and starts a new generation. Updates for
/// ids outside it are ignored. Resubmitting a lesson reuses its ids, so
/// background work writes through a [`BatchSink`] bound to the generation it
/// started in. Each merge happens under a single lock so interleaved emits
/// never lose an update.
#[derive(Debug, Default)]
pub struct ResourceBoard {
    state: Mutex<BoardState>,
}

impl ResourceBoard {
    /// Creates an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts tracking `batch`, dropping whatever was tracked before.
    ///
    /// Returns the new generation.
    pub fn track(&self, batch: &ResolutionBatch) -> u64 {
        let mut state = self.lock();
        state.generation += 1;
        state.context = Some(batch.context.clone());
        state.order = batch.resources.iter().map(|r| r.id.clone()).collect();
        state.resources = batch
            .resources
            .iter()
            .map(|r| (r.id.clone(), ResolvedResource::pending(r.clone())))
            .collect();
        state.generation
    }

    /// Generation of the tracked batch. Zero before anything is tracked.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Marks a settled resource `loading` again and returns it with the
    /// current generation.
    ///
    /// The check and the write happen under one lock, so of two concurrent
    /// retries only the first succeeds.
    pub fn begin_retry(&self, id: &str) -> Result<(u64, ResolvedResource), RetryRefused> {
        let mut state = self.lock();
        let generation = state.generation;
        let slot = state.resources.get_mut(id).ok_or(RetryRefused::Untracked)?;
        if !slot.status.is_terminal() {
            return Err(RetryRefused::Busy);
        }
        let loading = slot.begin_loading().map_err(|_| RetryRefused::Busy)?;
        *slot = loading.clone();
        Ok((generation, loading))
    }

    /// Merges `update` if `generation` is still current. Returns `true` when
    /// the update landed.
    pub fn merge(&self, generation: u64, update: &ResourceUpdate) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            debug!(resource_id = %update.id, generation, "Ignoring update from superseded batch");
            return false;
        }
        match state.resources.get_mut(&update.id) {
            Some(slot) => {
                *slot = update.resource.clone();
                true
            }
            None => {
                debug!(resource_id = %update.id, "Ignoring update for untracked resource");
                false
            }
        }
    }

    /// Returns every tracked resource in batch order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ResolvedResource> {
        let state = self.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.resources.get(id).cloned())
            .collect()
    }

    /// Returns one tracked resource.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ResolvedResource> {
        self.lock().resources.get(id).cloned()
    }

    /// Returns the context of the tracked batch.
    #[must_use]
    pub fn context(&self) -> Option<LevelContext> {
        self.lock().context.clone()
    }

    /// Returns `true` if `id` belongs to the tracked batch.
    #[must_use]
    pub fn is_tracked(&self, id: &str) -> bool {
        self.lock().resources.contains_key(id)
    }

    /// Counts tracked resources by status.
    #[must_use]
    pub fn count(&self, status: ResourceStatus) -> usize {
        self.lock()
            .resources
            .values()
            .filter(|r| r.status == status)
            .count()
    }
}

impl UpdateSink for ResourceBoard {
    fn emit(&self, update: ResourceUpdate) {
        let mut state = self.lock();
        match state.resources.get_mut(&update.id) {
            Some(slot) => *slot = update.resource,
            None => debug!(resource_id = %update.id, "Ignoring update for untracked resource"),
        }
    }
}

// ============================================================================
// BatchSink
// ============================================================================

/// Sink for work started in one board generation.
///
/// Updates are merged into the board and then forwarded, but only while the
/// generation is current. Once a newer batch is tracked, nothing from this
/// one reaches the board or `forward`.
#[derive(Debug, Clone)]
pub struct BatchSink<S> {
    board: Arc<ResourceBoard>,
    generation: u64,
    forward: S,
}

impl<S> BatchSink<S> {
    /// Binds `forward` to `generation` of `board`.
    #[must_use]
    pub const fn new(board: Arc<ResourceBoard>, generation: u64, forward: S) -> Self {
        Self {
            board,
            generation,
            forward,
        }
    }

    /// Returns `true` while no newer batch has been tracked.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.board.generation() == self.generation
    }

    /// The sink updates are forwarded to.
    pub const fn forward(&self) -> &S {
        &self.forward
    }
}

impl<S> UpdateSink for BatchSink<S>
where
    S: UpdateSink,
{
    fn emit(&self, update: ResourceUpdate) {
        if self.board.merge(self.generation, &update) {
            self.forward.emit(update);
        }
    }
}
