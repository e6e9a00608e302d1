//! Visibility orchestrator: debounced viewport handling, cancellable
//! resolution, and label bookkeeping
//!
//! The engine owns the only thread of control that mutates visibility
//! state. Settled viewport notifications arrive on a channel; bursts are
//! collapsed by a trailing-edge debounce window, and each firing cancels
//! any still-in-flight resolver transaction before starting a new one, so
//! the last viewport change always wins regardless of completion order.
//!
//! Per cycle the state machine walks
//! `Idle -> Debouncing -> Resolving -> (Committed | Cancelled) -> Idle`,
//! suspending only at the select loop and at store queries.

use crate::entity::{Edge, Entity, EntityId, ViewportState, rect_contains};
use crate::lod::{LodTiers, Threshold, threshold_for};
use crate::resolver::{self, VisibilityDelta};
use crate::store::EntityStore;
use crate::txn::{TxOutcome, Txn};
use crate::{Result, StoreError};
use geo::Rect;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Tuning knobs for the engine.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Zoom tiers for the LOD policy
    pub tiers: LodTiers,
    /// Quiescence window before a burst of viewport changes resolves
    pub debounce_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tiers: LodTiers::default(),
            debounce_window: Duration::from_millis(100),
        }
    }
}

/// External rendering collaborator.
///
/// The engine never draws anything itself: it hands appearing entities to
/// the sink and gets back opaque handles it only keeps so it knows what to
/// ask the sink to remove later.
pub trait RenderSink {
    /// Opaque handle for one displayed label.
    type Handle;

    /// Display a label for a newly-visible entity.
    fn show_label(&mut self, entity: &Entity) -> Self::Handle;

    /// Remove a previously-created label.
    fn remove_label(&mut self, handle: Self::Handle);
}

/// Engine lifecycle notifications.
#[derive(Debug)]
pub enum EngineEvent {
    /// The store finished loading; viewport events are now accepted.
    StoreReady,
    /// A visibility resolution began.
    VisibilityStart,
    /// A resolution committed; `appeared` holds the hydrated rows that
    /// became visible.
    VisibilityDone {
        /// Entities that appeared in this cycle
        appeared: Vec<Entity>,
    },
    /// A resolution cycle failed and was skipped; the previous visible
    /// state is untouched.
    Error(StoreError),
}

/// Fire-and-forget entry point handed to the viewport source.
///
/// Dropping every handle closes the channel and shuts the engine down.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    viewport_tx: mpsc::UnboundedSender<ViewportState>,
}

impl EngineHandle {
    /// Notify the engine of a settled pan/zoom. Internally debounced.
    pub fn viewport_settled(&self, scale: f64, hit_rect: Rect<f64>) {
        let _ = self.viewport_tx.send(ViewportState::new(scale, hit_rect));
    }
}

/// A label currently tracked on behalf of the sink, with enough position
/// data to prune it during fast drags without a store round trip.
struct TrackedLabel<H> {
    handle: H,
    x: f64,
    y: f64,
    importance: u32,
}

struct ResolveTask {
    handle: tokio::task::JoinHandle<Result<TxOutcome<VisibilityDelta>>>,
    cancel: crate::txn::CancelHandle,
}

/// The visibility orchestrator.
pub struct VisibilityEngine<S: RenderSink> {
    config: EngineConfig,
    store: Arc<EntityStore>,
    sink: S,
    labels: HashMap<EntityId, TrackedLabel<S::Handle>>,
    viewport_rx: mpsc::UnboundedReceiver<ViewportState>,
    events: mpsc::UnboundedSender<EngineEvent>,
    ready: bool,
    /// Latest viewport of the current burst, waiting for quiescence
    pending: Option<ViewportState>,
    /// Trailing-edge debounce deadline
    deadline: Option<Instant>,
    in_flight: Option<ResolveTask>,
}

impl<S: RenderSink> VisibilityEngine<S> {
    /// Create an engine over the given store and rendering sink.
    ///
    /// Returns the engine (drive it with [`VisibilityEngine::run`]), the
    /// handle for the viewport source, and the event channel.
    pub fn new(
        config: EngineConfig,
        store: Arc<EntityStore>,
        sink: S,
    ) -> (Self, EngineHandle, mpsc::UnboundedReceiver<EngineEvent>) {
        let (viewport_tx, viewport_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let engine = Self {
            config,
            store,
            sink,
            labels: HashMap::new(),
            viewport_rx,
            events,
            ready: false,
            pending: None,
            deadline: None,
            in_flight: None,
        };
        (engine, EngineHandle { viewport_tx }, event_rx)
    }

    /// Reset the store and bulk-load the layout feed's output.
    ///
    /// Fatal on failure: the engine stays unready and the error is returned
    /// to the caller. On success a one-time [`EngineEvent::StoreReady`] is
    /// emitted and viewport events start being accepted.
    pub fn initialize(&mut self, entities: Vec<Entity>, edges: Vec<Edge>) -> Result<()> {
        self.store.reset();
        self.store.bulk_load(entities, edges)?;
        self.ready = true;
        let _ = self.events.send(EngineEvent::StoreReady);
        Ok(())
    }

    /// Shared store, for callers that feed incremental layout refreshes.
    pub fn store(&self) -> Arc<EntityStore> {
        Arc::clone(&self.store)
    }

    /// Drive the engine until every [`EngineHandle`] is dropped.
    pub async fn run(mut self) {
        loop {
            let debouncing = self.deadline.is_some();
            let resolving = self.in_flight.is_some();
            let deadline = self.deadline.unwrap_or_else(Instant::now);

            tokio::select! {
                event = self.viewport_rx.recv() => match event {
                    Some(viewport) => self.on_viewport(viewport).await,
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline), if debouncing => {
                    self.deadline = None;
                    if let Some(viewport) = self.pending.take() {
                        self.start_resolution(viewport);
                    }
                }
                joined = join_resolution(&mut self.in_flight), if resolving => {
                    self.in_flight = None;
                    self.finish_resolution(joined);
                }
            }
        }

        if let Some(task) = self.in_flight.take() {
            task.cancel.cancel();
        }
    }

    /// Handle one settled-viewport notification: prune labels that left the
    /// rect right away, then restart the debounce window.
    ///
    /// Events with non-finite geometry are dropped before anything is
    /// touched, so a garbage viewport never disturbs committed state.
    async fn on_viewport(&mut self, viewport: ViewportState) {
        if !self.ready {
            tracing::trace!("viewport event before store ready, dropped");
            return;
        }
        if !viewport.is_finite() {
            tracing::warn!(?viewport, "non-finite viewport event dropped");
            return;
        }
        self.prune_offscreen(&viewport).await;
        self.pending = Some(viewport);
        self.deadline = Some(Instant::now() + self.config.debounce_window);
    }

    /// Drop tracked labels that fell outside the hit rect or below the
    /// current threshold. Runs on every viewport event, not just debounced
    /// resolutions, so fast continuous drags never accumulate a backlog of
    /// off-screen labels.
    async fn prune_offscreen(&mut self, viewport: &ViewportState) {
        let threshold = threshold_for(viewport.scale, &self.config.tiers);
        let doomed: Vec<EntityId> = self
            .labels
            .iter()
            .filter(|(_, label)| {
                let qualifies = rect_contains(&viewport.hit_rect, label.x, label.y)
                    && match threshold {
                        Threshold::NoRender => false,
                        Threshold::AtLeast(min) => label.importance >= min,
                    };
                !qualifies
            })
            .map(|(id, _)| id.clone())
            .collect();
        if doomed.is_empty() {
            return;
        }

        for id in &doomed {
            if let Some(label) = self.labels.remove(id) {
                self.sink.remove_label(label.handle);
            }
        }
        let (txn, _cancel) = Txn::begin();
        if let Err(interrupt) = self.store.remove_from_visible(&txn, &doomed).await {
            tracing::warn!(?interrupt, "drag-prune write skipped");
        }
        tracing::trace!(pruned = doomed.len(), "off-screen labels removed");
    }

    /// Cancel any stale in-flight transaction and spawn a resolution for
    /// the settled viewport.
    fn start_resolution(&mut self, viewport: ViewportState) {
        if let Some(stale) = self.in_flight.take() {
            // Last viewport change wins, regardless of completion order.
            stale.cancel.cancel();
        }
        let _ = self.events.send(EngineEvent::VisibilityStart);

        let (txn, cancel) = Txn::begin();
        let store = Arc::clone(&self.store);
        let threshold = threshold_for(viewport.scale, &self.config.tiers);
        let handle = tokio::spawn(async move {
            resolver::resolve(&store, &txn, viewport.hit_rect, threshold).await
        });
        self.in_flight = Some(ResolveTask { handle, cancel });
    }

    /// Commit a finished resolution into sink state, or absorb its
    /// cancellation/failure.
    fn finish_resolution(&mut self, joined: Result<TxOutcome<VisibilityDelta>>) {
        match joined {
            Ok(TxOutcome::Committed(delta)) => {
                for id in &delta.disappearing {
                    if let Some(label) = self.labels.remove(id) {
                        self.sink.remove_label(label.handle);
                    }
                }
                for entity in &delta.appearing {
                    // Untitled entities count as visible but get no label.
                    if entity.title.is_none() {
                        continue;
                    }
                    let handle = self.sink.show_label(entity);
                    self.labels.insert(
                        entity.id.clone(),
                        TrackedLabel {
                            handle,
                            x: entity.x,
                            y: entity.y,
                            importance: entity.importance,
                        },
                    );
                }
                let _ = self.events.send(EngineEvent::VisibilityDone {
                    appeared: delta.appearing,
                });
            }
            Ok(TxOutcome::Cancelled) => {
                // Superseded by a fresher viewport; nothing to apply.
            }
            Err(err) => {
                // Skip the cycle; the next viewport event retries with
                // fresh inputs.
                tracing::warn!(error = %err, "visibility resolution failed");
                let _ = self.events.send(EngineEvent::Error(err));
            }
        }
    }
}

/// Await the in-flight resolution, if any. Pending forever when idle so the
/// select branch stays quiet; the branch precondition keeps it disabled in
/// that case anyway.
async fn join_resolution(
    slot: &mut Option<ResolveTask>,
) -> Result<TxOutcome<VisibilityDelta>> {
    match slot {
        Some(task) => match (&mut task.handle).await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(StoreError::QueryFailed {
                reason: format!("resolver task aborted: {join_err}"),
            }),
        },
        None => std::future::pending().await,
    }
}
