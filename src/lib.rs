//! Graph Label Engine - Spatial Visibility & Level-of-Detail for Large Graphs
//!
//! This library decides, as a user pans and zooms across a force-laid-out
//! graph with tens of thousands of nodes, which subset of entity labels to
//! display, without scanning the entire dataset on every frame. It combines
//! multi-dimensional range indexing, incremental set-diffing against the
//! previously visible set, and safe cancellation of superseded asynchronous
//! work under a cooperative (current-thread) scheduler.
//!
//! # Architecture
//!
//! - **[`EntityStore`]**: indexed, queryable table of positioned entities
//!   plus the persisted visible-id set
//! - **[`threshold_for`]**: pure LOD policy mapping zoom scale to a
//!   minimum-importance threshold
//! - **[`resolver::resolve`]**: computes the new visible set and its delta
//!   (appearing / disappearing) for one viewport state
//! - **[`Txn`]**: cancellable transaction discipline so a superseded
//!   viewport update can never corrupt state committed by a later one
//! - **[`VisibilityEngine`]**: debounces viewport bursts, wires the pieces
//!   together, and talks to the external rendering sink
//!
//! The engine does not compute layout positions and does not render pixels;
//! it only decides *which* entities qualify at a given viewport state.
//!
//! # Usage Example
//!
//! ```rust
//! use graph_label_engine::{
//!     Entity, EngineConfig, EntityStore, RenderSink, VisibilityEngine,
//! };
//! use std::sync::Arc;
//!
//! struct PrintSink;
//!
//! impl RenderSink for PrintSink {
//!     type Handle = String;
//!
//!     fn show_label(&mut self, entity: &Entity) -> String {
//!         entity.id.clone()
//!     }
//!
//!     fn remove_label(&mut self, _handle: String) {}
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(EntityStore::new());
//! let (mut engine, handle, _events) =
//!     VisibilityEngine::new(EngineConfig::default(), store, PrintSink);
//!
//! engine.initialize(
//!     vec![Entity::new("hub", 0.0, 0.0).with_title("Hub").with_importance(42)],
//!     Vec::new(),
//! )?;
//!
//! // Inside a tokio runtime: spawn `engine.run()`, then notify it of
//! // settled viewports.
//! // tokio::spawn(engine.run());
//! // handle.viewport_settled(0.5, hit_rect);
//! # let _ = handle;
//! # Ok(())
//! # }
//! ```
//!
//! # Performance Characteristics
//!
//! - **Load**: O(N log N) index build, parallelized with rayon
//! - **Resolve**: bounded by the smallest range-query result, not total
//!   entity count; hydration I/O bounded by the appearing delta
//! - **Memory**: O(N) rows + O(N) per sorted index

mod engine;
mod entity;
mod lod;
pub mod resolver;
mod store;
mod txn;

// Public API exports
pub use engine::{EngineConfig, EngineEvent, EngineHandle, RenderSink, VisibilityEngine};
pub use entity::{Edge, Entity, EntityId, ViewportState};
pub use lod::{LodTiers, Threshold, threshold_for};
pub use resolver::VisibilityDelta;
pub use store::{Dim, EntityStore, IdSelection};
pub use txn::{CancelHandle, TxOutcome, Txn, TxnInterrupt, TxnResult};

/// Error types for the engine
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Fatal at initialization; the engine cannot come up.
    ///
    /// The bundled in-memory store cannot fail to open; this variant is
    /// reserved for persistent storage backends.
    #[error("storage could not be opened: {reason}")]
    OpenFailed {
        /// Why the backing storage rejected the open
        reason: String,
    },

    /// Fatal at initialization; the delivered layout batch was rejected.
    #[error("bulk load rejected: {reason}")]
    LoadFailed {
        /// Why the batch was rejected
        reason: String,
    },

    /// Non-fatal: the current resolution cycle is skipped and retried on
    /// the next viewport event.
    #[error("query failed: {reason}")]
    QueryFailed {
        /// What went wrong while querying
        reason: String,
    },

    /// An id returned by an index had no row behind it.
    #[error("entity {id} missing during hydration")]
    MissingEntity {
        /// The id that could not be hydrated
        id: String,
    },
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, StoreError>;
