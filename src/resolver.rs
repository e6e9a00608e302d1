//! Visibility resolution: which entities qualify for one viewport state
//!
//! One resolution answers three questions against the previous committed
//! state: which entities are now visible, which of those are newly
//! appearing, and which previously-visible entities must disappear. Only
//! the appearing subset is hydrated to full rows, bounding per-cycle I/O to
//! the delta rather than the total visible count.

use crate::entity::{Entity, EntityId};
use crate::lod::Threshold;
use crate::store::{Dim, EntityStore, IdSelection};
use crate::txn::{TxOutcome, Txn, TxnResult};
use crate::Result;
use geo::Rect;
use std::collections::HashSet;

/// Outcome of a committed visibility resolution.
#[derive(Clone, Debug, Default)]
pub struct VisibilityDelta {
    /// Every entity id judged visible for the resolved viewport
    pub now_visible: Vec<EntityId>,
    /// Hydrated rows for ids that were not visible before
    pub appearing: Vec<Entity>,
    /// Previously-visible ids that no longer qualify
    pub disappearing: Vec<EntityId>,
}

/// Resolve visibility for one viewport state inside a cancellable
/// transaction and commit the new visible set.
///
/// Cancelled runs resolve to [`TxOutcome::Cancelled`] with no observable
/// writes; store failures surface as errors and leave the previous visible
/// set untouched.
pub async fn resolve(
    store: &EntityStore,
    txn: &Txn,
    hit_rect: Rect<f64>,
    threshold: Threshold,
) -> Result<TxOutcome<VisibilityDelta>> {
    Txn::conclude(resolve_inner(store, txn, hit_rect, threshold).await)
}

async fn resolve_inner(
    store: &EntityStore,
    txn: &Txn,
    hit_rect: Rect<f64>,
    threshold: Threshold,
) -> TxnResult<VisibilityDelta> {
    let previous = store.visible_snapshot(txn).await?;

    // Invalid scale: nothing renders, everything previously visible goes.
    let Threshold::AtLeast(min_importance) = threshold else {
        let disappearing: Vec<EntityId> = previous.into_iter().collect();
        store.replace_visible_set(txn, Vec::new()).await?;
        return Ok(VisibilityDelta {
            disappearing,
            ..VisibilityDelta::default()
        });
    };

    let (xs, ys, importance_sel) = tokio::join!(
        store.ids_within(txn, Dim::X, hit_rect.min().x, hit_rect.max().x),
        store.ids_within(txn, Dim::Y, hit_rect.min().y, hit_rect.max().y),
        store.ids_with_importance_at_least(txn, min_importance),
    );
    let now_visible = intersect_candidates(xs?, ys?, importance_sel?);

    let appearing_ids: Vec<EntityId> = now_visible
        .iter()
        .filter(|id| !previous.contains(*id))
        .cloned()
        .collect();
    let disappearing: Vec<EntityId> = {
        let now: HashSet<&str> = now_visible.iter().map(String::as_str).collect();
        previous
            .iter()
            .filter(|id| !now.contains(id.as_str()))
            .cloned()
            .collect()
    };

    // Hydrate only the delta, never the full visible set.
    let appearing = store.fetch(txn, &appearing_ids).await?;
    store.replace_visible_set(txn, now_visible.clone()).await?;

    tracing::debug!(
        visible = now_visible.len(),
        appearing = appearing.len(),
        disappearing = disappearing.len(),
        "visibility resolved"
    );

    Ok(VisibilityDelta {
        now_visible,
        appearing,
        disappearing,
    })
}

/// Intersect the three query results, starting from the smallest array.
///
/// The match-everything selection costs nothing: only the two real arrays
/// are intersected. Otherwise the two larger arrays become hash sets and
/// the smallest is iterated, so the worst case is bounded by the smallest
/// result size rather than total entity count.
fn intersect_candidates(
    xs: Vec<EntityId>,
    ys: Vec<EntityId>,
    importance_sel: IdSelection,
) -> Vec<EntityId> {
    profiling::scope!("intersect_candidates");

    match importance_sel {
        IdSelection::All => {
            let (mut smaller, larger) = if xs.len() <= ys.len() { (xs, ys) } else { (ys, xs) };
            let larger_set: HashSet<&str> = larger.iter().map(String::as_str).collect();
            smaller.retain(|id| larger_set.contains(id.as_str()));
            smaller
        }
        IdSelection::Ids(by_importance) => {
            let mut arrays = [xs, ys, by_importance];
            arrays.sort_by_key(Vec::len);
            let [mut smallest, mid, largest] = arrays;
            let mid_set: HashSet<&str> = mid.iter().map(String::as_str).collect();
            let largest_set: HashSet<&str> = largest.iter().map(String::as_str).collect();
            smallest
                .retain(|id| mid_set.contains(id.as_str()) && largest_set.contains(id.as_str()));
            smallest
        }
    }
}
