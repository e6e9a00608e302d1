//! Indexed entity store: multi-dimension range queries and the visible set
//!
//! The store keeps one primary table of entities plus sorted secondary
//! indexes per queryable dimension (x, y, importance), substituting sorted
//! vectors with binary search for the browser-style indexed storage the
//! engine replaces. A separate table tracks the currently-visible id set.
//!
//! Range queries return ids only, keeping intermediate results cheap; full
//! rows are hydrated with [`EntityStore::fetch`] for the small "appearing"
//! subset. All queries and every visible-set write run inside a cancellable
//! transaction ([`Txn`]): writes re-check the cancel flag under the write
//! lock, so a cancelled transaction is never observable.

use crate::entity::{Edge, Entity, EntityId};
use crate::txn::{Txn, TxnResult};
use crate::{Result, StoreError};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::PoisonError;
use std::sync::RwLock;

/// Queryable spatial dimension of the entity table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dim {
    /// World-space x coordinate
    X,
    /// World-space y coordinate
    Y,
}

/// Result of an importance query.
///
/// `All` is the typed form of the original's match-everything sentinel: a
/// threshold of 0 matches every entity, so enumerating ids would be a
/// useless full scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdSelection {
    /// Every entity matches; no id list was materialized.
    All,
    /// The ids that matched the query.
    Ids(Vec<EntityId>),
}

/// Mutable tables behind the store's lock.
#[derive(Debug, Default)]
struct Tables {
    entities: HashMap<EntityId, Entity>,
    edges: Vec<Edge>,
    /// Sorted by coordinate; rebuilt on load/refresh
    by_x: Vec<(f64, EntityId)>,
    by_y: Vec<(f64, EntityId)>,
    /// Sorted by importance ascending
    by_importance: Vec<(u32, EntityId)>,
    visible: HashSet<EntityId>,
}

/// Indexed, queryable table of positioned entities and the visible-id set.
#[derive(Debug, Default)]
pub struct EntityStore {
    tables: RwLock<Tables>,
}

impl EntityStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all entities, edges, indexes, and the visible set.
    pub fn reset(&self) {
        let mut tables = self.write();
        *tables = Tables::default();
    }

    /// Insert all rows delivered by the layout feed and rebuild the
    /// secondary indexes.
    ///
    /// Rejects duplicate ids, dangling edge endpoints, and non-finite
    /// coordinates with [`StoreError::LoadFailed`]; a partial batch is
    /// never left behind.
    pub fn bulk_load(&self, entities: Vec<Entity>, edges: Vec<Edge>) -> Result<()> {
        profiling::scope!("bulk_load");

        for entity in &entities {
            if !entity.x.is_finite() || !entity.y.is_finite() {
                return Err(StoreError::LoadFailed {
                    reason: format!("entity {} has non-finite coordinates", entity.id),
                });
            }
        }

        let mut tables = self.write();
        let mut incoming: HashMap<EntityId, Entity> = HashMap::with_capacity(entities.len());
        for entity in entities {
            if tables.entities.contains_key(&entity.id)
                || incoming.insert(entity.id.clone(), entity).is_some()
            {
                return Err(StoreError::LoadFailed {
                    reason: "duplicate entity id in bulk load".to_string(),
                });
            }
        }
        for edge in &edges {
            let known = |id: &EntityId| tables.entities.contains_key(id) || incoming.contains_key(id);
            if !known(&edge.source) || !known(&edge.target) {
                return Err(StoreError::LoadFailed {
                    reason: format!("edge {} -> {} references an unknown entity", edge.source, edge.target),
                });
            }
        }

        tables.entities.extend(incoming);
        tables.edges.extend(edges);
        rebuild_indexes(&mut tables);

        tracing::debug!(
            entities = tables.entities.len(),
            edges = tables.edges.len(),
            "bulk load complete"
        );
        Ok(())
    }

    /// Refresh coordinates and importance of already-stored entities after
    /// a re-layout. Unknown ids are skipped with a warning; rows are
    /// otherwise immutable.
    pub fn refresh_layout(&self, entities: Vec<Entity>) -> Result<()> {
        profiling::scope!("refresh_layout");

        for entity in &entities {
            if !entity.x.is_finite() || !entity.y.is_finite() {
                return Err(StoreError::LoadFailed {
                    reason: format!("entity {} has non-finite coordinates", entity.id),
                });
            }
        }

        let mut tables = self.write();
        for refreshed in entities {
            match tables.entities.get_mut(&refreshed.id) {
                Some(row) => {
                    row.x = refreshed.x;
                    row.y = refreshed.y;
                    row.importance = refreshed.importance;
                }
                None => {
                    tracing::warn!(id = %refreshed.id, "refresh for unknown entity, skipping");
                }
            }
        }
        rebuild_indexes(&mut tables);
        Ok(())
    }

    /// Inclusive range query over one spatial dimension, returning ids only.
    pub async fn ids_within(
        &self,
        txn: &Txn,
        dim: Dim,
        lo: f64,
        hi: f64,
    ) -> TxnResult<Vec<EntityId>> {
        txn.suspend().await?;
        if !lo.is_finite() || !hi.is_finite() {
            return Err(StoreError::QueryFailed {
                reason: format!("non-finite range bounds [{lo}, {hi}]"),
            }
            .into());
        }

        if hi < lo {
            return Ok(Vec::new());
        }

        let tables = self.read();
        let index = match dim {
            Dim::X => &tables.by_x,
            Dim::Y => &tables.by_y,
        };
        let start = index.partition_point(|(key, _)| *key < lo);
        let end = index.partition_point(|(key, _)| *key <= hi);
        Ok(index[start..end].iter().map(|(_, id)| id.clone()).collect())
    }

    /// Ids of entities with `importance >= threshold`.
    ///
    /// A threshold of 0 matches everything, so the match-everything
    /// selection is returned instead of paying for a full scan.
    pub async fn ids_with_importance_at_least(
        &self,
        txn: &Txn,
        threshold: u32,
    ) -> TxnResult<IdSelection> {
        txn.suspend().await?;
        if threshold == 0 {
            return Ok(IdSelection::All);
        }

        let tables = self.read();
        let start = tables
            .by_importance
            .partition_point(|(importance, _)| *importance < threshold);
        Ok(IdSelection::Ids(
            tables.by_importance[start..]
                .iter()
                .map(|(_, id)| id.clone())
                .collect(),
        ))
    }

    /// Batch-hydrate full rows, preserving the order of `ids`. Intended
    /// only for the small "appearing" subset of a resolution.
    pub async fn fetch(&self, txn: &Txn, ids: &[EntityId]) -> TxnResult<Vec<Entity>> {
        txn.suspend().await?;
        let tables = self.read();
        ids.iter()
            .map(|id| {
                tables
                    .entities
                    .get(id)
                    .cloned()
                    .ok_or_else(|| StoreError::MissingEntity { id: id.clone() }.into())
            })
            .collect()
    }

    /// Snapshot of the persisted visible-id set.
    pub async fn visible_snapshot(&self, txn: &Txn) -> TxnResult<HashSet<EntityId>> {
        txn.suspend().await?;
        Ok(self.read().visible.clone())
    }

    /// Replace the visible set wholesale. Refused if the transaction was
    /// cancelled; the re-check happens under the write lock so a stale
    /// transaction can never overwrite a newer set.
    pub async fn replace_visible_set(&self, txn: &Txn, ids: Vec<EntityId>) -> TxnResult<()> {
        txn.suspend().await?;
        let mut tables = self.write();
        txn.checkpoint()?;
        tables.visible = ids.into_iter().collect();
        Ok(())
    }

    /// Remove ids from the visible set (drag-prune path).
    pub async fn remove_from_visible(&self, txn: &Txn, ids: &[EntityId]) -> TxnResult<()> {
        txn.suspend().await?;
        let mut tables = self.write();
        txn.checkpoint()?;
        for id in ids {
            tables.visible.remove(id);
        }
        Ok(())
    }

    /// Number of stored entities.
    pub fn entity_count(&self) -> usize {
        self.read().entities.len()
    }

    /// Number of stored edges.
    pub fn edge_count(&self) -> usize {
        self.read().edges.len()
    }

    /// Whether the store holds no entities.
    pub fn is_empty(&self) -> bool {
        self.read().entities.is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Rebuild the sorted secondary indexes from the primary table.
fn rebuild_indexes(tables: &mut Tables) {
    profiling::scope!("rebuild_indexes");

    let mut by_x: Vec<(f64, EntityId)> = tables
        .entities
        .values()
        .map(|e| (e.x, e.id.clone()))
        .collect();
    let mut by_y: Vec<(f64, EntityId)> = tables
        .entities
        .values()
        .map(|e| (e.y, e.id.clone()))
        .collect();
    let mut by_importance: Vec<(u32, EntityId)> = tables
        .entities
        .values()
        .map(|e| (e.importance, e.id.clone()))
        .collect();

    by_x.par_sort_unstable_by(|(a, _), (b, _)| a.total_cmp(b));
    by_y.par_sort_unstable_by(|(a, _), (b, _)| a.total_cmp(b));
    by_importance.par_sort_unstable_by_key(|(importance, _)| *importance);

    tables.by_x = by_x;
    tables.by_y = by_y;
    tables.by_importance = by_importance;
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Coord;

    fn load_entities(store: &EntityStore, entities: Vec<Entity>) {
        store.bulk_load(entities, Vec::new()).unwrap();
    }

    fn sample_entities() -> Vec<Entity> {
        vec![
            Entity::new("a", 0.0, 0.0),
            Entity::new("b", 5.0, 5.0).with_importance(25),
            Entity::new("c", 100.0, 100.0).with_importance(25),
            Entity::new("d", -3.0, 7.0).with_importance(10),
        ]
    }

    #[test]
    fn test_bulk_load_and_counts() {
        let store = EntityStore::new();
        let edges = vec![Edge {
            source: "a".to_string(),
            target: "b".to_string(),
            source_pos: Coord { x: 0.0, y: 0.0 },
            target_pos: Coord { x: 5.0, y: 5.0 },
        }];
        store.bulk_load(sample_entities(), edges).unwrap();
        assert_eq!(store.entity_count(), 4);
        assert_eq!(store.edge_count(), 1);
        assert!(!store.is_empty());
    }

    #[test]
    fn test_bulk_load_rejects_duplicates() {
        let store = EntityStore::new();
        let result = store.bulk_load(
            vec![Entity::new("a", 0.0, 0.0), Entity::new("a", 1.0, 1.0)],
            Vec::new(),
        );
        assert!(matches!(result, Err(StoreError::LoadFailed { .. })));
        // Nothing was applied
        assert!(store.is_empty());
    }

    #[test]
    fn test_bulk_load_rejects_non_finite_coords() {
        let store = EntityStore::new();
        let result = store.bulk_load(vec![Entity::new("a", f64::NAN, 0.0)], Vec::new());
        assert!(matches!(result, Err(StoreError::LoadFailed { .. })));
    }

    #[test]
    fn test_bulk_load_rejects_dangling_edges() {
        let store = EntityStore::new();
        let result = store.bulk_load(
            vec![Entity::new("a", 0.0, 0.0)],
            vec![Edge {
                source: "a".to_string(),
                target: "ghost".to_string(),
                source_pos: Coord { x: 0.0, y: 0.0 },
                target_pos: Coord { x: 1.0, y: 1.0 },
            }],
        );
        assert!(matches!(result, Err(StoreError::LoadFailed { .. })));
    }

    #[tokio::test]
    async fn test_range_query_is_inclusive() {
        let store = EntityStore::new();
        load_entities(&store, sample_entities());
        let (txn, _cancel) = Txn::begin();

        let mut ids = store.ids_within(&txn, Dim::X, 0.0, 5.0).await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        let ids = store.ids_within(&txn, Dim::Y, 6.0, 8.0).await.unwrap();
        assert_eq!(ids, vec!["d".to_string()]);

        // Empty range yields empty results, not an error
        let ids = store.ids_within(&txn, Dim::X, 50.0, 40.0).await.unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_range_query_rejects_non_finite_bounds() {
        let store = EntityStore::new();
        load_entities(&store, sample_entities());
        let (txn, _cancel) = Txn::begin();
        let result = store.ids_within(&txn, Dim::X, f64::NAN, 1.0).await;
        assert!(matches!(
            result,
            Err(crate::txn::TxnInterrupt::Failed(
                StoreError::QueryFailed { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_importance_query_and_all_sentinel() {
        let store = EntityStore::new();
        load_entities(&store, sample_entities());
        let (txn, _cancel) = Txn::begin();

        match store.ids_with_importance_at_least(&txn, 20).await.unwrap() {
            IdSelection::Ids(mut ids) => {
                ids.sort();
                assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
            }
            IdSelection::All => panic!("threshold 20 must enumerate ids"),
        }

        // Threshold 0 skips the scan entirely
        assert_eq!(
            store.ids_with_importance_at_least(&txn, 0).await.unwrap(),
            IdSelection::All
        );
    }

    #[tokio::test]
    async fn test_fetch_preserves_order_and_detects_missing() {
        let store = EntityStore::new();
        load_entities(&store, sample_entities());
        let (txn, _cancel) = Txn::begin();

        let rows = store
            .fetch(&txn, &["b".to_string(), "a".to_string()])
            .await
            .unwrap();
        assert_eq!(rows[0].id, "b");
        assert_eq!(rows[1].id, "a");

        let missing = store.fetch(&txn, &["ghost".to_string()]).await;
        assert!(matches!(
            missing,
            Err(crate::txn::TxnInterrupt::Failed(
                StoreError::MissingEntity { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_visible_set_roundtrip() {
        let store = EntityStore::new();
        load_entities(&store, sample_entities());
        let (txn, _cancel) = Txn::begin();

        assert!(store.visible_snapshot(&txn).await.unwrap().is_empty());

        store
            .replace_visible_set(&txn, vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let snapshot = store.visible_snapshot(&txn).await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains("a"));

        store
            .remove_from_visible(&txn, &["a".to_string()])
            .await
            .unwrap();
        let snapshot = store.visible_snapshot(&txn).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains("b"));
    }

    #[tokio::test]
    async fn test_cancelled_write_is_not_observable() {
        let store = EntityStore::new();
        load_entities(&store, sample_entities());

        let (txn, _keep) = Txn::begin();
        store
            .replace_visible_set(&txn, vec!["a".to_string()])
            .await
            .unwrap();

        let (doomed, cancel) = Txn::begin();
        cancel.cancel();
        let result = store
            .replace_visible_set(&doomed, vec!["c".to_string()])
            .await;
        assert!(matches!(
            result,
            Err(crate::txn::TxnInterrupt::Cancelled)
        ));

        // The committed set from the first transaction is untouched
        let (probe, _cancel) = Txn::begin();
        let snapshot = store.visible_snapshot(&probe).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains("a"));
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let store = EntityStore::new();
        load_entities(&store, sample_entities());
        let (txn, _cancel) = Txn::begin();
        store
            .replace_visible_set(&txn, vec!["a".to_string()])
            .await
            .unwrap();

        store.reset();
        assert!(store.is_empty());
        assert_eq!(store.edge_count(), 0);
        let (probe, _cancel) = Txn::begin();
        assert!(store.visible_snapshot(&probe).await.unwrap().is_empty());
        assert!(
            store
                .ids_within(&probe, Dim::X, f64::MIN, f64::MAX)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_refresh_layout_updates_indexes() {
        let store = EntityStore::new();
        load_entities(&store, sample_entities());

        store
            .refresh_layout(vec![
                Entity::new("a", 200.0, 200.0).with_importance(50),
                Entity::new("ghost", 1.0, 1.0),
            ])
            .unwrap();

        let (txn, _cancel) = Txn::begin();
        let ids = store.ids_within(&txn, Dim::X, 150.0, 250.0).await.unwrap();
        assert_eq!(ids, vec!["a".to_string()]);
        match store.ids_with_importance_at_least(&txn, 30).await.unwrap() {
            IdSelection::Ids(ids) => assert_eq!(ids, vec!["a".to_string()]),
            IdSelection::All => panic!("threshold 30 must enumerate ids"),
        }
        // Ghost was skipped, not inserted
        assert_eq!(store.entity_count(), 4);
    }
}
