//! In-process claim leases.
//!
//! The database lock taken while claiming is released when the claim
//! transaction commits, long before the completion for that row returns.
//! The registry keeps a claimed row exclusive to one worker of this process
//! until its result is written or abandoned.

use dashmap::DashSet;
use std::sync::Arc;

use crate::errors::DataforgeResult;
use crate::store::{ClaimedRow, RowKey, RowStore};

use super::spec::StageDescriptor;

/// Row keys currently leased by workers of this process, per stage.
#[derive(Debug, Clone, Default)]
pub struct ClaimRegistry {
    leased: Arc<DashSet<(String, RowKey)>>,
}

impl ClaimRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Leases `key` for `stage`. Returns `None` if it is already leased.
    #[must_use]
    pub fn try_lease(&self, stage: &str, key: RowKey) -> Option<ClaimLease> {
        let entry = (stage.to_string(), key);
        if self.leased.insert(entry.clone()) {
            Some(ClaimLease {
                registry: self.clone(),
                entry,
            })
        } else {
            None
        }
    }

    /// Returns true if `key` is leased for `stage`.
    #[must_use]
    pub fn is_leased(&self, stage: &str, key: RowKey) -> bool {
        self.leased.contains(&(stage.to_string(), key))
    }

    /// Keys leased for `stage`.
    #[must_use]
    pub fn leased_keys(&self, stage: &str) -> Vec<RowKey> {
        self.leased
            .iter()
            .filter(|e| e.0 == stage)
            .map(|e| e.1)
            .collect()
    }

    /// Number of active leases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.leased.len()
    }

    /// Returns true if nothing is leased.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leased.is_empty()
    }
}

/// Exclusive hold on one row for one stage. Released on drop.
#[derive(Debug)]
pub struct ClaimLease {
    registry: ClaimRegistry,
    entry: (String, RowKey),
}

impl ClaimLease {
    /// The leased row key.
    #[must_use]
    pub fn key(&self) -> RowKey {
        self.entry.1
    }
}

impl Drop for ClaimLease {
    fn drop(&mut self) {
        self.registry.leased.remove(&self.entry);
    }
}

/// Claims the next pending row for `stage` and leases it.
///
/// Keys in `skip` (rows that already failed in this sweep) and keys leased
/// by other workers are excluded. If the store hands back a row another
/// worker leased in the meantime, the claim is repeated with that row
/// excluded.
pub async fn claim_row(
    store: &dyn RowStore,
    registry: &ClaimRegistry,
    table: &str,
    stage: &StageDescriptor,
    skip: &[RowKey],
) -> DataforgeResult<Option<(ClaimedRow, ClaimLease)>> {
    let mut exclude = skip.to_vec();
    exclude.extend(registry.leased_keys(stage.destination()));

    loop {
        let Some(row) = store.claim_next_unprocessed(table, stage, &exclude).await? else {
            return Ok(None);
        };
        if let Some(lease) = registry.try_lease(stage.destination(), row.key) {
            return Ok(Some((row, lease)));
        }
        tracing::debug!(row = row.key, stage = %stage.destination(), "Row already leased, skipping");
        exclude.push(row.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRowStore;
    use std::collections::BTreeSet;

    fn stage() -> StageDescriptor {
        "chunk:summary".parse().unwrap()
    }

    #[test]
    fn test_lease_is_exclusive_and_released_on_drop() {
        let registry = ClaimRegistry::new();
        let lease = registry.try_lease("summary", 7).unwrap();
        assert_eq!(lease.key(), 7);
        assert!(registry.try_lease("summary", 7).is_none());
        assert!(registry.try_lease("analysis", 7).is_some());

        drop(lease);
        assert!(!registry.is_leased("summary", 7));
        assert!(registry.try_lease("summary", 7).is_some());
    }

    #[tokio::test]
    async fn test_claim_row_skips_leased_rows() {
        let store = InMemoryRowStore::new();
        store.add_table("docs", &["chunk", "summary"]);
        for key in 1..=3 {
            store.insert_row("docs", key, &[("chunk", Some("text"))]);
        }
        let registry = ClaimRegistry::new();

        let (first, _l1) = claim_row(&store, &registry, "docs", &stage(), &[])
            .await
            .unwrap()
            .unwrap();
        let (second, _l2) = claim_row(&store, &registry, "docs", &stage(), &[3])
            .await
            .unwrap()
            .unwrap();
        assert_eq!((first.key, second.key), (1, 2));

        let none = claim_row(&store, &registry, "docs", &stage(), &[3])
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claimers_get_disjoint_rows() {
        let store = Arc::new(InMemoryRowStore::new());
        store.add_table("docs", &["chunk", "summary"]);
        for key in 1..=40 {
            store.insert_row("docs", key, &[("chunk", Some("text"))]);
        }
        let registry = ClaimRegistry::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                let mut leases = Vec::new();
                while let Some((row, lease)) =
                    claim_row(store.as_ref(), &registry, "docs", &stage(), &[])
                        .await
                        .unwrap()
                {
                    mine.push(row.key);
                    leases.push(lease);
                    tokio::task::yield_now().await;
                }
                (mine, leases)
            }));
        }

        let mut seen = BTreeSet::new();
        let mut holders = Vec::new();
        for handle in handles {
            let (keys, leases) = handle.await.unwrap();
            for key in keys {
                assert!(seen.insert(key), "row {key} claimed twice");
            }
            holders.push(leases);
        }
        assert_eq!(seen, (1..=40).collect::<BTreeSet<_>>());
        assert_eq!(registry.len(), 40);

        drop(holders);
        assert!(registry.is_empty());
    }
}
