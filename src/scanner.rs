//! Discovery of pending work: which objects currently sit in a stage's inbox.

use std::pin::pin;

use futures::future::ready;
use futures::{Stream, TryStreamExt};
use tracing::warn;

use crate::object::ObjectId;
use crate::state_machine::{Pipeline, Stage};
use crate::store::{BlobStore, EntryKind, StoreError, list_prefix, walk_prefix};

/// Lazily yields every identity with a marker in `stage`'s namespace.
///
/// Order is the store's listing order. Keys that do not map back to an
/// identity are logged and skipped. Each call starts a fresh listing.
pub fn scan_stage<'a, S: BlobStore>(
    pipeline: &'a Pipeline<S>,
    stage: Stage,
) -> impl Stream<Item = Result<ObjectId, StoreError>> + 'a {
    let layout = pipeline.layout();
    walk_prefix(
        pipeline.store(),
        layout.container(),
        layout.stage_prefix(stage),
    )
    .try_filter_map(move |entry| {
        let id = layout.identity_from_marker_key(stage, &entry.key);
        if id.is_none() {
            warn!(%stage, key = %entry.key, "ignoring malformed marker");
        }
        ready(Ok(id))
    })
}

/// Marker counts for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSummary {
    pub stage: Stage,
    /// `(container, markers)` in listing order.
    pub containers: Vec<(String, usize)>,
    /// Objects directly under the stage namespace, without a container.
    pub stray: usize,
}

impl StageSummary {
    pub fn total(&self) -> usize {
        self.containers.iter().map(|(_, n)| n).sum::<usize>() + self.stray
    }
}

/// Counts the markers in `stage`, broken down by source container.
pub async fn summarize_stage<S: BlobStore>(
    pipeline: &Pipeline<S>,
    stage: Stage,
) -> Result<StageSummary, StoreError> {
    let store = pipeline.store();
    let namespace = pipeline.layout().container();
    let stage_prefix = pipeline.layout().stage_prefix(stage);

    let mut summary = StageSummary {
        stage,
        containers: Vec::new(),
        stray: 0,
    };

    let mut children = pin!(list_prefix(store, namespace, stage_prefix.as_str()));
    while let Some(entry) = children.try_next().await? {
        match entry.kind {
            EntryKind::Object => summary.stray += 1,
            EntryKind::Prefix => {
                let count = walk_prefix(store, namespace, entry.key.as_str())
                    .try_fold(0usize, |n, _| ready(Ok(n + 1)))
                    .await?;
                let container = entry.key[stage_prefix.len()..]
                    .trim_end_matches('/')
                    .to_string();
                summary.containers.push((container, count));
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::Layout;
    use crate::store::memory::MemoryStore;

    fn pipeline(store: &MemoryStore) -> Pipeline<&MemoryStore> {
        Pipeline::new(store, Layout::new("attic"))
    }

    #[tokio::test]
    async fn scan_maps_markers_to_identities() {
        let store = MemoryStore::with_page_size(2);
        store.put("attic", "steps/restore/b1/a/one", b"");
        store.put("attic", "steps/restore/b1/c", b"");
        store.put("attic", "steps/restore/b2/deep/er/d", b"");
        store.put("attic", "steps/archive/b1/x", b"1");
        store.put("b1", "steps/restore/b1/not-the-namespace", b"");
        let pipeline = pipeline(&store);

        let ids: Vec<ObjectId> = scan_stage(&pipeline, Stage::Restore)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            ids,
            vec![
                ObjectId::new("b1", "a/one"),
                ObjectId::new("b1", "c"),
                ObjectId::new("b2", "deep/er/d"),
            ]
        );
    }

    #[tokio::test]
    async fn scan_skips_malformed_keys() {
        let store = MemoryStore::new();
        store.put("attic", "steps/purge/stray", b"");
        store.put("attic", "steps/purge/b1/ok", b"");
        let pipeline = pipeline(&store);

        let ids: Vec<ObjectId> = scan_stage(&pipeline, Stage::Purge)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ids, vec![ObjectId::new("b1", "ok")]);
    }

    #[tokio::test]
    async fn scan_of_empty_stage_is_empty() {
        let store = MemoryStore::new();
        let pipeline = pipeline(&store);
        let ids: Vec<ObjectId> = scan_stage(&pipeline, Stage::Archive)
            .try_collect()
            .await
            .unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn summary_counts_per_container() {
        let store = MemoryStore::with_page_size(1);
        store.put("attic", "steps/archive/b1/x", b"1");
        store.put("attic", "steps/archive/b1/y/z", b"1");
        store.put("attic", "steps/archive/b2/w", b"1");
        store.put("attic", "steps/archive/stray", b"1");
        store.put("attic", "steps/restore/b1/q", b"");
        let pipeline = pipeline(&store);

        let summary = summarize_stage(&pipeline, Stage::Archive).await.unwrap();
        assert_eq!(
            summary.containers,
            vec![("b1".to_string(), 2), ("b2".to_string(), 1)]
        );
        assert_eq!(summary.stray, 1);
        assert_eq!(summary.total(), 4);
    }
}
