//! The three stage bodies, each run inside [`Pipeline::run_stage`].

use std::pin::pin;

use futures::TryStreamExt;
use tracing::{debug, info};

use crate::archiver::Archiver;
use crate::error::{PipelineError, StageBodyError};
use crate::object::ObjectId;
use crate::state_machine::{Pipeline, Stage, StagePaths};
use crate::store::{BlobPath, BlobStore, RestoreRequest, RestoreTier, walk_prefix};

/// Restored copies stay readable for this many days.
const RESTORE_DAYS: u32 = 30;
const RESTORE_TIER: RestoreTier = RestoreTier::Bulk;

pub struct Executor<S, A> {
    pipeline: Pipeline<S>,
    archiver: A,
    strip_prefix: String,
}

impl<S: BlobStore, A: Archiver> Executor<S, A> {
    pub fn new(pipeline: Pipeline<S>, archiver: A, strip_prefix: impl Into<String>) -> Self {
        Self {
            pipeline,
            archiver,
            strip_prefix: strip_prefix.into(),
        }
    }

    /// Runs `stage` for `id` and advances its marker on success.
    pub async fn run(&self, stage: Stage, id: &ObjectId) -> Result<StagePaths, PipelineError> {
        match stage {
            Stage::Restore => {
                self.pipeline
                    .run_stage(stage, id, |paths| self.restore(paths))
                    .await
            }
            Stage::Archive => {
                self.pipeline
                    .run_stage(stage, id, |paths| self.archive(paths))
                    .await
            }
            Stage::Purge => {
                self.pipeline
                    .run_stage(stage, id, |paths| self.purge(paths))
                    .await
            }
            Stage::Done => Err(PipelineError::TerminalStage(stage)),
        }
    }

    /// Requests a bulk restore for every cold object under the prefix.
    async fn restore(&self, paths: StagePaths) -> Result<(), StageBodyError> {
        let id = &paths.id;
        let store = self.pipeline.store();
        let request = RestoreRequest {
            days: RESTORE_DAYS,
            tier: RESTORE_TIER,
        };

        let mut requested = 0usize;
        let mut objects = pin!(walk_prefix(store, &id.container, id.source_prefix()));
        while let Some(entry) = objects.try_next().await? {
            let path = BlobPath::new(&id.container, entry.key);
            let metadata = store.head(&path).await?;
            if metadata.restore.is_some() {
                info!(path = %path, "restore already in progress, skipping");
                continue;
            }
            if !metadata.storage_class.is_cold() {
                debug!(path = %path, class = %metadata.storage_class, "not in a cold tier, skipping");
                continue;
            }
            info!(path = %path, days = request.days, tier = %request.tier, "requesting restore");
            store.restore(&path, &request).await?;
            requested += 1;
        }
        info!(object = %id.url(), requested, "restore requests issued");
        Ok(())
    }

    async fn archive(&self, paths: StagePaths) -> Result<(), StageBodyError> {
        self.archiver
            .archive(
                &paths.id.source_url(),
                &paths.manifest.to_string(),
                &paths.package.to_string(),
                &self.strip_prefix,
            )
            .await?;
        Ok(())
    }

    async fn purge(&self, paths: StagePaths) -> Result<(), StageBodyError> {
        self.archiver
            .purge(&paths.manifest.to_string(), &paths.package.to_string(), true)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archiver::ArchiveError;
    use crate::error::Precondition;
    use crate::state_machine::Layout;
    use crate::store::memory::MemoryStore;
    use crate::store::{ObjectMetadata, StorageClass};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeArchiver {
        calls: Mutex<Vec<Vec<String>>>,
        fail: bool,
    }

    impl FakeArchiver {
        fn record(&self, call: &[&str]) -> Result<(), ArchiveError> {
            self.calls
                .lock()
                .unwrap()
                .push(call.iter().map(|s| s.to_string()).collect());
            if self.fail {
                return Err(ArchiveError::Failed {
                    program: "fake".into(),
                    status: Some(2),
                    stderr: "boom".into(),
                });
            }
            Ok(())
        }
    }

    impl Archiver for FakeArchiver {
        async fn archive(
            &self,
            source_url: &str,
            manifest_url: &str,
            package_url: &str,
            strip_prefix: &str,
        ) -> Result<(), ArchiveError> {
            self.record(&["archive", source_url, manifest_url, package_url, strip_prefix])
        }

        async fn purge(
            &self,
            manifest_url: &str,
            package_url: &str,
            force_delete: bool,
        ) -> Result<(), ArchiveError> {
            let force = if force_delete { "force" } else { "no-force" };
            self.record(&["purge", manifest_url, package_url, force])
        }
    }

    fn executor<'a>(
        store: &'a MemoryStore,
        archiver: &'a FakeArchiver,
    ) -> Executor<&'a MemoryStore, &'a FakeArchiver> {
        Executor::new(
            Pipeline::new(store, Layout::new("attic")),
            archiver,
            "from_vendor/",
        )
    }

    fn cold() -> ObjectMetadata {
        ObjectMetadata {
            storage_class: StorageClass::DeepArchive,
            restore: None,
        }
    }

    #[tokio::test]
    async fn full_chain_then_restart_is_rejected() {
        let store = MemoryStore::new();
        let archiver = FakeArchiver::default();
        let id = ObjectId::new("bucket1", "path/to/obj");
        store.put("attic", "steps/restore/bucket1/path/to/obj", b"");
        let executor = executor(&store, &archiver);

        executor.run(Stage::Restore, &id).await.unwrap();
        assert!(!store.contains("attic", "steps/restore/bucket1/path/to/obj"));
        assert!(store.contains("attic", "steps/archive/bucket1/path/to/obj"));

        executor.run(Stage::Archive, &id).await.unwrap();
        assert!(store.contains("attic", "steps/purge/bucket1/path/to/obj"));

        executor.run(Stage::Purge, &id).await.unwrap();
        assert_eq!(
            store.keys("attic"),
            vec!["steps/done/bucket1/path/to/obj".to_string()]
        );

        let err = executor.run(Stage::Restore, &id).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Precondition(Precondition::MissingInbox(_))
        ));

        let calls = archiver.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            vec![
                "archive",
                "s3://bucket1/path/to/obj/",
                "s3://attic/indexes/bucket1/path/to/obj.manifest",
                "s3://attic/files/bucket1/path/to/obj.pkg",
                "from_vendor/",
            ]
        );
        assert_eq!(
            calls[1],
            vec![
                "purge",
                "s3://attic/indexes/bucket1/path/to/obj.manifest",
                "s3://attic/files/bucket1/path/to/obj.pkg",
                "force",
            ]
        );
    }

    #[tokio::test]
    async fn restore_only_requests_cold_objects_not_in_progress() {
        let store = MemoryStore::new();
        let archiver = FakeArchiver::default();
        let id = ObjectId::new("b1", "dir");
        store.put("attic", "steps/restore/b1/dir", b"");
        store.put_with_class("b1", "dir/cold.bin", cold());
        store.put_with_class("b1", "dir/nested/cold2.bin", cold());
        store.put("b1", "dir/warm.txt", b"hot");
        store.put_with_class(
            "b1",
            "dir/pending.bin",
            ObjectMetadata {
                storage_class: StorageClass::Glacier,
                restore: Some("ongoing-request=\"true\"".into()),
            },
        );
        store.put_with_class("b1", "dirt/other.bin", cold());

        executor(&store, &archiver)
            .run(Stage::Restore, &id)
            .await
            .unwrap();

        let restored: Vec<String> = store.restores().into_iter().map(|(p, _)| p.key).collect();
        assert_eq!(restored, vec!["dir/cold.bin", "dir/nested/cold2.bin"]);
        let (_, request) = &store.restores()[0];
        assert_eq!(request.days, 30);
        assert_eq!(request.tier, RestoreTier::Bulk);
    }

    #[tokio::test]
    async fn restore_failure_leaves_markers() {
        let store = MemoryStore::new();
        let archiver = FakeArchiver::default();
        let id = ObjectId::new("b1", "dir");
        store.put("attic", "steps/restore/b1/dir", b"");
        store.put_with_class("b1", "dir/cold.bin", cold());
        store.fail_restores(true);

        let err = executor(&store, &archiver)
            .run(Stage::Restore, &id)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::StageBody {
                stage: Stage::Restore,
                source: StageBodyError::Store(_),
                ..
            }
        ));
        assert!(store.contains("attic", "steps/restore/b1/dir"));
        assert!(!store.contains("attic", "steps/archive/b1/dir"));
    }

    #[tokio::test]
    async fn archiver_failure_is_a_stage_body_error() {
        let store = MemoryStore::new();
        let archiver = FakeArchiver {
            fail: true,
            ..Default::default()
        };
        let id = ObjectId::new("b1", "dir");
        store.put("attic", "steps/archive/b1/dir", b"1700000000");

        let err = executor(&store, &archiver)
            .run(Stage::Archive, &id)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::StageBody {
                source: StageBodyError::Archive(_),
                ..
            }
        ));
        assert!(store.contains("attic", "steps/archive/b1/dir"));
        assert!(!store.contains("attic", "steps/purge/b1/dir"));
    }

    #[tokio::test]
    async fn precondition_failure_skips_archiver() {
        let store = MemoryStore::new();
        let archiver = FakeArchiver::default();
        let id = ObjectId::new("b1", "dir");
        store.put("attic", "steps/purge/b1/dir", b"1");
        store.put("attic", "steps/done/b1/dir", b"1");

        let err = executor(&store, &archiver)
            .run(Stage::Purge, &id)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Precondition(Precondition::OutboxPresent(_))
        ));
        assert!(archiver.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn done_is_not_runnable() {
        let store = MemoryStore::new();
        let archiver = FakeArchiver::default();
        let err = executor(&store, &archiver)
            .run(Stage::Done, &ObjectId::new("b1", "dir"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::TerminalStage(Stage::Done)));
    }
}
