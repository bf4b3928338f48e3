//! Filesystem-backed [`BlobStore`].
//!
//! Objects live at `<root>/<container>/<key>`. Storage class and restore
//! status are kept in JSON sidecars beneath `<root>/.meta/`, so containers
//! may not start with a dot.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::{
    BlobPath, BlobStore, Entry, ListPage, ListRequest, ObjectMetadata, RestoreRequest,
    StoreError, page_from_sorted_keys,
};

const META_DIR: &str = ".meta";
const TEMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    page_size: usize,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            root: root.into(),
            page_size: page_size.max(1),
        }
    }

    fn object_file(&self, path: &BlobPath) -> Result<PathBuf, StoreError> {
        validate(path)?;
        Ok(self.root.join(&path.container).join(&path.key))
    }

    fn meta_file(&self, path: &BlobPath) -> Result<PathBuf, StoreError> {
        validate(path)?;
        Ok(self
            .root
            .join(META_DIR)
            .join(&path.container)
            .join(format!("{}.json", path.key)))
    }

    async fn is_file(&self, path: &BlobPath) -> Result<bool, StoreError> {
        let file = self.object_file(path)?;
        match fs::metadata(&file).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                Ok(false)
            }
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Writes via a temp file and rename so readers never see partial content.
    async fn write_file(&self, path: &BlobPath, file: &Path, data: &[u8]) -> Result<(), StoreError> {
        let parent = file.parent().ok_or_else(|| StoreError::InvalidPath {
            path: path.clone(),
            reason: "no parent directory".into(),
        })?;
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::io(path, e))?;

        let tmp = parent.join(format!("{TEMP_PREFIX}{}", Uuid::new_v4()));
        fs::write(&tmp, data)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        if let Err(e) = fs::rename(&tmp, file).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::io(path, e));
        }
        Ok(())
    }

    async fn write_metadata(
        &self,
        path: &BlobPath,
        metadata: &ObjectMetadata,
    ) -> Result<(), StoreError> {
        let file = self.meta_file(path)?;
        let json = serde_json::to_vec_pretty(metadata).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;
        self.write_file(path, &file, &json).await
    }

    /// Records storage metadata for an object, e.g. to mark it as archived.
    #[cfg(test)]
    pub async fn set_metadata(
        &self,
        path: &BlobPath,
        metadata: &ObjectMetadata,
    ) -> Result<(), StoreError> {
        self.write_metadata(path, metadata).await
    }

    /// The keys backing one page of `request`, ascending.
    ///
    /// Directories are visited in key order, so subtrees the continuation
    /// token already covers are never read and the walk stops once it has
    /// one entry more than a page holds.
    async fn collect_keys(
        &self,
        container: &str,
        request: &ListRequest,
    ) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut last: Option<Entry> = None;
        let mut pending = vec![Node::Dir(self.root.join(container), String::new())];

        while let Some(node) = pending.pop() {
            match node {
                Node::Dir(dir, dir_key) => {
                    if !worth_visiting(&dir_key, request, last.as_ref()) {
                        continue;
                    }
                    let children = read_children(container, &dir, &dir_key).await?;
                    pending.extend(children.into_iter().rev());
                }
                Node::File(key) => {
                    if !key.starts_with(&request.prefix) || request.is_consumed(&key) {
                        continue;
                    }
                    let entry = request.entry_for(&key);
                    if last.as_ref() == Some(&entry) {
                        continue;
                    }
                    keys.push(key);
                    last = Some(entry);
                    if keys.len() > self.page_size {
                        break;
                    }
                }
            }
        }
        Ok(keys)
    }
}

/// A directory entry met while walking a container. Directory keys end in `/`.
enum Node {
    Dir(PathBuf, String),
    File(String),
}

impl Node {
    fn key(&self) -> &str {
        match self {
            Node::Dir(_, key) | Node::File(key) => key.as_str(),
        }
    }
}

/// Whether the subtree at `dir_key` can still contribute a new entry.
fn worth_visiting(dir_key: &str, request: &ListRequest, last: Option<&Entry>) -> bool {
    let prefix = request.prefix.as_str();
    if !dir_key.starts_with(prefix) && !prefix.starts_with(dir_key) {
        return false;
    }
    if request.is_subtree_consumed(dir_key) {
        return false;
    }
    // Everything below rolls up into the common prefix listed last.
    let rolled_up = request.delimiter.is_some() && dir_key.len() > prefix.len();
    !(rolled_up && dir_key.starts_with(prefix) && last == Some(&request.entry_for(dir_key)))
}

/// Children of `dir`, sorted by key.
async fn read_children(
    container: &str,
    dir: &Path,
    dir_key: &str,
) -> Result<Vec<Node>, StoreError> {
    let io_err = |e: std::io::Error| StoreError::io(&BlobPath::new(container, dir_key), e);
    let mut reader = match fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
            return Ok(Vec::new());
        }
        Err(e) => return Err(io_err(e)),
    };

    let mut children = Vec::new();
    while let Some(entry) = reader.next_entry().await.map_err(io_err)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(TEMP_PREFIX) {
            continue;
        }
        if entry.file_type().await.map_err(io_err)?.is_dir() {
            children.push(Node::Dir(entry.path(), format!("{dir_key}{name}/")));
        } else {
            children.push(Node::File(format!("{dir_key}{name}")));
        }
    }
    children.sort_by(|a, b| a.key().cmp(b.key()));
    Ok(children)
}

fn validate(path: &BlobPath) -> Result<(), StoreError> {
    let invalid = |reason: &str| StoreError::InvalidPath {
        path: path.clone(),
        reason: reason.into(),
    };
    if path.container.is_empty() || path.container.starts_with('.') || path.container.contains('/')
    {
        return Err(invalid("container must be a plain, non-hidden name"));
    }
    if path.key.is_empty() || path.key.starts_with('/') {
        return Err(invalid("key must be a non-empty relative path"));
    }
    let clean = path
        .key
        .split('/')
        .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if !clean {
        return Err(invalid("key may not contain empty, `.` or `..` segments"));
    }
    Ok(())
}

impl BlobStore for LocalStore {
    async fn exists(&self, path: &BlobPath) -> Result<bool, StoreError> {
        self.is_file(path).await
    }

    async fn read(&self, path: &BlobPath) -> Result<Vec<u8>, StoreError> {
        let file = self.object_file(path)?;
        fs::read(&file).await.map_err(|e| StoreError::io(path, e))
    }

    async fn write(&self, path: &BlobPath, data: &[u8]) -> Result<(), StoreError> {
        let file = self.object_file(path)?;
        debug!(%path, bytes = data.len(), "writing blob");
        self.write_file(path, &file, data).await
    }

    async fn delete(&self, path: &BlobPath) -> Result<(), StoreError> {
        let file = self.object_file(path)?;
        debug!(%path, "deleting blob");
        for target in [file, self.meta_file(path)?] {
            match fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }
        Ok(())
    }

    async fn list_page(
        &self,
        container: &str,
        request: &ListRequest,
    ) -> Result<ListPage, StoreError> {
        let keys = self.collect_keys(container, request).await?;
        Ok(page_from_sorted_keys(
            keys.iter().map(String::as_str),
            request,
            self.page_size,
        ))
    }

    async fn head(&self, path: &BlobPath) -> Result<ObjectMetadata, StoreError> {
        if !self.is_file(path).await? {
            return Err(StoreError::NotFound(path.clone()));
        }
        let file = self.meta_file(path)?;
        match fs::read(&file).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                path: path.clone(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ObjectMetadata::default()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn restore(&self, path: &BlobPath, request: &RestoreRequest) -> Result<(), StoreError> {
        let mut metadata = self.head(path).await?;
        metadata.restore = Some(format!(
            "ongoing-request=\"true\", days={}, tier={}",
            request.days, request.tier
        ));
        self.write_metadata(path, &metadata).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{RestoreTier, StorageClass, list_prefix, walk_prefix};
    use futures::TryStreamExt;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path(), 2);
        (dir, store)
    }

    #[tokio::test]
    async fn write_read_delete() {
        let (_dir, store) = store();
        let path = BlobPath::new("attic", "steps/restore/b1/obj");

        assert!(!store.exists(&path).await.unwrap());
        store.write(&path, b"1700000000").await.unwrap();
        assert!(store.exists(&path).await.unwrap());
        assert_eq!(store.read(&path).await.unwrap(), b"1700000000");

        store.delete(&path).await.unwrap();
        assert!(!store.exists(&path).await.unwrap());
        // Deleting again is fine.
        store.delete(&path).await.unwrap();
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store
            .read(&BlobPath::new("attic", "nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn directory_is_not_an_object() {
        let (_dir, store) = store();
        store
            .write(&BlobPath::new("attic", "a/b/c"), b"")
            .await
            .unwrap();
        assert!(!store.exists(&BlobPath::new("attic", "a/b")).await.unwrap());
        // A path through a file is simply absent.
        assert!(!store.exists(&BlobPath::new("attic", "a/b/c/d")).await.unwrap());
    }

    #[tokio::test]
    async fn rejects_traversal() {
        let (_dir, store) = store();
        for path in [
            BlobPath::new("attic", "../escape"),
            BlobPath::new("attic", "a/./b"),
            BlobPath::new(".meta", "x"),
            BlobPath::new("attic", ""),
        ] {
            assert!(matches!(
                store.write(&path, b"").await,
                Err(StoreError::InvalidPath { .. })
            ));
        }
    }

    #[tokio::test]
    async fn walk_lists_sorted_and_skips_other_prefixes() {
        let (_dir, store) = store();
        for key in [
            "steps/restore/b2/z",
            "steps/restore/b1/a/one",
            "steps/archive/b1/q",
            "steps/restore/b1/c",
        ] {
            store.write(&BlobPath::new("attic", key), b"").await.unwrap();
        }

        let entries: Vec<Entry> = walk_prefix(&store, "attic", "steps/restore/")
            .try_collect()
            .await
            .unwrap();
        let keys: Vec<_> = entries.into_iter().map(|e| e.key).collect();
        assert_eq!(
            keys,
            vec![
                "steps/restore/b1/a/one",
                "steps/restore/b1/c",
                "steps/restore/b2/z",
            ]
        );
    }

    #[tokio::test]
    async fn walk_of_missing_container_is_empty() {
        let (_dir, store) = store();
        let entries: Vec<Entry> = walk_prefix(&store, "nothing", "steps/")
            .try_collect()
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn head_and_restore() {
        let (_dir, store) = store();
        let path = BlobPath::new("b1", "folder/file.txt");
        store.write(&path, b"data").await.unwrap();

        let meta = store.head(&path).await.unwrap();
        assert_eq!(meta.storage_class, StorageClass::Standard);

        store
            .set_metadata(
                &path,
                &ObjectMetadata {
                    storage_class: StorageClass::Glacier,
                    restore: None,
                },
            )
            .await
            .unwrap();
        store
            .restore(
                &path,
                &RestoreRequest {
                    days: 30,
                    tier: RestoreTier::Bulk,
                },
            )
            .await
            .unwrap();

        let meta = store.head(&path).await.unwrap();
        assert_eq!(meta.storage_class, StorageClass::Glacier);
        assert_eq!(
            meta.restore.as_deref(),
            Some("ongoing-request=\"true\", days=30, tier=Bulk")
        );
    }

    #[tokio::test]
    async fn head_missing_is_not_found() {
        let (_dir, store) = store();
        let err = store
            .head(&BlobPath::new("b1", "missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    async fn write_all(store: &LocalStore, keys: &[&str]) {
        for key in keys {
            store.write(&BlobPath::new("attic", *key), b"").await.unwrap();
        }
    }

    fn request(prefix: &str, delimiter: Option<char>, token: Option<&str>) -> ListRequest {
        ListRequest {
            prefix: prefix.to_string(),
            delimiter,
            continuation_token: token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn walk_follows_key_order_across_directories() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path(), 1);
        write_all(&store, &["ab", "a/d", "a-c", "a/b"]).await;

        let keys: Vec<String> = walk_prefix(&store, "attic", "")
            .map_ok(|e| e.key)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(keys, vec!["a-c", "a/b", "a/d", "ab"]);
    }

    #[tokio::test]
    async fn page_reads_only_what_it_needs() {
        let (_dir, store) = store();
        write_all(&store, &["k/1", "k/2", "k/3", "k/4", "k/5", "k/6"]).await;

        let keys = store
            .collect_keys("attic", &request("k/", None, None))
            .await
            .unwrap();
        assert_eq!(keys, vec!["k/1", "k/2", "k/3"]);

        let keys = store
            .collect_keys("attic", &request("k/", None, Some("k/4")))
            .await
            .unwrap();
        assert_eq!(keys, vec!["k/5", "k/6"]);
    }

    #[tokio::test]
    async fn delimited_page_skips_covered_and_empty_directories() {
        let (_dir, store) = store();
        write_all(
            &store,
            &[
                "steps/restore/b1/x",
                "steps/restore/b1/deep/y",
                "steps/restore/b2/gone",
                "steps/restore/b3/z",
                "steps/restore/b4/w",
            ],
        )
        .await;
        store
            .delete(&BlobPath::new("attic", "steps/restore/b2/gone"))
            .await
            .unwrap();

        let keys = store
            .collect_keys(
                "attic",
                &request("steps/restore/", Some('/'), Some("steps/restore/b1/")),
            )
            .await
            .unwrap();
        assert_eq!(keys, vec!["steps/restore/b3/z", "steps/restore/b4/w"]);

        let entries: Vec<Entry> = list_prefix(&store, "attic", "steps/restore/")
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            entries,
            vec![
                Entry::prefix("steps/restore/b1/"),
                Entry::prefix("steps/restore/b3/"),
                Entry::prefix("steps/restore/b4/"),
            ]
        );
    }
}
