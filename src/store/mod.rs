//! Blob store access: existence, small reads and writes, paginated listing
//! and the metadata/restore pair used for cold-tier objects.
//!
//! [`BlobStore`] is the seam every other module talks to. Listing is exposed
//! as lazy streams ([`list_prefix`], [`walk_prefix`]) built on top of
//! [`BlobStore::list_page`]; callers never see continuation tokens.

mod local;
#[cfg(test)]
pub mod memory;

pub use local::LocalStore;

use std::fmt;

use futures::{Stream, TryStreamExt, stream};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A blob location: container (bucket) plus key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobPath {
    pub container: String,
    pub key: String,
}

impl BlobPath {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for BlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.container, self.key)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(BlobPath),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: BlobPath,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid path {path}: {reason}")]
    InvalidPath { path: BlobPath, reason: String },

    #[error("corrupt data at {path}: {message}")]
    Corrupt { path: BlobPath, message: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub(crate) fn io(path: &BlobPath, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound(path.clone())
        } else {
            StoreError::Io {
                path: path.clone(),
                source,
            }
        }
    }
}

/// Whether a listed entry is a directory-like common prefix or a leaf object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Prefix,
    Object,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: EntryKind,
    /// Full key within the container. Prefix entries end with the delimiter.
    pub key: String,
}

impl Entry {
    pub fn object(key: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Object,
            key: key.into(),
        }
    }

    pub fn prefix(key: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Prefix,
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub prefix: String,
    pub delimiter: Option<char>,
    pub continuation_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<Entry>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageClass {
    #[default]
    Standard,
    StandardIa,
    Glacier,
    DeepArchive,
    #[serde(other)]
    Other,
}

impl StorageClass {
    /// Cold tiers need a restore before their data can be read.
    pub fn is_cold(&self) -> bool {
        matches!(self, StorageClass::Glacier | StorageClass::DeepArchive)
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StorageClass::Standard => "STANDARD",
            StorageClass::StandardIa => "STANDARD_IA",
            StorageClass::Glacier => "GLACIER",
            StorageClass::DeepArchive => "DEEP_ARCHIVE",
            StorageClass::Other => "OTHER",
        };
        f.write_str(s)
    }
}

/// Result of a metadata (head) call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ObjectMetadata {
    #[serde(default)]
    pub storage_class: StorageClass,
    /// Restore status header; present once a restore has been requested.
    #[serde(default)]
    pub restore: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreTier {
    Bulk,
}

impl fmt::Display for RestoreTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreTier::Bulk => write!(f, "Bulk"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreRequest {
    pub days: u32,
    pub tier: RestoreTier,
}

/// Operations the pipeline needs from a blob store.
///
/// `delete` of an absent blob succeeds; `read` and `head` of an absent blob
/// fail with [`StoreError::NotFound`]; `exists` only fails on real I/O errors.
pub trait BlobStore {
    async fn exists(&self, path: &BlobPath) -> Result<bool, StoreError>;

    async fn read(&self, path: &BlobPath) -> Result<Vec<u8>, StoreError>;

    async fn write(&self, path: &BlobPath, data: &[u8]) -> Result<(), StoreError>;

    async fn delete(&self, path: &BlobPath) -> Result<(), StoreError>;

    /// One page of a lexicographically ordered listing.
    async fn list_page(&self, container: &str, request: &ListRequest)
    -> Result<ListPage, StoreError>;

    async fn head(&self, path: &BlobPath) -> Result<ObjectMetadata, StoreError>;

    async fn restore(&self, path: &BlobPath, request: &RestoreRequest) -> Result<(), StoreError>;
}

impl<S: BlobStore> BlobStore for &S {
    async fn exists(&self, path: &BlobPath) -> Result<bool, StoreError> {
        (**self).exists(path).await
    }

    async fn read(&self, path: &BlobPath) -> Result<Vec<u8>, StoreError> {
        (**self).read(path).await
    }

    async fn write(&self, path: &BlobPath, data: &[u8]) -> Result<(), StoreError> {
        (**self).write(path, data).await
    }

    async fn delete(&self, path: &BlobPath) -> Result<(), StoreError> {
        (**self).delete(path).await
    }

    async fn list_page(
        &self,
        container: &str,
        request: &ListRequest,
    ) -> Result<ListPage, StoreError> {
        (**self).list_page(container, request).await
    }

    async fn head(&self, path: &BlobPath) -> Result<ObjectMetadata, StoreError> {
        (**self).head(path).await
    }

    async fn restore(&self, path: &BlobPath, request: &RestoreRequest) -> Result<(), StoreError> {
        (**self).restore(path, request).await
    }
}

/// Lists `prefix` one level deep: objects directly under it plus common
/// prefixes for anything nested further.
pub fn list_prefix<'a, S: BlobStore>(
    store: &'a S,
    container: &'a str,
    prefix: impl Into<String>,
) -> impl Stream<Item = Result<Entry, StoreError>> + 'a {
    paginate(store, container, prefix, Some('/'))
}

/// Lists every object under `prefix`, at any depth.
pub fn walk_prefix<'a, S: BlobStore>(
    store: &'a S,
    container: &'a str,
    prefix: impl Into<String>,
) -> impl Stream<Item = Result<Entry, StoreError>> + 'a {
    paginate(store, container, prefix, None)
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

fn paginate<'a, S: BlobStore>(
    store: &'a S,
    container: &'a str,
    prefix: impl Into<String>,
    delimiter: Option<char>,
) -> impl Stream<Item = Result<Entry, StoreError>> + 'a {
    let prefix = prefix.into();
    stream::try_unfold(Cursor::Start, move |cursor| {
        next_page(store, container, prefix.clone(), delimiter, cursor)
    })
    .map_ok(|entries| stream::iter(entries.into_iter().map(Ok::<Entry, StoreError>)))
    .try_flatten()
}

async fn next_page<S: BlobStore>(
    store: &S,
    container: &str,
    prefix: String,
    delimiter: Option<char>,
    cursor: Cursor,
) -> Result<Option<(Vec<Entry>, Cursor)>, StoreError> {
    let continuation_token = match cursor {
        Cursor::Done => return Ok(None),
        Cursor::Start => None,
        Cursor::Next(token) => Some(token),
    };
    let request = ListRequest {
        prefix,
        delimiter,
        continuation_token,
    };
    let page = store.list_page(container, &request).await?;
    let next = page.next_token.map_or(Cursor::Done, Cursor::Next);
    Ok(Some((page.entries, next)))
}

/// Builds one page from the ascending list of keys in a container.
///
/// Shared by the backends that hold keys locally. The continuation token is
/// the last emitted entry's key; a prefix token also skips everything nested
/// beneath it.
pub(crate) fn page_from_sorted_keys<'k>(
    keys: impl IntoIterator<Item = &'k str>,
    request: &ListRequest,
    page_size: usize,
) -> ListPage {
    let page_size = page_size.max(1);

    let mut entries: Vec<Entry> = Vec::new();
    for key in keys {
        if !key.starts_with(&request.prefix) || request.is_consumed(key) {
            continue;
        }
        let entry = request.entry_for(key);
        if entries.last() == Some(&entry) {
            continue;
        }
        if entries.len() == page_size {
            let next_token = entries.last().map(|e| e.key.clone());
            return ListPage {
                entries,
                next_token,
            };
        }
        entries.push(entry);
    }

    ListPage {
        entries,
        next_token: None,
    }
}

impl ListRequest {
    /// Whether `key` was already covered by the pages before this one.
    pub(crate) fn is_consumed(&self, key: &str) -> bool {
        let Some(token) = self.continuation_token.as_deref() else {
            return false;
        };
        key <= token || self.prefix_token().is_some_and(|t| key.starts_with(t))
    }

    /// Whether every key starting with `dir_key` was already covered.
    pub(crate) fn is_subtree_consumed(&self, dir_key: &str) -> bool {
        let Some(token) = self.continuation_token.as_deref() else {
            return false;
        };
        if self.prefix_token().is_some_and(|t| dir_key.starts_with(t)) {
            return true;
        }
        dir_key < token && !token.starts_with(dir_key)
    }

    fn prefix_token(&self) -> Option<&str> {
        let token = self.continuation_token.as_deref()?;
        let d = self.delimiter?;
        token.ends_with(d).then_some(token)
    }

    /// The entry `key` contributes to a listing: the key itself, or the
    /// common prefix it rolls up into. `key` must start with the prefix.
    pub(crate) fn entry_for(&self, key: &str) -> Entry {
        let rest = &key[self.prefix.len()..];
        match self.delimiter.and_then(|d| rest.find(d).map(|i| (d, i))) {
            Some((d, i)) => Entry::prefix(&key[..self.prefix.len() + i + d.len_utf8()]),
            None => Entry::object(key),
        }
    }
}
