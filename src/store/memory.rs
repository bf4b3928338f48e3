//! In-memory [`BlobStore`] with fault injection, for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::{
    BlobPath, BlobStore, ListPage, ListRequest, ObjectMetadata, RestoreRequest, StoreError,
    page_from_sorted_keys,
};

#[derive(Default)]
struct Inner {
    objects: BTreeMap<BlobPath, Vec<u8>>,
    metadata: HashMap<BlobPath, ObjectMetadata>,
    restores: Vec<(BlobPath, RestoreRequest)>,
    fail_writes: bool,
    fail_deletes: bool,
    fail_restores: bool,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_page_size(1000)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            page_size,
        }
    }

    pub fn put(&self, container: &str, key: &str, data: &[u8]) {
        self.inner
            .lock()
            .unwrap()
            .objects
            .insert(BlobPath::new(container, key), data.to_vec());
    }

    pub fn put_with_class(&self, container: &str, key: &str, metadata: ObjectMetadata) {
        self.put(container, key, b"");
        self.inner
            .lock()
            .unwrap()
            .metadata
            .insert(BlobPath::new(container, key), metadata);
    }

    pub fn contains(&self, container: &str, key: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .objects
            .contains_key(&BlobPath::new(container, key))
    }

    pub fn get(&self, container: &str, key: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .objects
            .get(&BlobPath::new(container, key))
            .cloned()
    }

    pub fn keys(&self, container: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .objects
            .keys()
            .filter(|p| p.container == container)
            .map(|p| p.key.clone())
            .collect()
    }

    pub fn restores(&self) -> Vec<(BlobPath, RestoreRequest)> {
        self.inner.lock().unwrap().restores.clone()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_writes = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_deletes = fail;
    }

    pub fn fail_restores(&self, fail: bool) {
        self.inner.lock().unwrap().fail_restores = fail;
    }
}

fn injected(path: &BlobPath) -> StoreError {
    StoreError::Io {
        path: path.clone(),
        source: std::io::Error::other("injected failure"),
    }
}

impl BlobStore for MemoryStore {
    async fn exists(&self, path: &BlobPath) -> Result<bool, StoreError> {
        Ok(self.inner.lock().unwrap().objects.contains_key(path))
    }

    async fn read(&self, path: &BlobPath) -> Result<Vec<u8>, StoreError> {
        self.inner
            .lock()
            .unwrap()
            .objects
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.clone()))
    }

    async fn write(&self, path: &BlobPath, data: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_writes {
            return Err(injected(path));
        }
        inner.objects.insert(path.clone(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &BlobPath) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_deletes {
            return Err(injected(path));
        }
        inner.objects.remove(path);
        inner.metadata.remove(path);
        Ok(())
    }

    async fn list_page(
        &self,
        container: &str,
        request: &ListRequest,
    ) -> Result<ListPage, StoreError> {
        let inner = self.inner.lock().unwrap();
        let keys = inner
            .objects
            .keys()
            .filter(|p| p.container == container)
            .map(|p| p.key.as_str());
        Ok(page_from_sorted_keys(keys, request, self.page_size))
    }

    async fn head(&self, path: &BlobPath) -> Result<ObjectMetadata, StoreError> {
        let inner = self.inner.lock().unwrap();
        if !inner.objects.contains_key(path) {
            return Err(StoreError::NotFound(path.clone()));
        }
        Ok(inner.metadata.get(path).cloned().unwrap_or_default())
    }

    async fn restore(&self, path: &BlobPath, request: &RestoreRequest) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_restores {
            return Err(injected(path));
        }
        if !inner.objects.contains_key(path) {
            return Err(StoreError::NotFound(path.clone()));
        }
        inner.restores.push((path.clone(), *request));
        inner
            .metadata
            .entry(path.clone())
            .or_default()
            .restore = Some("ongoing-request=\"true\"".into());
        Ok(())
    }
}
