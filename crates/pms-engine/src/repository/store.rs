use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("{collection} `{id}` not found")]
    NotFound { collection: &'static str, id: String },
    #[error("{collection} `{id}` already exists")]
    AlreadyExists { collection: &'static str, id: String },
    #[error("{collection} `{id}` version conflict: expected {expected}, found {actual}")]
    VersionConflict {
        collection: &'static str,
        id: String,
        expected: u64,
        actual: u64,
    },
    #[error("{collection} backend failure: {reason}")]
    Backend { collection: &'static str, reason: String },
}

/// A versioned document stored with per-document compare-and-swap.
pub trait Document: Clone + Send + Sync + 'static {
    fn document_id(&self) -> &str;
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);
}

pub struct InMemoryStore<D: Document> {
    collection: &'static str,
    documents: RwLock<BTreeMap<String, D>>,
}

impl<D: Document> InMemoryStore<D> {
    pub fn new(collection: &'static str) -> Self {
        Self {
            collection,
            documents: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn collection(&self) -> &'static str {
        self.collection
    }

    pub fn insert(&self, mut document: D) -> Result<D, RepositoryError> {
        let mut documents = self.documents.write();
        if documents.contains_key(document.document_id()) {
            return Err(RepositoryError::AlreadyExists {
                collection: self.collection,
                id: document.document_id().to_string(),
            });
        }
        document.set_version(0);
        documents.insert(document.document_id().to_string(), document.clone());
        Ok(document)
    }

    pub fn get(&self, id: &str) -> Option<D> {
        self.documents.read().get(id).cloned()
    }

    pub fn filter(&self, mut predicate: impl FnMut(&D) -> bool) -> Vec<D> {
        self.documents
            .read()
            .values()
            .filter(|document| predicate(document))
            .cloned()
            .collect()
    }

    pub fn find_first(&self, mut predicate: impl FnMut(&D) -> bool) -> Option<D> {
        self.documents
            .read()
            .values()
            .find(|document| predicate(document))
            .cloned()
    }

    /// Replaces the stored document when its version still equals `document.version()`.
    pub fn compare_and_swap(&self, mut document: D) -> Result<D, RepositoryError> {
        let mut documents = self.documents.write();
        let Some(current) = documents.get(document.document_id()) else {
            return Err(RepositoryError::NotFound {
                collection: self.collection,
                id: document.document_id().to_string(),
            });
        };
        if current.version() != document.version() {
            return Err(RepositoryError::VersionConflict {
                collection: self.collection,
                id: document.document_id().to_string(),
                expected: document.version(),
                actual: current.version(),
            });
        }
        document.set_version(document.version() + 1);
        documents.insert(document.document_id().to_string(), document.clone());
        Ok(document)
    }

    pub fn remove(&self, id: &str) -> Option<D> {
        self.documents.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

/// Optimistic read-modify-write loop. `mutate` returning `None` leaves the document
/// untouched and yields `Ok(None)`; version conflicts re-read and retry up to `retry_limit`.
pub fn cas_update<D, T>(
    collection: &'static str,
    id: &str,
    retry_limit: usize,
    load: impl Fn(&str) -> Result<Option<D>, RepositoryError>,
    swap: impl Fn(D) -> Result<D, RepositoryError>,
    mut mutate: impl FnMut(&mut D) -> Option<T>,
) -> Result<Option<(D, T)>, RepositoryError>
where
    D: Clone,
{
    let mut attempts = 0usize;
    loop {
        let current = load(id)?.ok_or_else(|| RepositoryError::NotFound {
            collection,
            id: id.to_string(),
        })?;
        let mut next = current.clone();
        let Some(value) = mutate(&mut next) else {
            return Ok(None);
        };
        match swap(next) {
            Ok(saved) => return Ok(Some((saved, value))),
            Err(RepositoryError::VersionConflict { .. }) if attempts < retry_limit => {
                attempts += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
