//! Local durable backend: a single redb file under the index directory.
//!
//! redb gives MVCC reads, so searches never block each other or a concurrent insert. Each
//! `insert` is one write transaction; a failed batch leaves no partial entries behind.

use super::mmr::cosine_similarity;
use super::payload::{EntryRecord, current_timestamp_rfc3339};
use super::{Filter, NewEntry, ScoredEntry, StorageError, StoreIdentity, VectorStore};
use async_trait::async_trait;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

const DATABASE_FILE: &str = "knowflow.redb";
const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
const DIMENSION_KEY: &str = "dimension";

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    record: EntryRecord,
    vector: Vec<f32>,
}

/// redb-backed [`VectorStore`].
pub struct LocalStore {
    db: Arc<Database>,
    path: PathBuf,
    dimension: usize,
    next_seq: AtomicU64,
}

impl LocalStore {
    /// Open or create the index under `dir`.
    ///
    /// A new index records `dimension`; an existing one refuses to open with a different value.
    pub async fn open(dir: &Path, dimension: usize) -> Result<Self, StorageError> {
        let dir = dir.to_path_buf();
        tokio::task::spawn_blocking(move || Self::open_blocking(dir, dimension)).await?
    }

    fn open_blocking(dir: PathBuf, dimension: usize) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(DATABASE_FILE);
        let db = Database::create(&path)?;

        let write = db.begin_write()?;
        let stored_dimension = {
            let mut meta = write.open_table(META)?;
            let existing = meta.get(DIMENSION_KEY)?.map(|value| value.value());
            match existing {
                Some(value) => value,
                None => {
                    meta.insert(DIMENSION_KEY, dimension as u64)?;
                    dimension as u64
                }
            }
        };
        write.open_table(ENTRIES)?;
        write.commit()?;

        if stored_dimension != dimension as u64 {
            return Err(StorageError::DimensionMismatch {
                expected: stored_dimension as usize,
                actual: dimension,
            });
        }

        let max_seq = {
            let read = db.begin_read()?;
            let entries = read.open_table(ENTRIES)?;
            let mut next = 0_u64;
            for item in entries.iter()? {
                let (_, value) = item?;
                let stored: StoredEntry = serde_json::from_slice(value.value())?;
                next = next.max(stored.record.seq + 1);
            }
            tracing::debug!(path = %path.display(), entries = entries.len()?, "Opened local index");
            next
        };

        Ok(Self {
            db: Arc::new(db),
            path,
            dimension,
            next_seq: AtomicU64::new(max_seq),
        })
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), StorageError> {
        if vector.len() == self.dimension {
            Ok(())
        } else {
            Err(StorageError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            })
        }
    }
}

#[async_trait]
impl VectorStore for LocalStore {
    async fn insert(&self, entries: Vec<NewEntry>) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        let now = current_timestamp_rfc3339();
        let mut encoded = Vec::with_capacity(entries.len());
        for entry in entries {
            self.check_dimension(&entry.vector)?;
            let seq = self.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
            let stored = StoredEntry {
                record: EntryRecord::new(entry.id.clone(), seq, entry.chunk, &now),
                vector: entry.vector,
            };
            encoded.push((entry.id, serde_json::to_vec(&stored)?));
        }

        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let write = db.begin_write()?;
            {
                let mut table = write.open_table(ENTRIES)?;
                for (id, bytes) in &encoded {
                    table.insert(id.as_str(), bytes.as_slice())?;
                }
            }
            write.commit()?;
            Ok(())
        })
        .await?
    }

    async fn nearest(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &Filter,
    ) -> Result<Vec<ScoredEntry>, StorageError> {
        self.check_dimension(vector)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let db = Arc::clone(&self.db);
        let query = vector.to_vec();
        let filter = filter.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<ScoredEntry>, StorageError> {
            let read = db.begin_read()?;
            let table = read.open_table(ENTRIES)?;
            let mut scored: Vec<(u64, ScoredEntry)> = Vec::new();
            for item in table.iter()? {
                let (_, value) = item?;
                let stored: StoredEntry = serde_json::from_slice(value.value())?;
                if !filter.matches(&stored.record.metadata) {
                    continue;
                }
                let score = cosine_similarity(&query, &stored.vector);
                scored.push((
                    stored.record.seq,
                    ScoredEntry {
                        id: stored.record.id.clone(),
                        score,
                        chunk: stored.record.to_chunk(),
                        vector: stored.vector,
                    },
                ));
            }
            scored.sort_by(|(seq_a, a), (seq_b, b)| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(Ordering::Equal)
                    .then(seq_a.cmp(seq_b))
            });
            scored.truncate(limit);
            Ok(scored.into_iter().map(|(_, entry)| entry).collect())
        })
        .await?
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, StorageError> {
        let db = Arc::clone(&self.db);
        let ids = ids.to_vec();
        tokio::task::spawn_blocking(move || -> Result<usize, StorageError> {
            let write = db.begin_write()?;
            let mut removed = 0;
            {
                let mut table = write.open_table(ENTRIES)?;
                for id in &ids {
                    if table.remove(id.as_str())?.is_some() {
                        removed += 1;
                    }
                }
            }
            write.commit()?;
            Ok(removed)
        })
        .await?
    }

    async fn count(&self) -> Result<usize, StorageError> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || -> Result<usize, StorageError> {
            let read = db.begin_read()?;
            let table = read.open_table(ENTRIES)?;
            Ok(table.len()? as usize)
        })
        .await?
    }

    fn identity(&self) -> StoreIdentity {
        StoreIdentity {
            backend: "local",
            location: self.path.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Chunk, ChunkMetadata, DocumentMetadata};

    fn entry(id: &str, vector: Vec<f32>, department: &str) -> NewEntry {
        let mut document = DocumentMetadata::for_source("doc.txt");
        document.department = department.to_string();
        NewEntry {
            id: id.to_string(),
            vector,
            chunk: Chunk {
                content: format!("content of {id}"),
                metadata: ChunkMetadata::from_document(&document, 0, 1, 12),
            },
        }
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalStore::open(dir.path(), 2).await.unwrap();
            store
                .insert(vec![entry("a", vec![1.0, 0.0], "HR")])
                .await
                .unwrap();
        }
        let store = LocalStore::open(dir.path(), 2).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        store
            .insert(vec![entry("b", vec![1.0, 0.0], "HR")])
            .await
            .unwrap();

        let hits = store
            .nearest(&[1.0, 0.0], 5, &Filter::Unrestricted)
            .await
            .unwrap();
        assert_eq!(
            hits.iter().map(|hit| hit.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[tokio::test]
    async fn reopening_with_other_dimension_fails() {
        let dir = tempfile::tempdir().unwrap();
        drop(LocalStore::open(dir.path(), 3).await.unwrap());
        let error = LocalStore::open(dir.path(), 4).await.err().expect("mismatch");
        assert!(matches!(
            error,
            StorageError::DimensionMismatch {
                expected: 3,
                actual: 4
            }
        ));
    }

    #[tokio::test]
    async fn wrong_sized_vectors_are_rejected_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path(), 2).await.unwrap();
        let error = store
            .insert(vec![
                entry("ok", vec![1.0, 0.0], "HR"),
                entry("bad", vec![1.0], "HR"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(error, StorageError::DimensionMismatch { .. }));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn nearest_orders_by_score_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path(), 2).await.unwrap();
        store
            .insert(vec![
                entry("far", vec![0.0, 1.0], "HR"),
                entry("near", vec![1.0, 0.1], "HR"),
                entry("other-dept", vec![1.0, 0.0], "Finance"),
            ])
            .await
            .unwrap();

        let hits = store
            .nearest(
                &[1.0, 0.0],
                5,
                &Filter::equals(super::super::MetadataField::Department, "HR"),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "near");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn delete_counts_existing_ids_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path(), 2).await.unwrap();
        store
            .insert(vec![entry("a", vec![1.0, 0.0], "HR")])
            .await
            .unwrap();
        let removed = store
            .delete(&["a".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.identity().backend, "local");
    }
}
