//! Stored form of an index entry, shared by both storage backends.

use crate::document::{Chunk, ChunkMetadata};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Everything persisted for a chunk except its vector.
///
/// Metadata is flattened so remote backends can filter on `department` and friends directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct EntryRecord {
    pub(crate) id: String,
    /// Insertion sequence; breaks score ties in original order.
    pub(crate) seq: u64,
    pub(crate) content: String,
    pub(crate) ingested_at: String,
    #[serde(flatten)]
    pub(crate) metadata: ChunkMetadata,
}

impl EntryRecord {
    pub(crate) fn new(id: String, seq: u64, chunk: Chunk, ingested_at: &str) -> Self {
        Self {
            id,
            seq,
            content: chunk.content,
            ingested_at: ingested_at.to_string(),
            metadata: chunk.metadata,
        }
    }

    pub(crate) fn to_chunk(&self) -> Chunk {
        Chunk {
            content: self.content.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Current timestamp formatted for storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Fresh entry identifier. Identifiers are never reused.
pub(crate) fn generate_entry_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentMetadata;

    fn chunk() -> Chunk {
        let mut document = DocumentMetadata::for_source("guide.pdf");
        document.department = "Engineering".into();
        document.page_number = Some(2);
        Chunk {
            content: "Deploys happen on Tuesdays.".into(),
            metadata: ChunkMetadata::from_document(&document, 1, 3, 27),
        }
    }

    #[test]
    fn metadata_is_flattened_into_the_record() {
        let record = EntryRecord::new("id-1".into(), 7, chunk(), "2025-01-01T00:00:00Z");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["department"], "Engineering");
        assert_eq!(value["page_number"], 2);
        assert_eq!(value["chunk_index"], 1);
        assert_eq!(value["seq"], 7);

        let decoded: EntryRecord = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.to_chunk(), chunk());
    }

    #[test]
    fn ids_are_unique_and_timestamps_rfc3339() {
        assert_ne!(generate_entry_id(), generate_entry_id());
        let ts = current_timestamp_rfc3339();
        assert!(ts.contains('T') && ts.ends_with('Z'));
    }
}
