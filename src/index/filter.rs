//! Closed set of metadata filter expressions understood by every storage backend.

use crate::document::ChunkMetadata;
use serde::Serialize;

/// Chunk metadata fields a filter may constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    /// Owning department.
    Department,
}

impl MetadataField {
    /// Payload key used when the field is stored or queried remotely.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Department => "department",
        }
    }

    /// Read the field's value from chunk metadata.
    pub fn value_of(self, metadata: &ChunkMetadata) -> &str {
        match self {
            Self::Department => &metadata.department,
        }
    }
}

/// Predicate over chunk metadata applied by searches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Filter {
    /// Every entry matches.
    Unrestricted,
    /// Field equals the value exactly.
    Equals {
        /// Constrained field.
        field: MetadataField,
        /// Required value.
        value: String,
    },
    /// Field equals one of the values. An empty list matches nothing.
    OneOf {
        /// Constrained field.
        field: MetadataField,
        /// Accepted values.
        values: Vec<String>,
    },
}

impl Filter {
    /// Equality filter on `field`.
    pub fn equals(field: MetadataField, value: impl Into<String>) -> Self {
        Self::Equals {
            field,
            value: value.into(),
        }
    }

    /// Membership filter on `field`.
    pub fn one_of<I, S>(field: MetadataField, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::OneOf {
            field,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `metadata` satisfies the filter.
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Equals { field, value } => field.value_of(metadata) == value,
            Self::OneOf { field, values } => {
                let actual = field.value_of(metadata);
                values.iter().any(|value| value == actual)
            }
        }
    }
}
