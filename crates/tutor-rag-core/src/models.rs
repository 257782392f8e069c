//! Core data models shared by ingestion, search, fusion, and lifecycle code.
//!
//! A [`Document`] owns a set of [`Chunk`]s; the raw text lives in a separate
//! [`DocumentContent`] record. Knowledge-base material is stored as
//! [`KnowledgeEntry`] values in a shared collection with no owner. Searches
//! produce ephemeral [`RetrievalResult`]s that are never persisted.

use serde::{Deserialize, Serialize};

/// Either a single value or a list of values.
///
/// Deserializes from a bare JSON value or a JSON array, so request bodies
/// can carry `"doc_filter": "abc"` as well as `"doc_filter": ["abc", "def"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(vs) => vs,
        }
    }
}

impl<T> From<T> for OneOrMany<T> {
    fn from(value: T) -> Self {
        OneOrMany::One(value)
    }
}

/// Which of an owner's documents an operation applies to.
///
/// An absent filter means every document of the owner. An explicit list
/// selects exactly those ids, and an empty list selects nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocScope {
    AllDocuments,
    Only(Vec<String>),
}

impl DocScope {
    pub fn from_filter(filter: Option<OneOrMany<String>>) -> Self {
        match filter {
            None => DocScope::AllDocuments,
            Some(f) => DocScope::Only(f.into_vec()),
        }
    }

    pub fn single(document_id: impl Into<String>) -> Self {
        DocScope::Only(vec![document_id.into()])
    }

    /// True for an explicit, empty id list.
    pub fn selects_nothing(&self) -> bool {
        matches!(self, DocScope::Only(ids) if ids.is_empty())
    }

    pub fn contains(&self, document_id: &str) -> bool {
        match self {
            DocScope::AllDocuments => true,
            DocScope::Only(ids) => ids.iter().any(|id| id == document_id),
        }
    }

    /// The explicitly named ids, if any.
    pub fn named_ids(&self) -> Option<&[String]> {
        match self {
            DocScope::AllDocuments => None,
            DocScope::Only(ids) => Some(ids),
        }
    }
}

/// Metadata record for one uploaded source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub display_name: String,
    pub content_type: String,
    pub chunk_count: i64,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

/// Raw extracted text of a document, kept apart from its metadata and chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentContent {
    pub document_id: String,
    pub owner_id: String,
    pub body: String,
    /// SHA-256 of `body`, hex encoded.
    pub content_hash: String,
}

/// A contiguous span of a document's text paired with its embedding.
///
/// Chunks are never updated in place: a changed document is deleted and
/// re-ingested.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub owner_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// Length in bytes of the prefix of `text` repeated from the previous chunk.
    pub overlap: usize,
    /// Human-readable `"<document name>_<index>"`.
    pub label: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
    pub embedding: Vec<f32>,
}

/// A chunk of shared knowledge-base material.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeEntry {
    pub id: String,
    pub source_id: String,
    pub title: String,
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Where a retrieved passage came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceMetadata {
    Document {
        document_id: String,
        owner_id: String,
        chunk_index: i64,
        label: String,
    },
    Knowledge {
        source_id: String,
        title: String,
        chunk_index: i64,
    },
}

/// One passage returned by a search, discarded after the response is built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub text: String,
    pub source: SourceMetadata,
    pub score: f32,
}

impl RetrievalResult {
    pub fn from_chunk(chunk: &Chunk, score: f32) -> Self {
        Self {
            text: chunk.text.clone(),
            source: SourceMetadata::Document {
                document_id: chunk.document_id.clone(),
                owner_id: chunk.owner_id.clone(),
                chunk_index: chunk.chunk_index,
                label: chunk.label.clone(),
            },
            score,
        }
    }

    pub fn from_entry(entry: &KnowledgeEntry, score: f32) -> Self {
        Self {
            text: entry.text.clone(),
            source: SourceMetadata::Knowledge {
                source_id: entry.source_id.clone(),
                title: entry.title.clone(),
                chunk_index: entry.chunk_index,
            },
            score,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One prior message of a conversation, supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_filter_selects_all() {
        let scope = DocScope::from_filter(None);
        assert_eq!(scope, DocScope::AllDocuments);
        assert!(scope.contains("anything"));
        assert!(!scope.selects_nothing());
    }

    #[test]
    fn empty_filter_selects_nothing() {
        let scope = DocScope::from_filter(Some(OneOrMany::Many(vec![])));
        assert!(scope.selects_nothing());
        assert!(!scope.contains("doc-1"));
    }

    #[test]
    fn one_or_many_deserializes_both_shapes() {
        let one: OneOrMany<String> = serde_json::from_str("\"doc-1\"").unwrap();
        let many: OneOrMany<String> = serde_json::from_str("[\"a\", \"b\"]").unwrap();
        assert_eq!(one.into_vec(), vec!["doc-1".to_string()]);
        assert_eq!(many.into_vec(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn turn_roles_serialize_lowercase() {
        let turn = ConversationTurn::assistant("hi");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "assistant");
    }
}
