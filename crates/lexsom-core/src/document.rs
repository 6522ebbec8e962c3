//! Documents as the engine sees them: an id, text, an embedding and legal metadata.
//!
//! Embeddings come from an external model; the engine stores its own copy keyed by id.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of evidence a document represents. Drives node priority, cluster criticality
/// and the search-time legal context boost.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EvidenceType {
    Forensic,
    Testimony,
    Digital,
    Physical,
    Other(String),
}

impl EvidenceType {
    /// Node priority: forensic 4, testimony 3, digital 2, everything else 1.
    pub fn priority(&self) -> u8 {
        match self {
            EvidenceType::Forensic => 4,
            EvidenceType::Testimony => 3,
            EvidenceType::Digital => 2,
            EvidenceType::Physical | EvidenceType::Other(_) => 1,
        }
    }

    /// Weight contributed to the legal context boost at search time.
    pub fn search_weight(&self) -> f32 {
        match self {
            EvidenceType::Forensic => 0.4,
            EvidenceType::Testimony => 0.3,
            EvidenceType::Digital => 0.2,
            EvidenceType::Physical => 0.1,
            EvidenceType::Other(_) => 0.0,
        }
    }

    /// Forensic and testimony evidence mark a cluster as critical.
    pub fn is_critical(&self) -> bool {
        matches!(self, EvidenceType::Forensic | EvidenceType::Testimony)
    }

    pub fn as_str(&self) -> &str {
        match self {
            EvidenceType::Forensic => "forensic",
            EvidenceType::Testimony => "testimony",
            EvidenceType::Digital => "digital",
            EvidenceType::Physical => "physical",
            EvidenceType::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for EvidenceType {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "forensic" => EvidenceType::Forensic,
            "testimony" => EvidenceType::Testimony,
            "digital" => EvidenceType::Digital,
            "physical" => EvidenceType::Physical,
            _ => EvidenceType::Other(s),
        }
    }
}

impl From<&str> for EvidenceType {
    fn from(s: &str) -> Self {
        EvidenceType::from(s.to_string())
    }
}

impl From<EvidenceType> for String {
    fn from(e: EvidenceType) -> Self {
        e.as_str().to_string()
    }
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Legal metadata attached to a document by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_type: Option<EvidenceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_category: Option<String>,
    /// Ingestion confidence in `[0, 1]`.
    #[serde(default)]
    pub confidence: f32,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: i64,
}

impl DocumentMetadata {
    /// Evidence type, ignoring empty `Other("")` values.
    pub fn evidence(&self) -> Option<&EvidenceType> {
        self.evidence_type
            .as_ref()
            .filter(|e| !matches!(e, EvidenceType::Other(s) if s.trim().is_empty()))
    }

    /// Legal category, ignoring empty strings.
    pub fn category(&self) -> Option<&str> {
        self.legal_category
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }
}

/// A document with its embedding, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub id: String,
    #[serde(default)]
    pub content: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl EmbeddingVector {
    pub fn new(id: impl Into<String>, embedding: Vec<f32>, metadata: DocumentMetadata) -> Self {
        Self {
            id: id.into(),
            content: String::new(),
            embedding,
            metadata,
        }
    }

    /// Set the document text.
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Copy with confidence clamped into `[0, 1]` (NaN becomes 0).
    pub(crate) fn sanitized(mut self) -> Self {
        let c = self.metadata.confidence;
        self.metadata.confidence = if c.is_nan() { 0.0 } else { c.clamp(0.0, 1.0) };
        self
    }
}
