//! Knowledge document record shared by the store, the sources and the selector.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Characters per estimated model token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Cheap token estimate: one token per four characters, rounded up.
///
/// Every size estimate in the workspace goes through this function so that
/// precomputed `estimated_tokens` values and selector budgets agree.
#[inline]
pub fn estimate_tokens(content: &str) -> usize {
    content.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Current wall-clock time as Unix milliseconds (0 if the clock is before the epoch).
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A short knowledge document (price list, policy, uploaded file).
///
/// Immutable once created; the only mutation the store supports is deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    /// Unique identifier.
    pub id: String,
    /// Display title; also scored by the selector with a higher weight than content.
    pub title: String,
    /// Raw text embedded verbatim into prompts.
    pub content: String,
    /// Unix timestamp (milliseconds) when the document was added.
    pub added_at_ms: i64,
    /// Always `estimate_tokens(&content)`.
    pub estimated_tokens: usize,
    /// True for documents shipped or synced by the system (never removable by users).
    #[serde(default)]
    pub is_system_owned: bool,
}

impl KnowledgeDocument {
    /// Builds a document with an explicit id and timestamp. The token estimate is derived from `content`.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        added_at_ms: i64,
        is_system_owned: bool,
    ) -> Self {
        let content = content.into();
        Self {
            id: id.into(),
            title: title.into(),
            estimated_tokens: estimate_tokens(&content),
            content,
            added_at_ms,
            is_system_owned,
        }
    }

    /// A user-supplied document with a fresh uuid and the current timestamp.
    pub fn local(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4().to_string(), title, content, now_ms(), false)
    }

    /// A system-owned document with the current timestamp.
    pub fn system(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, title, content, now_ms(), true)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn estimate_counts_characters_not_bytes() {
        // 8 characters, 10 bytes in UTF-8
        assert_eq!(estimate_tokens("Políticá"), 2);
    }

    #[test]
    fn constructors_keep_estimate_consistent() {
        let doc = KnowledgeDocument::local("Notas", "Yerba Mate 1kg $3800");
        assert_eq!(doc.estimated_tokens, 5);
        assert!(!doc.is_system_owned);
        assert!(!doc.id.is_empty());

        let sys = KnowledgeDocument::system("sys-1", "Horarios", "Lunes a Sábados");
        assert!(sys.is_system_owned);
        assert_eq!(sys.estimated_tokens, estimate_tokens("Lunes a Sábados"));
    }

    #[test]
    fn stored_bytes_decode_back() {
        let doc = KnowledgeDocument::new("a", "T", "body", 42, true);
        let bytes = serde_json::to_vec(&doc).unwrap();
        assert_eq!(KnowledgeDocument::from_bytes(&bytes), Some(doc));
        assert!(KnowledgeDocument::from_bytes(b"not json").is_none());
    }
}
