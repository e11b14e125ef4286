//! Document-to-text extraction seam.
//!
//! Real deployments plug a converter service (PDF, DOCX) in here; the
//! built-in implementation handles plain-text uploads.

use async_trait::async_trait;

use crate::errors::{KnowledgeError, KnowledgeResult};

/// External collaborator turning uploaded bytes into text. Fails on
/// unreadable input instead of returning garbage.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8], filename: &str) -> KnowledgeResult<String>;
}

/// Treats the upload as UTF-8 text (txt/md/csv exports).
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, bytes: &[u8], filename: &str) -> KnowledgeResult<String> {
        match std::str::from_utf8(bytes) {
            Ok(text) => Ok(text.to_string()),
            Err(_) => Err(KnowledgeError::UnreadableDocument(format!(
                "{filename} is not valid UTF-8 text"
            ))),
        }
    }
}
