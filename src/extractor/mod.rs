
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::{Result, SemdexError};

/// How many leading bytes are sniffed for binary content.
const BINARY_SNIFF_BYTES: usize = 8192;

/// Tagged result of content extraction.
///
/// Expected conditions (binary content, oversized files) are values, not
/// errors: the file still gets indexed through a metadata fallback chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// The file's full text content.
    Text(String),
    /// Only metadata is indexable; carries the detected kind and size.
    Fallback { detected_kind: String, size_bytes: u64 },
}

/// Reads validated local paths and classifies their content.
///
/// Path-safety validation happens in the caller; this type trusts the paths
/// it is handed.
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    max_file_size_bytes: u64,
}

impl ContentExtractor {
    #[inline]
    pub fn new(max_file_size_bytes: u64) -> Self {
        Self {
            max_file_size_bytes,
        }
    }

    /// Extract plain text from a file, or a metadata fallback for content
    /// that cannot be indexed as text.
    ///
    /// Returns an error only for unexpected conditions (missing file,
    /// permission failure).
    #[inline]
    pub fn extract(&self, path: &Path) -> Result<Extraction> {
        let metadata = fs::metadata(path).map_err(|e| {
            SemdexError::Extraction(format!("Failed to stat {}: {}", path.display(), e))
        })?;

        if !metadata.is_file() {
            return Err(SemdexError::Extraction(format!(
                "Not a regular file: {}",
                path.display()
            )));
        }

        let size_bytes = metadata.len();
        if size_bytes > self.max_file_size_bytes {
            debug!(
                size_bytes,
                limit = self.max_file_size_bytes,
                "file exceeds size limit, indexing metadata only: {}",
                path.display()
            );
            return Ok(Extraction::Fallback {
                detected_kind: format!("oversized ({})", extension_label(path)),
                size_bytes,
            });
        }

        let bytes = fs::read(path).map_err(|e| {
            SemdexError::Extraction(format!("Failed to read {}: {}", path.display(), e))
        })?;

        if looks_binary(&bytes) {
            debug!("binary content detected: {}", path.display());
            return Ok(Extraction::Fallback {
                detected_kind: format!("binary ({})", extension_label(path)),
                size_bytes,
            });
        }

        match String::from_utf8(bytes) {
            Ok(text) => Ok(Extraction::Text(text)),
            Err(_) => {
                warn!("non-UTF-8 content treated as binary: {}", path.display());
                Ok(Extraction::Fallback {
                    detected_kind: format!("binary ({})", extension_label(path)),
                    size_bytes,
                })
            }
        }
    }
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .take(BINARY_SNIFF_BYTES)
        .any(|&byte| byte == 0)
}

fn extension_label(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "unknown".to_string())
}
