#[cfg(test)]
mod tests;

use std::path::Path;

use tracing::debug;

use crate::config::ChunkingConfig;

/// Rough chars-per-token ratio used everywhere a token estimate is needed.
const CHARS_PER_TOKEN: usize = 4;

/// A bounded, possibly overlapping window of a file's extracted text.
///
/// Spans are measured in characters (not bytes) and `chunk_index` is
/// contiguous from 0 within one extraction of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
    pub chunk_index: usize,
}

/// Estimate token count as `ceil(chars / 4)`.
#[inline]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Character width of one chunk window for the given config.
#[inline]
pub fn window_chars(config: &ChunkingConfig) -> usize {
    (config.chunk_size_tokens * CHARS_PER_TOKEN).max(1)
}

/// Split extracted text into overlapping character windows.
///
/// Empty or whitespace-only input yields zero chunks, which callers treat as
/// a no-op success. Text shorter than one window yields exactly one chunk
/// spanning the whole text. The overlap is clamped strictly below the window
/// width so every iteration advances.
#[inline]
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let window = window_chars(config);
    let overlap = ((window as f64 * config.overlap_ratio) as usize).min(window - 1);
    let step = window - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + window).min(chars.len());
        chunks.push(TextChunk {
            text: chars[start..end].iter().collect(),
            start_char: start,
            end_char: end,
            chunk_index: chunks.len(),
        });
        if end == chars.len() {
            break;
        }
        start += step;
    }

    debug!(
        chunks = chunks.len(),
        window, overlap, "chunked {} chars of text", chars.len()
    );
    chunks
}

/// Build the single fallback chunk for content that cannot be extracted as
/// text (binary or oversized files), so the file still participates in search.
#[inline]
pub fn metadata_chunk(path: &Path, detected_kind: &str, size_bytes: u64) -> TextChunk {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let text = format!(
        "File: {}\nPath: {}\nType: {}\nSize: {} bytes",
        file_name,
        path.display(),
        detected_kind,
        size_bytes
    );
    let end_char = text.chars().count();

    TextChunk {
        text,
        start_char: 0,
        end_char,
        chunk_index: 0,
    }
}
