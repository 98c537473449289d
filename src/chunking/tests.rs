use super::*;
use crate::config::ChunkingConfig;
use std::path::Path;

fn config(chunk_size_tokens: usize, overlap_ratio: f64) -> ChunkingConfig {
    ChunkingConfig {
        chunk_size_tokens,
        overlap_ratio,
    }
}

#[test]
fn empty_and_whitespace_input_yield_no_chunks() {
    let config = config(500, 0.1);
    assert!(chunk_text("", &config).is_empty());
    assert!(chunk_text("   \n\t  ", &config).is_empty());
}

#[test]
fn short_text_yields_exactly_one_chunk() {
    let config = config(500, 0.1);
    let chunks = chunk_text("hello world", &config);

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_index, 0);
    assert_eq!(chunks[0].start_char, 0);
    assert_eq!(chunks[0].end_char, 11);
    assert_eq!(chunks[0].text, "hello world");
}

#[test]
fn long_text_produces_overlapping_windows() {
    // 500 tokens -> 2000 char window, 10% overlap -> 200 chars shared.
    let config = config(500, 0.1);
    let text: String = std::iter::repeat('a').take(5000).collect();
    let chunks = chunk_text(&text, &config);

    assert!(chunks.len() >= 2, "5000 chars must span multiple windows");
    for pair in chunks.windows(2) {
        let overlap = pair[0].end_char.saturating_sub(pair[1].start_char);
        assert_eq!(overlap, 200, "consecutive windows share the configured overlap");
    }
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i);
        assert!(!chunk.text.is_empty(), "no zero-length chunks");
    }
    assert_eq!(chunks.last().map(|c| c.end_char), Some(5000));
}

#[test]
fn chunk_spans_are_char_offsets_not_bytes() {
    let config = config(50, 0.0);
    // Multi-byte characters: window math must not split inside a code point.
    let text: String = std::iter::repeat('日').take(450).collect();
    let chunks = chunk_text(&text, &config);

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].end_char, 200);
    assert_eq!(chunks[0].text.chars().count(), 200);
    assert_eq!(chunks[2].end_char, 450);
}

#[test]
fn overlap_is_clamped_below_window_width() {
    // 0.999 of the 200-char window truncates to 199; the clamp must still
    // leave a positive step.
    let config = config(50, 0.999);
    let text: String = std::iter::repeat('x').take(1000).collect();
    let chunks = chunk_text(&text, &config);

    assert!(!chunks.is_empty());
    assert_eq!(chunks.last().map(|c| c.end_char), Some(1000));
}

#[test]
fn token_estimate_rounds_up() {
    assert_eq!(estimate_tokens(""), 0);
    assert_eq!(estimate_tokens("abc"), 1);
    assert_eq!(estimate_tokens("abcd"), 1);
    assert_eq!(estimate_tokens("abcde"), 2);
}

#[test]
fn metadata_chunk_describes_the_file() {
    let chunk = metadata_chunk(Path::new("/photos/cat.png"), "binary (png)", 2048);

    assert_eq!(chunk.chunk_index, 0);
    assert_eq!(chunk.start_char, 0);
    assert!(chunk.text.contains("cat.png"));
    assert!(chunk.text.contains("binary (png)"));
    assert!(chunk.text.contains("2048 bytes"));
    assert_eq!(chunk.end_char, chunk.text.chars().count());
}
