//! Fixed-window text chunker with overlap.
//!
//! Splits a document body into [`Chunk`]s of at most `max_tokens` (estimated
//! at four characters per token). Consecutive windows share up to
//! `overlap_tokens` worth of text so meaning is not cut at a boundary.
//!
//! Every chunk is a verbatim, contiguous slice of the body. Window ends snap
//! back to whitespace when one exists in the second half of the window, and
//! overlap starts snap forward past the next whitespace, so words are not
//! split unless a single word is longer than the window.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split `body` into chunks for `source_id`.
///
/// Returns chunks with contiguous indices starting at 0, each carrying the
/// final `total_chunks`. An all-whitespace body yields no chunks.
pub fn chunk_text(
    source_id: &str,
    body: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let spans = window_spans(body, max_tokens, overlap_tokens);
    let total = spans.len();
    spans
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| make_chunk(source_id, index, total, &body[start..end]))
        .collect()
}

/// Byte ranges of each window within `body`. Window sizes count chars.
fn window_spans(body: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<(usize, usize)> {
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let overlap = (overlap_tokens * CHARS_PER_TOKEN).min(max_chars / 2);

    let (lo, hi) = trimmed_bounds(body, 0, body.len());
    if lo >= hi {
        return Vec::new();
    }

    let mut spans = Vec::new();
    let mut start = lo;
    loop {
        let mut end = advance(body, start, max_chars);
        if end >= hi {
            push_span(body, &mut spans, start, hi);
            break;
        }

        let window = &body[start..end];
        if let Some(pos) = window.rfind(char::is_whitespace) {
            if window[..pos].chars().count() >= max_chars / 2 {
                end = start + pos;
            }
        }
        push_span(body, &mut spans, start, end);

        // Next window begins `overlap` chars before this one ended, moved
        // forward to the start of the next word.
        let mut next = retreat(body, end, overlap);
        if overlap > 0 && next > start {
            if let Some(ws) = body[next..end].find(char::is_whitespace) {
                next += ws;
            }
        }
        if next <= start {
            next = end;
        }
        let (trimmed_next, _) = trimmed_bounds(body, next, hi);
        if trimmed_next >= hi {
            break;
        }
        start = trimmed_next;
    }
    spans
}

fn push_span(body: &str, spans: &mut Vec<(usize, usize)>, start: usize, end: usize) {
    let (s, e) = trimmed_bounds(body, start, end);
    if s < e {
        spans.push((s, e));
    }
}

/// Bounds of `body[start..end]` with surrounding whitespace removed.
fn trimmed_bounds(body: &str, start: usize, end: usize) -> (usize, usize) {
    let slice = &body[start..end];
    let leading = slice.len() - slice.trim_start().len();
    let trailing = slice.len() - slice.trim_end().len();
    if leading == slice.len() {
        return (end, end);
    }
    (start + leading, end - trailing)
}

/// Byte offset `n` chars after `from`, capped at the end of `s`.
fn advance(s: &str, from: usize, n: usize) -> usize {
    s[from..]
        .char_indices()
        .nth(n)
        .map_or(s.len(), |(i, _)| from + i)
}

/// Byte offset `n` chars before `to`, floored at 0.
fn retreat(s: &str, to: usize, n: usize) -> usize {
    if n == 0 {
        return to;
    }
    s[..to].char_indices().rev().nth(n - 1).map_or(0, |(i, _)| i)
}

fn make_chunk(source_id: &str, index: usize, total: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        chunk_id: format!("{}-{:04}", source_id, index),
        source_id: source_id.to_string(),
        chunk_index: index,
        total_chunks: total,
        text: text.to_string(),
        hash,
    }
}
