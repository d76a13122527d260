//! Payload chunking under a hard per-message byte ceiling.
//!
//! Splits happen on UTF-8 character boundaries so no fragment ever carries a
//! partial multi-byte sequence.

/// Default ceiling for explicitly listed files.
pub const DEFAULT_FILE_CHUNK_BYTES: usize = 50_000;

/// Default ceiling for files discovered under a channel directory.
pub const DEFAULT_DIRECTORY_CHUNK_BYTES: usize = 50_000;

/// Fragment ceilings applied during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    /// Ceiling for paths listed in a channel's `files`.
    pub file: usize,
    /// Ceiling for paths found under a channel's `directories`.
    pub directory: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            file: DEFAULT_FILE_CHUNK_BYTES,
            directory: DEFAULT_DIRECTORY_CHUNK_BYTES,
        }
    }
}

/// Split `text` into ordered fragments of at most `max_bytes` bytes.
///
/// - Empty text yields a single empty fragment, so every file produces a `Content`.
/// - A character wider than `max_bytes` forms a fragment on its own.
/// - Concatenating the fragments reproduces `text` exactly.
pub fn chunk(text: &str, max_bytes: usize) -> Vec<&str> {
    if text.is_empty() {
        return vec![text];
    }

    let mut pieces = Vec::with_capacity(text.len() / max_bytes.max(1) + 1);
    let mut rest = text;

    while !rest.is_empty() {
        if rest.len() <= max_bytes {
            pieces.push(rest);
            break;
        }

        let mut end = max_bytes;
        while end > 0 && !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }

        let (head, tail) = rest.split_at(end);
        pieces.push(head);
        rest = tail;
    }

    pieces
}
