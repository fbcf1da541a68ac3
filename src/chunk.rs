//! Boundary-aware text chunker with fixed overlap.
//!
//! Splits extracted text into passages of at most `max_size` characters.
//! Every chunk after the first begins exactly `overlap` characters before
//! the end of its predecessor, so retrieval keeps cross-chunk context and
//! the original text can be rebuilt by dropping each overlap prefix.
//!
//! # Algorithm
//!
//! 1. Take the window `[start, start + max_size)` (in chars, not bytes).
//! 2. If the window reaches the end of the text, emit it and stop.
//! 3. Otherwise pick the last break point in `(start + overlap, window end]`,
//!    preferring, in order: a paragraph break (`\n\n`), a sentence end
//!    (`.`/`!`/`?` followed by whitespace), a line break, any whitespace.
//!    Fall back to a hard cut at the window end.
//! 4. Emit `[start, break)` and continue from `break - overlap`.
//!
//! No trimming happens here: chunks are exact spans of the input.

/// Split `text` into overlapping chunks.
///
/// Returns an empty vector for empty input. `overlap` is clamped below
/// `max_size` so the window always advances.
///
/// ```rust
/// use libris::chunk::split;
///
/// let chunks = split("One. Two. Three.", 10, 2);
/// assert_eq!(chunks[0], "One. Two. ");
/// assert!(chunks[1].starts_with(". "));
/// ```
pub fn split(text: &str, max_size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || max_size == 0 {
        return Vec::new();
    }
    let overlap = overlap.min(max_size - 1);
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let window_end = (start + max_size).min(len);
        if window_end == len {
            chunks.push(chars[start..len].iter().collect());
            break;
        }
        let end = find_break(&chars, start + overlap + 1, window_end).unwrap_or(window_end);
        chunks.push(chars[start..end].iter().collect());
        start = end - overlap;
    }
    chunks
}

#[derive(Clone, Copy)]
enum Boundary {
    Paragraph,
    Sentence,
    Line,
    Word,
}

const PREFERENCE: [Boundary; 4] = [
    Boundary::Paragraph,
    Boundary::Sentence,
    Boundary::Line,
    Boundary::Word,
];

/// Last break position in `lo..=hi` for the most preferred boundary kind.
fn find_break(chars: &[char], lo: usize, hi: usize) -> Option<usize> {
    if lo > hi {
        return None;
    }
    PREFERENCE
        .iter()
        .find_map(|kind| (lo..=hi).rev().find(|&b| is_break(chars, b, *kind)))
}

/// Whether a chunk may end right before index `b`.
fn is_break(chars: &[char], b: usize, kind: Boundary) -> bool {
    if b == 0 {
        return false;
    }
    let last = chars[b - 1];
    match kind {
        Boundary::Paragraph => b >= 2 && last == '\n' && chars[b - 2] == '\n',
        Boundary::Sentence => {
            b >= 2 && last.is_whitespace() && matches!(chars[b - 2], '.' | '!' | '?')
        }
        Boundary::Line => last == '\n',
        Boundary::Word => last.is_whitespace(),
    }
}
