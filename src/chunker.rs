//! Overlapping sliding-window text chunker.
//!
//! Splits extracted document text into chunks of at most `size` characters
//! where consecutive chunks share exactly `overlap` characters. Cut points
//! prefer natural boundaries — paragraph break, line break, sentence end,
//! word gap — over mid-word cuts, falling back to a hard cut only when no
//! boundary exists far enough into the window to make progress.
//!
//! All positions are character positions; a multi-byte code point is never
//! split. Identical input and parameters always yield the identical chunk
//! sequence.

/// Boundary patterns tried in preference order. The cut lands immediately
/// after the matched pattern, so the separator stays with the left chunk.
const BOUNDARIES: [&str; 6] = ["\n\n", "\n", ". ", "! ", "? ", " "];

/// Split `text` into overlapping chunks.
///
/// Each chunk covers `[start, end)` in character positions with
/// `end - start <= size`; the next chunk starts at `end - overlap`.
/// Empty input yields an empty vector, not an error.
///
/// `overlap` must be smaller than `size`; the configuration layer enforces
/// this, and the function clamps defensively rather than panicking.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if text.is_empty() || size == 0 {
        return Vec::new();
    }
    let overlap = overlap.min(size - 1);

    // Byte offset of every char, so char positions map to valid slices.
    let offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let n = offsets.len();
    let byte_at = |pos: usize| if pos >= n { text.len() } else { offsets[pos] };

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let window_end = (start + size).min(n);
        let end = if window_end < n {
            find_cut(text, &offsets, start, window_end, overlap).unwrap_or(window_end)
        } else {
            window_end
        };

        chunks.push(text[byte_at(start)..byte_at(end)].to_string());

        if end >= n {
            break;
        }
        start = end - overlap;
    }

    chunks
}

/// Find the best natural cut inside `[start, window_end)`, returned as a
/// char position. A cut is only usable if it lies strictly past
/// `start + overlap`: the next chunk starts `overlap` chars before the
/// cut, and it must start after the current one.
fn find_cut(text: &str, offsets: &[usize], start: usize, window_end: usize, overlap: usize) -> Option<usize> {
    let window = &text[offsets[start]..offsets[window_end]];

    for sep in BOUNDARIES {
        if let Some(rel) = window.rfind(sep) {
            // Boundary patterns are ASCII, so byte arithmetic stays on
            // char boundaries.
            let cut_byte = offsets[start] + rel + sep.len();
            let cut = offsets
                .binary_search(&cut_byte)
                .unwrap_or(offsets.len());
            if cut > start + overlap {
                return Some(cut);
            }
        }
    }
    None
}
