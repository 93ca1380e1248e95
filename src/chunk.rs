//! Fixed-window text chunker with overlap.
//!
//! Splits note content into bounded spans for embedding. Consecutive spans
//! overlap by a configurable number of characters so that context crossing a
//! split boundary is not lost. Splitting is deterministic for identical input.
//!
//! Chunk identity is the composite key `"{note_id}-{ordinal}"` with ordinals
//! 0-based and contiguous; the index always rewrites a note's full run, so
//! the ordinals present for a note are exactly `0..k`.

/// Composite chunk key, stable across re-chunks of the same ordinal.
pub fn chunk_id(note_id: i64, ordinal: usize) -> String {
    format!("{}-{}", note_id, ordinal)
}

/// Split text into overlapping spans of at most `max_chars` characters.
///
/// Windows advance by `max_chars - overlap_chars`, so each span shares its
/// first `overlap_chars` characters with the previous span's tail. Counts are
/// in characters, not bytes, so multi-byte text never splits mid-codepoint.
///
/// Empty or whitespace-only input yields an empty sequence; no produced span
/// is empty. Callers must guarantee `overlap_chars < max_chars` (validated
/// at config load).
pub fn split_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    debug_assert!(max_chars > 0);
    debug_assert!(overlap_chars < max_chars);

    let body = text.trim();
    if body.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = body.chars().collect();
    if chars.len() <= max_chars {
        return vec![body.to_string()];
    }

    let step = max_chars - overlap_chars;
    let mut spans = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + max_chars).min(chars.len());
        let span: String = chars[start..end].iter().collect();
        let span = span.trim();
        if !span.is_empty() {
            spans.push(span.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_span() {
        let spans = split_text("Hello, world!", 400, 200);
        assert_eq!(spans, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(split_text("", 400, 200).is_empty());
        assert!(split_text("   \n\t ", 400, 200).is_empty());
    }

    #[test]
    fn test_no_span_is_empty() {
        let text = "a".repeat(50) + &" ".repeat(30) + &"b".repeat(50);
        for span in split_text(&text, 20, 5) {
            assert!(!span.is_empty());
        }
    }

    #[test]
    fn test_spans_respect_max_chars() {
        let text: String = (0..500).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        for span in split_text(&text, 100, 40) {
            assert!(span.chars().count() <= 100);
        }
    }

    #[test]
    fn test_consecutive_spans_overlap() {
        // No whitespace, so spans are exact windows: tail of one must equal
        // the head of the next for overlap_chars characters.
        let text: String = (0..300).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let spans = split_text(&text, 100, 30);
        assert!(spans.len() > 1);
        for pair in spans.windows(2) {
            let tail: String = pair[0].chars().skip(pair[0].chars().count() - 30).collect();
            let head: String = pair[1].chars().take(30).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Rust is a systems programming language. ".repeat(30);
        assert_eq!(split_text(&text, 120, 40), split_text(&text, 120, 40));
    }

    #[test]
    fn test_multibyte_text_does_not_panic() {
        let text = "こんにちは世界。".repeat(100);
        let spans = split_text(&text, 50, 10);
        assert!(!spans.is_empty());
        for span in &spans {
            assert!(span.chars().count() <= 50);
        }
    }

    #[test]
    fn test_chunk_id_format() {
        assert_eq!(chunk_id(7, 0), "7-0");
        assert_eq!(chunk_id(42, 13), "42-13");
    }
}
