//! Word-bounded text chunker.
//!
//! Splits text on whitespace and regroups the words into chunks of exactly
//! `max_words` words; only the final chunk of a document may be shorter.
//! Joining the words of all chunks in order reproduces the word sequence of
//! the input, with no overlap and nothing dropped.

use crate::models::Chunk;

/// Default chunk size in words.
pub const DEFAULT_MAX_WORDS: usize = 300;

/// Split text into word-bounded segments. Empty or whitespace-only text
/// yields no segments.
pub fn chunk_text(text: &str, max_words: usize) -> Vec<String> {
    let max_words = max_words.max(1);
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::with_capacity(max_words);

    for word in text.split_whitespace() {
        current.push(word);
        if current.len() >= max_words {
            chunks.push(current.join(" "));
            current.clear();
        }
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

/// Accumulates per-document chunks into one global sequence, assigning each
/// chunk its position in that sequence as its id.
#[derive(Debug, Default)]
pub struct ChunkSequence {
    chunks: Vec<Chunk>,
}

impl ChunkSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunk `text` and append the pieces. Returns how many were added.
    pub fn push_document(&mut self, source: &str, text: &str, max_words: usize) -> usize {
        let pieces = chunk_text(text, max_words);
        let added = pieces.len();
        for (position, text) in pieces.into_iter().enumerate() {
            let id = self.chunks.len() as u64;
            self.chunks.push(Chunk {
                id,
                source: source.to_string(),
                position,
                text,
            });
        }
        added
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", 300).is_empty());
        assert!(chunk_text(" \n\t ", 300).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("Hello,   world!\n", 300);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_650_words_split_300_300_50() {
        let chunks = chunk_text(&words(650), 300);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.split_whitespace().count()).collect();
        assert_eq!(sizes, vec![300, 300, 50]);
        assert!(chunks[1].starts_with("w300 "));
        assert!(chunks[2].ends_with("w649"));
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_chunk() {
        let chunks = chunk_text(&words(600), 300);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_words_roundtrip() {
        let text = "  Led a team of five\n\nshipping\tRust services.  Reduced p99 latency by 40%. \n";
        for max in 1..8 {
            let chunks = chunk_text(text, max);
            let rejoined: Vec<&str> = chunks.iter().flat_map(|c| c.split_whitespace()).collect();
            let original: Vec<&str> = text.split_whitespace().collect();
            assert_eq!(rejoined, original, "round-trip failed for max_words={}", max);

            let last = chunks.len() - 1;
            for (i, c) in chunks.iter().enumerate() {
                let n = c.split_whitespace().count();
                if i < last {
                    assert_eq!(n, max);
                } else {
                    assert!(n >= 1 && n <= max);
                }
            }
        }
    }

    #[test]
    fn test_zero_max_words_treated_as_one() {
        let chunks = chunk_text("a b c", 0);
        assert_eq!(chunks, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_deterministic() {
        let text = words(1234);
        assert_eq!(chunk_text(&text, 300), chunk_text(&text, 300));
    }

    #[test]
    fn test_sequence_assigns_global_ids() {
        let mut seq = ChunkSequence::new();
        assert_eq!(seq.push_document("a.txt", &words(5), 2), 3);
        assert_eq!(seq.push_document("empty.txt", "", 2), 0);
        assert_eq!(seq.push_document("b.txt", &words(3), 2), 2);
        let chunks = seq.into_chunks();
        let ids: Vec<u64> = chunks.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(chunks[3].source, "b.txt");
        assert_eq!(chunks[3].position, 0);
        assert_eq!(chunks[4].position, 1);
    }

    fn assert_chunk_properties(text: &str, max: usize) {
        let chunks = chunk_text(text, max);
        let original: Vec<&str> = text.split_whitespace().collect();
        let rejoined: Vec<&str> = chunks.iter().flat_map(|c| c.split_whitespace()).collect();
        assert_eq!(rejoined, original, "round-trip failed for max_words={}", max);
        assert_eq!(chunks.len(), original.len().div_ceil(max));

        if let Some((last, full)) = chunks.split_last() {
            for c in full {
                assert_eq!(c.split_whitespace().count(), max);
            }
            let n = last.split_whitespace().count();
            assert!(n >= 1 && n <= max, "last chunk has {} words", n);
        }
    }

    #[test]
    fn test_lengths_around_multiples_of_max_words() {
        for max in [1, 7, 300] {
            for k in 1..4 {
                for n in [k * max - 1, k * max, k * max + 1] {
                    assert_chunk_properties(&words(n), max);
                }
            }
        }
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        /// Words drawn from ASCII, accented and CJK characters, separated and
        /// surrounded by runs of mixed whitespace.
        fn arb_text() -> impl Strategy<Value = String> {
            (
                "[ \t\n\r\u{3000}]{0,3}",
                proptest::collection::vec(
                    ("[a-zA-Z0-9éüß漢字,.%-]{1,10}", "[ \t\n\r\u{3000}]{1,4}"),
                    0..700,
                ),
            )
                .prop_map(|(lead, parts)| {
                    let mut text = lead;
                    for (word, sep) in parts {
                        text.push_str(&word);
                        text.push_str(&sep);
                    }
                    text
                })
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn chunks_preserve_words_and_respect_bound(
                text in arb_text(),
                max in 1usize..350,
            ) {
                assert_chunk_properties(&text, max);
            }
        }
    }
}
