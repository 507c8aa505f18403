//! Paragraph chunking for per-chunk coverage matching.
//!
//! Articles often describe several techniques. Matching paragraph-sized
//! chunks in addition to the whole text lets a rule that covers one
//! technique surface even when the article as a whole drifts elsewhere.

// ── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Maximum tokens per chunk (default: 200).
    pub max_chunk_tokens: usize,
    /// Chunks smaller than this are merged into a neighbour (default: 30).
    pub min_chunk_tokens: usize,
    /// Upper bound on chunks per article (default: 24).
    pub max_chunks: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: 200,
            min_chunk_tokens: 30,
            max_chunks: 24,
        }
    }
}

// ── Chunk output ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// 0-based index within the article.
    pub index: usize,
    pub content: String,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Split `text` into paragraph-aligned chunks.
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Vec<Chunk> {
    let max_tokens = config.max_chunk_tokens.max(1);
    let fragments = merge_tiny(split_oversized(text, max_tokens), config.min_chunk_tokens);
    fragments
        .into_iter()
        .take(config.max_chunks)
        .enumerate()
        .map(|(index, content)| Chunk { index, content })
        .collect()
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Approximate token count via whitespace splitting.
fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split at sentence ends (`. `, `! `, `? ` followed by uppercase).
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    let mut i = 0;
    while i + 2 < bytes.len() {
        let is_terminal = matches!(bytes[i], b'.' | b'!' | b'?');
        if is_terminal && bytes[i + 1] == b' ' && bytes[i + 2].is_ascii_uppercase() {
            let s = text[start..=i].trim();
            if !s.is_empty() {
                sentences.push(s.to_string());
            }
            start = i + 2;
            i = start;
            continue;
        }
        i += 1;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// Paragraphs, with oversized ones split by sentence and then by words.
fn split_oversized(text: &str, max_tokens: usize) -> Vec<String> {
    let mut pieces = Vec::new();

    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        if count_tokens(para) <= max_tokens {
            pieces.push(para.to_string());
            continue;
        }
        let mut buf = String::new();
        for sent in split_sentences(para) {
            if buf.is_empty() {
                buf = sent;
            } else if count_tokens(&buf) + count_tokens(&sent) <= max_tokens {
                buf.push(' ');
                buf.push_str(&sent);
            } else {
                pieces.push(std::mem::take(&mut buf));
                buf = sent;
            }
        }
        if count_tokens(&buf) > max_tokens {
            let words: Vec<&str> = buf.split_whitespace().collect();
            pieces.extend(words.chunks(max_tokens).map(|w| w.join(" ")));
        } else if !buf.is_empty() {
            pieces.push(buf);
        }
    }
    pieces
}

/// Merge fragments smaller than `min_tokens` into their neighbour.
fn merge_tiny(fragments: Vec<String>, min_tokens: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(fragments.len());
    for frag in fragments {
        if let Some(last) = merged.last_mut() {
            if count_tokens(last) < min_tokens {
                last.push('\n');
                last.push_str(&frag);
                continue;
            }
        }
        merged.push(frag);
    }
    // A tiny tail folds back into its predecessor.
    if merged.len() >= 2 && merged.last().is_some_and(|l| count_tokens(l) < min_tokens) {
        if let Some(tail) = merged.pop() {
            if let Some(prev) = merged.last_mut() {
                prev.push('\n');
                prev.push_str(&tail);
            }
        }
    }
    merged
}
