//! Sentence-boundary chunking for long inputs.
//!
//! Long source texts are split into ordered chunks below a configured
//! character limit, preferring sentence boundaries (including the Arabic
//! comma `،` and question mark `؟`), then whitespace, then a hard break.
//! Each chunk after the first carries the preceding chunk's source text
//! as advisory context for the translation backends.

/// One chunk of the input, in order.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    /// The preceding chunk's source text, present for every chunk after
    /// the first. Passed to backends as reference context, never as text
    /// to translate.
    pub carry_context: Option<String>,
}

/// Splits text on sentence/whitespace boundaries with a bounded maximum
/// chunk size (counted in characters, not bytes).
pub struct Chunker {
    max_chars: usize,
    /// Advisory; retained as a recognized parameter. Chunk texts never
    /// re-include overlapped content. Context flows through
    /// [`Chunk::carry_context`] instead.
    #[allow(dead_code)]
    overlap_chars: usize,
}

/// Sentence-ending characters: Western enders, Arabic comma and question
/// mark, and newline.
fn is_sentence_end(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '،' | '؟' | '\n')
}

impl Chunker {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
            overlap_chars,
        }
    }

    /// Split `text` into ordered non-empty chunks of at most `max_chars`
    /// characters each.
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return vec![];
        }

        let chars: Vec<char> = trimmed.chars().collect();
        let mut pieces: Vec<String> = Vec::new();

        if chars.len() <= self.max_chars {
            pieces.push(trimmed.to_string());
        } else {
            let mut start = 0;
            while start < chars.len() {
                let end = start + self.max_chars;
                if end >= chars.len() {
                    pieces.push(chars[start..].iter().collect());
                    break;
                }

                let split = find_split(&chars, start, end);
                pieces.push(chars[start..split].iter().collect());
                start = split;
            }
        }

        let mut chunks: Vec<Chunk> = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            let carry_context = chunks.last().map(|prev: &Chunk| prev.text.clone());
            chunks.push(Chunk {
                index: chunks.len(),
                text: piece.to_string(),
                carry_context,
            });
        }
        chunks
    }
}

/// Locate the split position in `chars[start..end]`: after the latest
/// sentence ender (plus its trailing whitespace run), else at the latest
/// whitespace, else the hard window end.
fn find_split(chars: &[char], start: usize, end: usize) -> usize {
    let window = &chars[start..end];

    if let Some(i) = window.iter().rposition(|&c| is_sentence_end(c)) {
        let mut j = i + 1;
        while j < window.len() && window[j].is_whitespace() {
            j += 1;
        }
        return start + j;
    }

    match window.iter().rposition(|c| c.is_whitespace()) {
        Some(ws) if ws > 0 => start + ws,
        _ => end,
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(3000, 200)
    }
}
