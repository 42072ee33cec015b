//! Incremental sentence splitting over a token stream.
//!
//! Tokens arrive from the language model in arbitrary slices; synthesis wants
//! whole sentences. The splitter accumulates text and yields a sentence every
//! time terminal punctuation is followed by whitespace (or by nothing, once
//! the stream finishes).

#[derive(Debug, Default)]
pub struct SentenceSplitter {
    pending: String,
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one token; returns every complete sentence it closed out,
    /// in order.
    pub fn push(&mut self, token: &str) -> Vec<String> {
        self.pending.push_str(token);

        let mut sentences = Vec::new();
        loop {
            let Some(split_at) = self.boundary() else {
                break;
            };
            let rest = self.pending.split_off(split_at);
            let sentence = std::mem::replace(&mut self.pending, rest);
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
        }
        sentences
    }

    /// Drains whatever trailing text never got terminal punctuation.
    pub fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.pending);
        let tail = tail.trim();
        if tail.is_empty() {
            None
        } else {
            Some(tail.to_string())
        }
    }

    /// Byte offset just past the first `.?!` that is followed by whitespace.
    fn boundary(&self) -> Option<usize> {
        let mut chars = self.pending.char_indices().peekable();
        while let Some((idx, c)) = chars.next() {
            if !matches!(c, '.' | '?' | '!') {
                continue;
            }
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    return Some(idx + c.len_utf8());
                }
            }
        }
        None
    }
}
