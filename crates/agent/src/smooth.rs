//! Word-granularity smoothing of the outgoing text stream.
//!
//! Provider deltas split words at arbitrary points. The smoother buffers
//! text and releases it one word (plus trailing whitespace) at a time, so
//! the client never renders half a word.

use std::sync::LazyLock;

use regex_lite::Regex;

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S+\s+").expect("word pattern is valid"));

#[derive(Debug, Default)]
pub struct WordSmoother {
    buffer: String,
}

impl WordSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a delta; returns the complete words now available.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);
        let mut words = Vec::new();
        let mut consumed = 0;

        // Leading whitespace belongs to no word; release it with the next one.
        while let Some(m) = WORD.find(&self.buffer[consumed..]) {
            let end = consumed + m.end();
            words.push(self.buffer[consumed..end].to_string());
            consumed = end;
        }
        self.buffer.drain(..consumed);
        words
    }

    /// Whatever is left at end of stream.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_whole_words() {
        let mut s = WordSmoother::new();
        assert!(s.push("Hel").is_empty());
        assert_eq!(s.push("lo wor"), vec!["Hello "]);
        assert_eq!(s.push("ld, how are"), vec!["world, ", "how "]);
        assert_eq!(s.flush().as_deref(), Some("are"));
        assert_eq!(s.flush(), None);
    }

    #[test]
    fn preserves_all_text() {
        let input = ["  lead", "ing\n\nnew", "lines  ", "end"];
        let mut s = WordSmoother::new();
        let mut out = String::new();
        for chunk in input {
            out.extend(s.push(chunk));
        }
        out.extend(s.flush());
        assert_eq!(out, input.concat());
    }

    #[test]
    fn leading_whitespace_rides_with_next_word() {
        let mut s = WordSmoother::new();
        assert_eq!(s.push(" a b"), vec![" a "]);
        assert_eq!(s.flush().as_deref(), Some("b"));
    }
}
