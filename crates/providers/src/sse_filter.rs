//! Reasoning-channel filter for OpenAI-compatible event streams.
//!
//! Some providers (OpenRouter, DeepSeek) stream chain-of-thought in a
//! separate `delta.reasoning` field. Downstream consumers only read
//! `delta.content`, so the filter moves reasoning text into `content`,
//! wrapped in `<thinking>` ... `</thinking>`, and strips the reasoning
//! fields. The close marker is glued to the first real content token.
//!
//! One filter instance per upstream response. State never crosses
//! connections.

use serde_json::{Map, Value};

pub const THINKING_OPEN: &str = "<thinking>";
pub const THINKING_CLOSE: &str = "</thinking>";

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";
const REASONING_TEXT_FIELDS: [&str; 2] = ["reasoning", "reasoning_content"];
const REASONING_FIELDS: [&str; 3] = ["reasoning", "reasoning_details", "reasoning_content"];

/// Line-oriented stream transform. Feed it chunks, get back rewritten
/// complete lines; call [`ReasoningFilter::finish`] at end of stream.
#[derive(Debug, Default)]
pub struct ReasoningFilter {
    /// Incomplete trailing line
    buffer: String,
    /// Incomplete trailing UTF-8 sequence
    carry: Vec<u8>,
    in_reasoning: bool,
    pending_close: bool,
}

enum Rewrite {
    Emit,
    Suppress,
}

impl ReasoningFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a reasoning span is open.
    pub fn in_reasoning(&self) -> bool {
        self.in_reasoning
    }

    /// Feed raw response bytes. A multi-byte character split across chunks
    /// is held back until its remaining bytes arrive.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let mut text = String::with_capacity(self.carry.len());
        loop {
            match std::str::from_utf8(&self.carry) {
                Ok(s) => {
                    text.push_str(s);
                    self.carry.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.carry[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.carry.drain(..valid + bad);
                        }
                        None => {
                            self.carry.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        self.push_str(&text)
    }

    /// Feed decoded text.
    pub fn push_str(&mut self, chunk: &str) -> String {
        self.buffer.push_str(chunk);
        let mut out = String::new();
        while let Some(end) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=end).collect();
            self.process_line(&line[..line.len() - 1], &mut out);
        }
        out
    }

    /// Emit whatever is left unprocessed, verbatim.
    pub fn finish(&mut self) -> String {
        let mut out = std::mem::take(&mut self.buffer);
        if !self.carry.is_empty() {
            out.push_str(&String::from_utf8_lossy(&self.carry));
            self.carry.clear();
        }
        out
    }

    fn process_line(&mut self, line: &str, out: &mut String) {
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            push_line(out, line);
            return;
        };
        if payload == DONE_SENTINEL {
            push_line(out, line);
            return;
        }
        let Ok(mut record) = serde_json::from_str::<Value>(payload) else {
            push_line(out, line);
            return;
        };
        if let Some(obj) = record.as_object_mut()
            && let Rewrite::Suppress = self.rewrite(obj)
        {
            return;
        }
        out.push_str(DATA_PREFIX);
        out.push_str(&record.to_string());
        out.push('\n');
    }

    fn rewrite(&mut self, record: &mut Map<String, Value>) -> Rewrite {
        let is_metadata = record.get("x-model").is_some_and(|v| !v.is_null())
            && !record.contains_key("choices")
            && !record.contains_key("error");
        if is_metadata {
            return Rewrite::Suppress;
        }

        let Some(delta) = record
            .get_mut("choices")
            .and_then(|c| c.get_mut(0))
            .and_then(|c| c.get_mut("delta"))
            .and_then(Value::as_object_mut)
        else {
            return Rewrite::Emit;
        };

        let carries_reasoning = REASONING_TEXT_FIELDS.iter().any(|k| delta.contains_key(*k));
        let reasoning = REASONING_TEXT_FIELDS
            .iter()
            .find_map(|k| non_empty_str(delta.get(*k)))
            .map(str::to_owned);
        let has_content = non_empty_str(delta.get("content")).is_some();

        if let Some(text) = reasoning {
            let prefix = if self.in_reasoning { "" } else { THINKING_OPEN };
            delta.insert("content".into(), Value::String(format!("{prefix}{text}")));
            self.in_reasoning = true;
            self.pending_close = false;
        } else if self.in_reasoning && (carries_reasoning || has_content) {
            self.in_reasoning = false;
            self.pending_close = true;
        }

        for key in REASONING_FIELDS {
            delta.shift_remove(key);
        }

        if self.pending_close
            && let Some(content) = non_empty_str(delta.get("content")).map(str::to_owned)
        {
            delta.insert(
                "content".into(),
                Value::String(format!("{THINKING_CLOSE}{content}")),
            );
            self.pending_close = false;
        }

        Rewrite::Emit
    }
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}
