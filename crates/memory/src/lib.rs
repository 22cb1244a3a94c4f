//! Long-term memory for Parley.
//!
//! Records live in the shared SQLite database with their embeddings as
//! little-endian f32 blobs. Search goes through an in-process int8 index
//! that is rebuilt from the table after every write.

pub mod settings;
pub mod store;
pub mod vector;

pub use store::{DEFAULT_SEARCH_LIMIT, MemoryPatch, MemoryStore};
pub use vector::QuantizedIndex;

use parley_core::memory::MemoryRecord;

/// Render records as the system-message block injected into a chat turn.
/// Empty input renders as an empty string.
pub fn format_memory_context(memories: &[MemoryRecord]) -> String {
    if memories.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = memories
        .iter()
        .map(|m| format!("- {}: {}", m.title.trim(), m.content.trim()))
        .collect();
    format!("Relevant memory:\n{}", lines.join("\n"))
}
