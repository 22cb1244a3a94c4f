//! Context assembly: the system messages placed ahead of a chat turn.
//!
//! Order is fixed: agent persona, knowledge base, relevant memory. Each
//! block is optional. Knowledge and memory failures are logged and treated
//! as empty so a broken vault or embedding service never blocks a reply.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use parley_core::catalog::Agent;
use parley_core::message::Message;
use parley_memory::{MemoryStore, format_memory_context};
use parley_store::Database;
use tracing::{debug, info, warn};

pub const DATETIME_PLACEHOLDER: &str = "{{CURRENT_DATETIME}}";

const KNOWLEDGE_PREAMBLE: &str = "# Agent Knowledge Base\n\nThe following documents are part of your permanent knowledge base. Use them to inform your responses.\n\n";
const KNOWLEDGE_SEPARATOR: &str = "\n\n---\n\n";

/// Inputs for one turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblyInput<'a> {
    pub agent: Option<&'a Agent>,
    /// IANA zone name from the browser
    pub time_zone: Option<&'a str>,
    /// The triggering user text, used as the memory query
    pub query: &'a str,
}

pub struct ContextAssembler {
    db: Database,
    memory: Arc<MemoryStore>,
    vault: Option<PathBuf>,
    search_limit: usize,
}

impl ContextAssembler {
    pub fn new(
        db: Database,
        memory: Arc<MemoryStore>,
        vault: Option<PathBuf>,
        search_limit: usize,
    ) -> Self {
        Self {
            db,
            memory,
            vault,
            search_limit,
        }
    }

    pub async fn assemble(&self, input: AssemblyInput<'_>) -> Vec<Message> {
        let mut system = Vec::new();

        if let Some(agent) = input.agent {
            let prompt = agent.system_prompt.trim();
            if !prompt.is_empty() {
                system.push(Message::system(apply_prompt_variables(
                    prompt,
                    input.time_zone,
                    Utc::now(),
                )));
            }

            let knowledge = self.load_knowledge(&agent.id).await;
            if !knowledge.is_empty() {
                system.push(Message::system(knowledge));
            }
        }

        let memory = self.memory_context(input.query).await;
        if !memory.is_empty() {
            system.push(Message::system(memory));
        }

        system
    }

    /// Knowledge files attached to the agent, framed as one block. Empty when
    /// no vault is configured or nothing could be read.
    pub async fn load_knowledge(&self, agent_id: &str) -> String {
        let Some(root) = self.vault.as_deref() else {
            return String::new();
        };
        let files = match self.db.knowledge_files(agent_id).await {
            Ok(files) => files,
            Err(e) => {
                warn!(agent_id, error = %e, "Failed to list knowledge files");
                return String::new();
            }
        };
        if files.is_empty() {
            return String::new();
        }

        let mut documents = Vec::with_capacity(files.len());
        for file in files {
            let Some(path) = resolve_within(root, &file.file_path) else {
                warn!(agent_id, path = %file.file_path, "Knowledge file resolves outside the vault, skipping");
                continue;
            };
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => documents.push((file.file_path, content)),
                Err(e) => {
                    warn!(agent_id, path = %path.display(), error = %e, "Failed to read knowledge file");
                }
            }
        }
        debug!(agent_id, count = documents.len(), "Loaded knowledge files");
        format_knowledge_context(&documents)
    }

    async fn memory_context(&self, query: &str) -> String {
        if query.trim().is_empty() || !self.memory.vector_index_enabled() {
            return String::new();
        }
        let settings = match self.memory.get_settings().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Failed to load memory settings");
                return String::new();
            }
        };
        if !settings.is_active() {
            return String::new();
        }

        let start = Instant::now();
        match self.memory.search(query, &settings, self.search_limit).await {
            Ok(records) => {
                info!(
                    ms = start.elapsed().as_millis() as u64,
                    count = records.len(),
                    "Memory context"
                );
                format_memory_context(&records)
            }
            Err(e) => {
                warn!(error = %e, "Memory search failed");
                String::new()
            }
        }
    }
}

/// Render `now` for the persona prompt. A valid zone gives the US-style
/// local form (`06/01/2025, 14:05:09 EDT`); otherwise UTC in RFC 3339.
pub fn format_current_datetime(time_zone: Option<&str>, now: DateTime<Utc>) -> String {
    match time_zone.map(str::trim).and_then(|tz| tz.parse::<Tz>().ok()) {
        Some(tz) => now
            .with_timezone(&tz)
            .format("%m/%d/%Y, %H:%M:%S %Z")
            .to_string(),
        None => now.to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}

/// Substitute every `{{CURRENT_DATETIME}}` in the prompt.
pub fn apply_prompt_variables(prompt: &str, time_zone: Option<&str>, now: DateTime<Utc>) -> String {
    if !prompt.contains(DATETIME_PLACEHOLDER) {
        return prompt.to_string();
    }
    prompt.replace(DATETIME_PLACEHOLDER, &format_current_datetime(time_zone, now))
}

/// Join `relative` onto `root` lexically and return it only if the result
/// stays at or below `root`. The filesystem is not consulted.
pub fn resolve_within(root: &Path, relative: &str) -> Option<PathBuf> {
    let root = normalize(root);
    let joined = normalize(&root.join(relative));
    joined.starts_with(&root).then_some(joined)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn format_knowledge_context(documents: &[(String, String)]) -> String {
    if documents.is_empty() {
        return String::new();
    }
    let sections: Vec<String> = documents
        .iter()
        .map(|(path, content)| format!("# Knowledge Base: {path}\n\n{content}"))
        .collect();
    format!("{KNOWLEDGE_PREAMBLE}{}", sections.join(KNOWLEDGE_SEPARATOR))
}
