//! System prompts for the secondary model calls (title, memory extraction).
//!
//! Each prompt is read once per process from the configured prompts
//! directory (`title.md`, `memory.md`) and falls back to the built-in text
//! when no file is present.

use std::path::{Path, PathBuf};

use tokio::sync::OnceCell;
use tracing::{debug, warn};

const BUILTIN_TITLE: &str = include_str!("../prompts/title.md");
const BUILTIN_MEMORY: &str = include_str!("../prompts/memory.md");

pub struct Prompts {
    dir: Option<PathBuf>,
    title: OnceCell<String>,
    memory: OnceCell<String>,
}

impl Prompts {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            title: OnceCell::new(),
            memory: OnceCell::new(),
        }
    }

    /// Built-in prompts only.
    pub fn builtin() -> Self {
        Self::new(None)
    }

    pub async fn title(&self) -> &str {
        self.title
            .get_or_init(|| load(self.dir.as_deref(), "title.md", BUILTIN_TITLE))
            .await
    }

    pub async fn memory(&self) -> &str {
        self.memory
            .get_or_init(|| load(self.dir.as_deref(), "memory.md", BUILTIN_MEMORY))
            .await
    }
}

async fn load(dir: Option<&Path>, name: &str, builtin: &str) -> String {
    let Some(dir) = dir else {
        return builtin.to_string();
    };
    let path = dir.join(name);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) if !text.trim().is_empty() => {
            debug!(path = %path.display(), "Loaded prompt override");
            text
        }
        Ok(_) => builtin.to_string(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => builtin.to_string(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read prompt, using built-in");
            builtin.to_string()
        }
    }
}
