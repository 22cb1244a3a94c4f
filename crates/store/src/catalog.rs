//! Collaborator tables the chat pipeline reads: providers, agents, tools,
//! folders and agent knowledge files. Their admin CRUD lives elsewhere;
//! only lookups and the upserts used for seeding are here.

use parley_core::catalog::{Agent, KnowledgeFile, ProviderConfig, ToolConfig};
use parley_core::error::StoreError;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use crate::{Database, col, db_err};

fn provider_from_row(row: &SqliteRow) -> Result<ProviderConfig, StoreError> {
    Ok(ProviderConfig {
        id: col(row, "id")?,
        name: col(row, "name")?,
        api_key: col(row, "api_key")?,
        base_url: col(row, "base_url")?,
    })
}

fn agent_from_row(row: &SqliteRow) -> Result<Agent, StoreError> {
    Ok(Agent {
        id: col(row, "id")?,
        name: col(row, "name")?,
        system_prompt: col(row, "system_prompt")?,
        base_model: col(row, "base_model")?,
    })
}

fn tool_from_row(row: &SqliteRow) -> Result<ToolConfig, StoreError> {
    Ok(ToolConfig {
        id: col(row, "id")?,
        kind: col(row, "type")?,
        name: col(row, "name")?,
        api_key: col(row, "api_key")?,
        engine_id: col(row, "engine_id")?,
        tavily_api_key: col(row, "tavily_api_key")?,
        enabled: col::<i64>(row, "enabled")? != 0,
    })
}

impl Database {
    pub async fn get_provider(&self, id: &str) -> Result<Option<ProviderConfig>, StoreError> {
        let row = sqlx::query("SELECT id, name, api_key, base_url FROM providers WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err("get provider"))?;
        row.as_ref().map(provider_from_row).transpose()
    }

    pub async fn upsert_provider(&self, provider: &ProviderConfig) -> Result<(), StoreError> {
        let now = parley_core::now_millis();
        sqlx::query(
            "INSERT INTO providers (id, name, api_key, base_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, api_key = excluded.api_key,
                base_url = excluded.base_url, updated_at = excluded.updated_at",
        )
        .bind(&provider.id)
        .bind(&provider.name)
        .bind(&provider.api_key)
        .bind(&provider.base_url)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(db_err("upsert provider"))?;
        Ok(())
    }

    pub async fn get_agent(&self, id: &str) -> Result<Option<Agent>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, system_prompt, base_model FROM agents WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err("get agent"))?;
        row.as_ref().map(agent_from_row).transpose()
    }

    pub async fn upsert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        let now = parley_core::now_millis();
        sqlx::query(
            "INSERT INTO agents (id, name, system_prompt, base_model, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, system_prompt = excluded.system_prompt,
                base_model = excluded.base_model, updated_at = excluded.updated_at",
        )
        .bind(&agent.id)
        .bind(&agent.name)
        .bind(&agent.system_prompt)
        .bind(&agent.base_model)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(db_err("upsert agent"))?;
        Ok(())
    }

    /// The first enabled tool row of a kind, if any.
    pub async fn enabled_tool(&self, kind: &str) -> Result<Option<ToolConfig>, StoreError> {
        let row = sqlx::query(
            "SELECT id, type, name, api_key, engine_id, tavily_api_key, enabled FROM tools
             WHERE type = ?1 AND enabled = 1 ORDER BY created_at ASC LIMIT 1",
        )
        .bind(kind)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err("get tool"))?;
        row.as_ref().map(tool_from_row).transpose()
    }

    pub async fn upsert_tool(&self, tool: &ToolConfig) -> Result<(), StoreError> {
        let now = parley_core::now_millis();
        sqlx::query(
            "INSERT INTO tools (id, type, name, api_key, engine_id, tavily_api_key, enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(id) DO UPDATE SET
                type = excluded.type, name = excluded.name, api_key = excluded.api_key,
                engine_id = excluded.engine_id, tavily_api_key = excluded.tavily_api_key,
                enabled = excluded.enabled, updated_at = excluded.updated_at",
        )
        .bind(&tool.id)
        .bind(&tool.kind)
        .bind(&tool.name)
        .bind(&tool.api_key)
        .bind(&tool.engine_id)
        .bind(&tool.tavily_api_key)
        .bind(tool.enabled as i64)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(db_err("upsert tool"))?;
        Ok(())
    }

    pub async fn create_folder(&self, name: &str) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = parley_core::now_millis();
        sqlx::query("INSERT INTO folders (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)")
            .bind(&id)
            .bind(name)
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(db_err("create folder"))?;
        Ok(id)
    }

    /// Knowledge files attached to an agent, in attachment order.
    pub async fn knowledge_files(&self, agent_id: &str) -> Result<Vec<KnowledgeFile>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, agent_id, file_path FROM agent_knowledge_base
             WHERE agent_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )
        .bind(agent_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err("list knowledge files"))?;
        rows.iter()
            .map(|row| {
                Ok(KnowledgeFile {
                    id: col(row, "id")?,
                    agent_id: col(row, "agent_id")?,
                    file_path: col(row, "file_path")?,
                })
            })
            .collect()
    }

    pub async fn add_knowledge_file(
        &self,
        agent_id: &str,
        file_path: &str,
    ) -> Result<KnowledgeFile, StoreError> {
        let file = KnowledgeFile {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            file_path: file_path.to_string(),
        };
        sqlx::query(
            "INSERT INTO agent_knowledge_base (id, agent_id, file_path, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&file.id)
        .bind(&file.agent_id)
        .bind(&file.file_path)
        .bind(parley_core::now_millis())
        .execute(self.pool())
        .await
        .map_err(db_err("add knowledge file"))?;
        Ok(file)
    }
}
