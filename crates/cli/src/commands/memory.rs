//! `parley memory`: memory inspection commands.

use parley_core::memory::MemoryRecord;

pub async fn stats() -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let store = super::open_memory(&config).await?;
    let settings = store.get_settings().await?;

    println!("Memory Statistics");
    println!("=================");
    println!("  Enabled:      {}", settings.enabled);
    println!("  API key:      {}", if settings.has_api_key() { "set" } else { "missing" });
    println!("  Model:        {}", settings.embedding_model);
    println!("  Dimensions:   {}", settings.embedding_dimensions);
    println!("  Records:      {}", store.count().await?);
    if store.vector_index_enabled() {
        println!("  Indexed:      {}", store.indexed().await);
    } else {
        println!("  Indexed:      (vector index disabled)");
    }
    println!("  Database:     {}", config.database.path);

    Ok(())
}

pub async fn search(
    query: &str,
    limit: Option<usize>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let store = super::open_memory(&config).await?;
    let settings = store.get_settings().await?;
    let limit = limit.unwrap_or(config.memory.search_limit);

    let results = store.search(query, &settings, limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    println!("Searching memories for: \"{query}\"");
    println!();
    if results.is_empty() {
        println!("   No memories found.");
    } else {
        for (i, record) in results.iter().enumerate() {
            println!("{}", format_hit(i + 1, record));
        }
    }

    Ok(())
}

fn format_hit(rank: usize, record: &MemoryRecord) -> String {
    let distance = record
        .distance
        .map(|d| format!("{d:.3}"))
        .unwrap_or_else(|| "-".into());
    let preview: String = record.content.chars().take(80).collect();
    format!(
        "  {rank:>2}. [distance: {distance}] {}\n      {preview}\n      source: {}",
        record.title, record.source
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_shows_distance_and_truncated_content() {
        let record = MemoryRecord {
            id: "m1".into(),
            title: "Pet".into(),
            content: "x".repeat(100),
            source: "conversation:c1".into(),
            created_at: 0,
            updated_at: 0,
            distance: Some(0.12345),
        };
        let line = format_hit(1, &record);
        assert!(line.starts_with("   1. [distance: 0.123] Pet"));
        assert!(line.contains(&"x".repeat(80)));
        assert!(!line.contains(&"x".repeat(81)));
        assert!(line.ends_with("source: conversation:c1"));
    }
}
