//! `parley serve`: start the HTTP API server.

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config()?;

    if let Some(port) = port_override {
        config.server.port = port;
    }

    println!("Parley Gateway");
    println!("   Listening:    {}:{}", config.server.host, config.server.port);
    println!("   Database:     {}", config.database.path);
    println!("   Vector index: {}", config.memory.vector_index);
    if let Some(vault) = &config.knowledge.vault_path {
        println!("   Vault:        {}", vault.display());
    }

    parley_gateway::start(config).await?;

    Ok(())
}
