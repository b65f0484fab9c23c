//! Config command - prints the effective configuration

use crate::config::AppConfig;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    println!("{}", serde_json::to_string_pretty(&config)?);

    Ok(())
}
