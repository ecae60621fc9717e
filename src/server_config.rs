use std::env;

use config::Config;
use lazy_static::lazy_static;
use serde::Deserialize;

use crate::knowledge::KnowledgeDoc;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub endpoint: String,
    pub key: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub temperature: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestionConfig {
    pub spool_dir: String,
    /// Cron expression for the ingestion job.
    pub schedule: String,
    pub support_keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub api: ApiConfig,
    pub model: ModelConfig,
    pub ingestion: IngestionConfig,
    pub knowledge: Vec<KnowledgeDoc>,
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The API key is deliberately not printed
        write!(
            f,
            "Server Config:\nEndpoint: {}\nModel: {:?}\nIngestion: {:?}\nKnowledge docs: {}",
            self.api.endpoint,
            self.model,
            self.ingestion,
            self.knowledge.len(),
        )
    }
}

lazy_static! {
    pub static ref cfg: ServerConfig = {
        let root = env::var("APP_DIR").unwrap_or_else(|_| {
            let dir =
                env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR or APP_DIR is required");
            format!("{}/config", dir)
        });
        let path = format!("{root}/config.toml");
        let mut loaded: ServerConfig = Config::builder()
            .add_source(config::File::with_name(&path))
            .build()
            .expect("config.toml is required")
            .try_deserialize()
            .expect("config.toml is invalid");

        if let Ok(key) = env::var("TRIAGEDESK_API_KEY") {
            loaded.api.key = key;
        }

        loaded
    };
}
