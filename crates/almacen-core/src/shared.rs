//! Shared configuration used across the almacen crates.

use crate::selector::Locale;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default selector budget for packed source content (independent of the model's own limit).
pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 100_000;

pub const DEFAULT_SYSTEM_INSTRUCTIONS: &str = "Eres el asistente IA de Noelia Supermercado. Tu objetivo es ayudar con información precisa basada en los documentos provistos. REGLA VISUAL: Siempre que listes precios o productos, utiliza Tablas Markdown.";

/// Global application configuration (gateway + assistant behaviour). Load from TOML or env.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Application identity shown by the status endpoint.
    pub app_name: String,
    /// HTTP port for the gateway.
    pub port: u16,
    /// Base directory for the sled document store.
    pub storage_path: String,
    /// LLM mode ("mock" or "live").
    pub llm_mode: String,
    /// Completion model identifier.
    pub model: String,
    /// System instructions sent with every completion request.
    pub system_instructions: String,
    /// Answer only from sources (true) or allow outside knowledge (false).
    pub strict_mode: bool,
    /// Token budget for packed sources.
    pub max_context_tokens: usize,
    /// Language of the instruction templates ("es" or "en").
    pub locale: Locale,
    /// Remote JSON document list. When unset the remote source is skipped.
    #[serde(default)]
    pub knowledge_url: Option<String>,
    /// Published spreadsheet CSV. When unset the sheet source is skipped.
    #[serde(default)]
    pub csv_url: Option<String>,
    /// Timeout for remote document fetches.
    pub fetch_timeout_secs: u64,
    /// Background resync interval; 0 disables the sync task.
    pub refresh_interval_secs: u64,
    /// Reasoning budget passed to the completion service; 0 disables it.
    pub thinking_budget: u32,
    /// Enables the completion service's web search grounding tool.
    pub search_grounding: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            app_name: "Almacen Assistant".to_string(),
            port: 8001,
            storage_path: "./data".to_string(),
            llm_mode: "mock".to_string(),
            model: "gemini-3-flash-preview".to_string(),
            system_instructions: DEFAULT_SYSTEM_INSTRUCTIONS.to_string(),
            strict_mode: true,
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            locale: Locale::Es,
            knowledge_url: None,
            csv_url: None,
            fetch_timeout_secs: 3,
            refresh_interval_secs: 0,
            thinking_budget: 0,
            search_grounding: false,
        }
    }
}

impl CoreConfig {
    /// Load config from file and environment. Precedence: env `ALMACEN__*` > file at
    /// `ALMACEN_CONFIG` (default `config/gateway`) > defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("ALMACEN_CONFIG").unwrap_or_else(|_| "config/gateway".to_string());
        let path = Path::new(&config_path);
        let candidates = [path.to_path_buf(), path.with_extension("toml")];
        let file = candidates.iter().find(|p| p.is_file());
        Self::load_from(file.map(|p| p.as_path()))
    }

    /// Builds the config from defaults, an optional file and `ALMACEN__*` environment variables.
    pub fn load_from(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let defaults = Self::default();
        let builder = config::Config::builder()
            .set_default("app_name", defaults.app_name)?
            .set_default("port", defaults.port as i64)?
            .set_default("storage_path", defaults.storage_path)?
            .set_default("llm_mode", defaults.llm_mode)?
            .set_default("model", defaults.model)?
            .set_default("system_instructions", defaults.system_instructions)?
            .set_default("strict_mode", defaults.strict_mode)?
            .set_default("max_context_tokens", defaults.max_context_tokens as i64)?
            .set_default("locale", defaults.locale.code())?
            .set_default("fetch_timeout_secs", defaults.fetch_timeout_secs as i64)?
            .set_default("refresh_interval_secs", defaults.refresh_interval_secs as i64)?
            .set_default("thinking_budget", defaults.thinking_budget as i64)?
            .set_default("search_grounding", defaults.search_grounding)?;

        let builder = match file {
            Some(path) => builder.add_source(config::File::from(path)),
            None => builder,
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("ALMACEN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        built.try_deserialize()
    }
}
