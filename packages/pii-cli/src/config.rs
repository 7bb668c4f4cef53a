use anyhow::{Context, Result};
use dotenvy::dotenv;
use pii_extraction::ExtractionConfig;
use std::env;
use std::path::PathBuf;

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: Option<String>,
    /// Model running the conversation (meta-expert and phase experts)
    pub model_dynamic: String,
    /// Model authoring and refining prompts
    pub model_prompt_creator: String,
    pub temperature: Option<f32>,
    pub prompt_cache_dir: PathBuf,
    pub prompt_dir: Option<PathBuf>,
    pub properties_file: PathBuf,
    pub refine_prompts: bool,
    pub max_concurrency: usize,
    pub ignore_list: Vec<String>,
    pub phase_timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            api_key: env::var("API_KEY").context("API_KEY must be set")?,
            base_url: env::var("BASE_URL").ok(),
            model_dynamic: env::var("MODEL_DYNAMIC").unwrap_or_else(|_| "gpt-4o".to_string()),
            model_prompt_creator: env::var("MODEL_PROMPT_CREATER")
                .unwrap_or_else(|_| "gpt-4o".to_string()),
            temperature: env::var("TEMPERATURE")
                .ok()
                .map(|v| v.parse())
                .transpose()
                .context("TEMPERATURE must be a number")?,
            prompt_cache_dir: env::var("PROMPT_CACHE_DIR")
                .unwrap_or_else(|_| "generated_prompts".to_string())
                .into(),
            prompt_dir: env::var("PROMPT_DIR").ok().map(PathBuf::from),
            properties_file: env::var("PROPERTIES_FILE")
                .unwrap_or_else(|_| "properties.yaml".to_string())
                .into(),
            refine_prompts: env::var("REFINE_PROMPTS")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            max_concurrency: env::var("MAX_CONCURRENCY")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .context("MAX_CONCURRENCY must be a valid number")?,
            ignore_list: match env::var("IGNORE_LIST") {
                Ok(raw) => parse_ignore_list(&raw)?,
                Err(_) => Vec::new(),
            },
            phase_timeout_secs: env::var("PHASE_TIMEOUT_SECS")
                .ok()
                .map(|v| v.parse())
                .transpose()
                .context("PHASE_TIMEOUT_SECS must be a valid number")?,
        })
    }

    /// Library configuration for this run.
    pub fn extraction_config(&self, force_regenerate: bool) -> ExtractionConfig {
        let mut config = ExtractionConfig::default()
            .with_cache_root(self.prompt_cache_dir.clone())
            .with_force_regenerate(force_regenerate)
            .with_refinement(self.refine_prompts)
            .with_max_concurrency(self.max_concurrency)
            .with_ignore_list(self.ignore_list.clone());
        if let Some(seconds) = self.phase_timeout_secs {
            config = config.with_phase_timeout(seconds);
        }
        config
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// `IGNORE_LIST` is a JSON array of paragraphs to drop.
fn parse_ignore_list(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).context("IGNORE_LIST must be a JSON array of strings")
}
