use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use autostream_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

struct ConfigFile {
    path: Option<PathBuf>,
    doc: Option<Value>,
}

pub fn run(options: LoadOptions) -> String {
    let file = ConfigFile::detect(options.config_path.as_deref());
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let knowledge_base = config
        .retrieval
        .knowledge_base_path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<built-in>".to_string());
    let api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let base_url = config
        .llm
        .base_url
        .clone()
        .unwrap_or_else(|| format!("{} (provider default)", config.llm.provider.default_base_url()));

    let database = &config.database;
    let llm = &config.llm;
    let retrieval = &config.retrieval;
    let lead_capture = &config.lead_capture;
    let webhook_url = lead_capture.webhook_url.clone().unwrap_or_else(|| "<unset>".to_string());

    let entries = vec![
        entry("database.url", database.url.clone(), &["AUTOSTREAM_DATABASE_URL"]),
        entry("database.max_connections", database.max_connections.to_string(), &[]),
        entry("database.timeout_secs", database.timeout_secs.to_string(), &[]),
        entry("llm.provider", llm.provider.as_str().to_string(), &["AUTOSTREAM_LLM_PROVIDER"]),
        entry("llm.model", llm.model.clone(), &["AUTOSTREAM_LLM_MODEL"]),
        entry("llm.base_url", base_url, &["AUTOSTREAM_LLM_BASE_URL"]),
        entry("llm.api_key", api_key.to_string(), &["AUTOSTREAM_LLM_API_KEY"]),
        entry("llm.timeout_secs", llm.timeout_secs.to_string(), &["AUTOSTREAM_LLM_TIMEOUT_SECS"]),
        entry("llm.max_retries", llm.max_retries.to_string(), &["AUTOSTREAM_LLM_MAX_RETRIES"]),
        entry(
            "llm.classification_temperature",
            llm.classification_temperature.to_string(),
            &[],
        ),
        entry("llm.answer_temperature", llm.answer_temperature.to_string(), &[]),
        entry(
            "retrieval.knowledge_base_path",
            knowledge_base,
            &["AUTOSTREAM_RETRIEVAL_KNOWLEDGE_BASE_PATH"],
        ),
        entry("retrieval.top_k", retrieval.top_k.to_string(), &["AUTOSTREAM_RETRIEVAL_TOP_K"]),
        entry("retrieval.embedding_dimensions", retrieval.embedding_dimensions.to_string(), &[]),
        entry(
            "lead_capture.mode",
            lead_capture.mode.as_str().to_string(),
            &["AUTOSTREAM_LEAD_CAPTURE_MODE"],
        ),
        entry("lead_capture.webhook_url", webhook_url, &["AUTOSTREAM_LEAD_CAPTURE_WEBHOOK_URL"]),
        entry(
            "lead_capture.on_failure",
            lead_capture.on_failure.as_str().to_string(),
            &["AUTOSTREAM_LEAD_CAPTURE_ON_FAILURE"],
        ),
        entry(
            "conversation.max_turns",
            config.conversation.max_turns.to_string(),
            &["AUTOSTREAM_CONVERSATION_MAX_TURNS"],
        ),
        entry(
            "logging.level",
            config.logging.level.clone(),
            &["AUTOSTREAM_LOGGING_LEVEL", "AUTOSTREAM_LOG_LEVEL"],
        ),
        entry(
            "logging.format",
            config.logging.format.as_str().to_string(),
            &["AUTOSTREAM_LOGGING_FORMAT", "AUTOSTREAM_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(entries.into_iter().map(|(key, value, env_keys)| {
        render_line(key, &value, file.field_source(key, env_keys))
    }));
    lines.join("\n")
}

impl ConfigFile {
    fn detect(explicit_path: Option<&Path>) -> Self {
        let path = resolve_config_path(explicit_path);
        let doc = path.as_deref().and_then(load_config_file_doc);
        Self { path, doc }
    }

    fn field_source(&self, key_path: &str, env_keys: &[&str]) -> String {
        if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
            return format!("env ({env_key})");
        }

        if let Some(doc) = &self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

fn entry(
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
) -> (&'static str, String, &'static [&'static str]) {
    (key, value, env_keys)
}

fn load_config_file_doc(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
