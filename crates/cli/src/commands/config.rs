use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use cloudpilot_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

impl Field {
    fn new(key: &'static str, env_keys: &'static [&'static str], value: impl Into<String>) -> Self {
        Self { key, env_keys, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    render(&config, config_file_doc.as_ref(), config_file_path.as_deref())
}

pub fn render(config: &AppConfig, file_doc: Option<&Value>, file_path: Option<&Path>) -> String {
    let mut lines = vec![
        "effective config (source precedence: overrides > env > file > default):".to_string()
    ];
    for field in fields(config) {
        let source = field_source(field.key, field.env_keys, file_doc, file_path);
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }
    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field::new("database.url", &["CLOUDPILOT_DATABASE_URL"], &config.database.url),
        Field::new(
            "database.max_connections",
            &["CLOUDPILOT_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        Field::new(
            "database.timeout_secs",
            &["CLOUDPILOT_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        Field::new("llm.provider", &["CLOUDPILOT_LLM_PROVIDER"], format!("{:?}", config.llm.provider)),
        Field::new("llm.model", &["CLOUDPILOT_LLM_MODEL"], &config.llm.model),
        Field::new(
            "llm.base_url",
            &["CLOUDPILOT_LLM_BASE_URL"],
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
        ),
        Field::new(
            "llm.api_key",
            &["CLOUDPILOT_LLM_API_KEY", "OPENAI_API_KEY"],
            redact_optional(config.llm.api_key.as_ref()),
        ),
        Field::new("llm.max_tokens", &["CLOUDPILOT_LLM_MAX_TOKENS"], config.llm.max_tokens.to_string()),
        Field::new("llm.temperature", &[], config.llm.temperature.to_string()),
        Field::new(
            "compute.backend",
            &["CLOUDPILOT_COMPUTE_BACKEND"],
            format!("{:?}", config.compute.backend),
        ),
        Field::new(
            "compute.endpoint",
            &["CLOUDPILOT_COMPUTE_ENDPOINT"],
            config.compute.endpoint.as_deref().unwrap_or("<unset>"),
        ),
        Field::new(
            "compute.api_token",
            &["CLOUDPILOT_COMPUTE_API_TOKEN"],
            redact_optional(config.compute.api_token.as_ref()),
        ),
        Field::new("compute.region", &["CLOUDPILOT_COMPUTE_REGION"], &config.compute.region),
        Field::new(
            "agent.max_round_trips",
            &["CLOUDPILOT_AGENT_MAX_ROUND_TRIPS"],
            config.agent.max_round_trips.to_string(),
        ),
        Field::new(
            "agent.request_timeout_secs",
            &["CLOUDPILOT_AGENT_REQUEST_TIMEOUT_SECS"],
            config.agent.request_timeout_secs.to_string(),
        ),
        Field::new(
            "agent.session_idle_secs",
            &["CLOUDPILOT_AGENT_SESSION_IDLE_SECS"],
            config.agent.session_idle_secs.to_string(),
        ),
        Field::new(
            "agent.system_prompt_path",
            &["CLOUDPILOT_AGENT_SYSTEM_PROMPT_PATH"],
            config
                .agent
                .system_prompt_path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<built-in>".to_string()),
        ),
        Field::new("server.bind_address", &["CLOUDPILOT_SERVER_BIND_ADDRESS"], &config.server.bind_address),
        Field::new("server.port", &["CLOUDPILOT_SERVER_PORT"], config.server.port.to_string()),
        Field::new(
            "whatsapp.enabled",
            &["CLOUDPILOT_WHATSAPP_ENABLED"],
            config.whatsapp.enabled.to_string(),
        ),
        Field::new(
            "whatsapp.access_token",
            &["CLOUDPILOT_WHATSAPP_ACCESS_TOKEN", "WHATSAPP_ACCESS_TOKEN"],
            redact(&config.whatsapp.access_token),
        ),
        Field::new(
            "whatsapp.verify_token",
            &["CLOUDPILOT_WHATSAPP_VERIFY_TOKEN", "META_VERIFY_TOKEN"],
            redact(&config.whatsapp.verify_token),
        ),
        Field::new(
            "logging.level",
            &["CLOUDPILOT_LOGGING_LEVEL", "CLOUDPILOT_LOG_LEVEL"],
            &config.logging.level,
        ),
        Field::new(
            "logging.format",
            &["CLOUDPILOT_LOGGING_FORMAT", "CLOUDPILOT_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("cloudpilot.toml"), PathBuf::from("config/cloudpilot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
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

fn redact_optional(secret: Option<&SecretString>) -> String {
    secret.map(redact).unwrap_or_else(|| "<unset>".to_string())
}

fn redact(secret: &SecretString) -> String {
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }
    "<redacted>".to_string()
}
