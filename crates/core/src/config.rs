use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub compute: ComputeConfig,
    pub agent: AgentConfig,
    pub server: ServerConfig,
    pub whatsapp: WhatsAppConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ComputeConfig {
    pub backend: ComputeBackend,
    pub endpoint: Option<String>,
    pub api_token: Option<SecretString>,
    pub region: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub max_round_trips: u32,
    pub request_timeout_secs: u64,
    pub session_idle_secs: u64,
    pub system_prompt_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WhatsAppConfig {
    pub enabled: bool,
    pub access_token: SecretString,
    pub phone_number_id: String,
    pub verify_token: SecretString,
    pub api_base_url: String,
    pub chunk_size: usize,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeBackend {
    Http,
    Memory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub compute_backend: Option<ComputeBackend>,
    pub compute_endpoint: Option<String>,
    pub compute_api_token: Option<String>,
    pub max_round_trips: Option<u32>,
    pub whatsapp_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://cloudpilot.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::OpenAi,
                api_key: None,
                base_url: Some("https://api.openai.com/v1".to_string()),
                model: "gpt-4".to_string(),
                max_tokens: 4096,
                temperature: 0.0,
                timeout_secs: 60,
            },
            compute: ComputeConfig {
                backend: ComputeBackend::Memory,
                endpoint: None,
                api_token: None,
                region: "ap-south-1".to_string(),
                timeout_secs: 30,
            },
            agent: AgentConfig {
                max_round_trips: 10,
                request_timeout_secs: 120,
                session_idle_secs: 3600,
                system_prompt_path: None,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            whatsapp: WhatsAppConfig {
                enabled: false,
                access_token: String::new().into(),
                phone_number_id: String::new(),
                verify_token: String::new().into(),
                api_base_url: "https://graph.facebook.com/v16.0".to_string(),
                chunk_size: 1500,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for ComputeBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::Validation(format!(
                "unsupported compute backend `{other}` (expected http|memory)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("cloudpilot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(compute) = patch.compute {
            if let Some(backend) = compute.backend {
                self.compute.backend = backend;
            }
            if let Some(endpoint) = compute.endpoint {
                self.compute.endpoint = Some(endpoint);
            }
            if let Some(api_token) = compute.api_token {
                self.compute.api_token = Some(secret_value(api_token));
            }
            if let Some(region) = compute.region {
                self.compute.region = region;
            }
            if let Some(timeout_secs) = compute.timeout_secs {
                self.compute.timeout_secs = timeout_secs;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(max_round_trips) = agent.max_round_trips {
                self.agent.max_round_trips = max_round_trips;
            }
            if let Some(request_timeout_secs) = agent.request_timeout_secs {
                self.agent.request_timeout_secs = request_timeout_secs;
            }
            if let Some(session_idle_secs) = agent.session_idle_secs {
                self.agent.session_idle_secs = session_idle_secs;
            }
            if let Some(system_prompt_path) = agent.system_prompt_path {
                self.agent.system_prompt_path = Some(system_prompt_path);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(whatsapp) = patch.whatsapp {
            if let Some(enabled) = whatsapp.enabled {
                self.whatsapp.enabled = enabled;
            }
            if let Some(access_token) = whatsapp.access_token {
                self.whatsapp.access_token = secret_value(access_token);
            }
            if let Some(phone_number_id) = whatsapp.phone_number_id {
                self.whatsapp.phone_number_id = phone_number_id;
            }
            if let Some(verify_token) = whatsapp.verify_token {
                self.whatsapp.verify_token = secret_value(verify_token);
            }
            if let Some(api_base_url) = whatsapp.api_base_url {
                self.whatsapp.api_base_url = api_base_url;
            }
            if let Some(chunk_size) = whatsapp.chunk_size {
                self.whatsapp.chunk_size = chunk_size;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CLOUDPILOT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CLOUDPILOT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CLOUDPILOT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CLOUDPILOT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CLOUDPILOT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CLOUDPILOT_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        let llm_api_key =
            read_env("CLOUDPILOT_LLM_API_KEY").or_else(|| read_env("OPENAI_API_KEY"));
        if let Some(value) = llm_api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CLOUDPILOT_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CLOUDPILOT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CLOUDPILOT_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("CLOUDPILOT_LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("CLOUDPILOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CLOUDPILOT_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CLOUDPILOT_COMPUTE_BACKEND") {
            self.compute.backend = value.parse()?;
        }
        if let Some(value) = read_env("CLOUDPILOT_COMPUTE_ENDPOINT") {
            self.compute.endpoint = Some(value);
        }
        if let Some(value) = read_env("CLOUDPILOT_COMPUTE_API_TOKEN") {
            self.compute.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("CLOUDPILOT_COMPUTE_REGION") {
            self.compute.region = value;
        }
        if let Some(value) = read_env("CLOUDPILOT_COMPUTE_TIMEOUT_SECS") {
            self.compute.timeout_secs = parse_u64("CLOUDPILOT_COMPUTE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CLOUDPILOT_AGENT_MAX_ROUND_TRIPS") {
            self.agent.max_round_trips = parse_u32("CLOUDPILOT_AGENT_MAX_ROUND_TRIPS", &value)?;
        }
        if let Some(value) = read_env("CLOUDPILOT_AGENT_REQUEST_TIMEOUT_SECS") {
            self.agent.request_timeout_secs =
                parse_u64("CLOUDPILOT_AGENT_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CLOUDPILOT_AGENT_SESSION_IDLE_SECS") {
            self.agent.session_idle_secs =
                parse_u64("CLOUDPILOT_AGENT_SESSION_IDLE_SECS", &value)?;
        }
        if let Some(value) = read_env("CLOUDPILOT_AGENT_SYSTEM_PROMPT_PATH") {
            self.agent.system_prompt_path = Some(PathBuf::from(value));
        }

        if let Some(value) = read_env("CLOUDPILOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CLOUDPILOT_SERVER_PORT") {
            self.server.port = parse_u16("CLOUDPILOT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CLOUDPILOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CLOUDPILOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("CLOUDPILOT_WHATSAPP_ENABLED") {
            self.whatsapp.enabled = parse_bool("CLOUDPILOT_WHATSAPP_ENABLED", &value)?;
        }
        let access_token = read_env("CLOUDPILOT_WHATSAPP_ACCESS_TOKEN")
            .or_else(|| read_env("WHATSAPP_ACCESS_TOKEN"));
        if let Some(value) = access_token {
            self.whatsapp.access_token = secret_value(value);
        }
        let phone_number_id = read_env("CLOUDPILOT_WHATSAPP_PHONE_NUMBER_ID")
            .or_else(|| read_env("WHATSAPP_PHONE_NUMBER_ID"));
        if let Some(value) = phone_number_id {
            self.whatsapp.phone_number_id = value;
        }
        let verify_token =
            read_env("CLOUDPILOT_WHATSAPP_VERIFY_TOKEN").or_else(|| read_env("META_VERIFY_TOKEN"));
        if let Some(value) = verify_token {
            self.whatsapp.verify_token = secret_value(value);
        }
        if let Some(value) = read_env("CLOUDPILOT_WHATSAPP_API_BASE_URL") {
            self.whatsapp.api_base_url = value;
        }
        if let Some(value) = read_env("CLOUDPILOT_WHATSAPP_CHUNK_SIZE") {
            self.whatsapp.chunk_size = parse_usize("CLOUDPILOT_WHATSAPP_CHUNK_SIZE", &value)?;
        }

        let log_level =
            read_env("CLOUDPILOT_LOGGING_LEVEL").or_else(|| read_env("CLOUDPILOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CLOUDPILOT_LOGGING_FORMAT").or_else(|| read_env("CLOUDPILOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(compute_backend) = overrides.compute_backend {
            self.compute.backend = compute_backend;
        }
        if let Some(compute_endpoint) = overrides.compute_endpoint {
            self.compute.endpoint = Some(compute_endpoint);
        }
        if let Some(compute_api_token) = overrides.compute_api_token {
            self.compute.api_token = Some(secret_value(compute_api_token));
        }
        if let Some(max_round_trips) = overrides.max_round_trips {
            self.agent.max_round_trips = max_round_trips;
        }
        if let Some(whatsapp_enabled) = overrides.whatsapp_enabled {
            self.whatsapp.enabled = whatsapp_enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_compute(&self.compute)?;
        validate_agent(&self.agent)?;
        validate_server(&self.server)?;
        validate_whatsapp(&self.whatsapp)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("cloudpilot.toml"), PathBuf::from("config/cloudpilot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    let missing_base_url =
        llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
    if missing_base_url {
        return Err(ConfigError::Validation("llm.base_url is required".to_string()));
    }

    if llm.provider == LlmProvider::OpenAi {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.api_key is required for the openai provider (set CLOUDPILOT_LLM_API_KEY or OPENAI_API_KEY)"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_compute(compute: &ComputeConfig) -> Result<(), ConfigError> {
    if compute.region.trim().is_empty() {
        return Err(ConfigError::Validation("compute.region must not be empty".to_string()));
    }

    if compute.timeout_secs == 0 || compute.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "compute.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if compute.backend == ComputeBackend::Http {
        let Some(endpoint) = compute.endpoint.as_deref() else {
            return Err(ConfigError::Validation(
                "compute.endpoint is required for the http backend".to_string(),
            ));
        };
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::Validation(
                "compute.endpoint must start with http:// or https://".to_string(),
            ));
        }

        let missing_token = compute
            .api_token
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_token {
            return Err(ConfigError::Validation(
                "compute.api_token is required for the http backend".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.max_round_trips == 0 || agent.max_round_trips > 100 {
        return Err(ConfigError::Validation(
            "agent.max_round_trips must be in range 1..=100".to_string(),
        ));
    }

    if agent.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "agent.request_timeout_secs must be greater than zero".to_string(),
        ));
    }

    if agent.session_idle_secs == 0 {
        return Err(ConfigError::Validation(
            "agent.session_idle_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_whatsapp(whatsapp: &WhatsAppConfig) -> Result<(), ConfigError> {
    if whatsapp.chunk_size == 0 || whatsapp.chunk_size > 4096 {
        return Err(ConfigError::Validation(
            "whatsapp.chunk_size must be in range 1..=4096".to_string(),
        ));
    }

    if !whatsapp.enabled {
        return Ok(());
    }

    if whatsapp.access_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "whatsapp.access_token is required when whatsapp.enabled is true".to_string(),
        ));
    }
    if whatsapp.phone_number_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "whatsapp.phone_number_id is required when whatsapp.enabled is true".to_string(),
        ));
    }
    if whatsapp.verify_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "whatsapp.verify_token is required when whatsapp.enabled is true".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    compute: Option<ComputePatch>,
    agent: Option<AgentPatch>,
    server: Option<ServerPatch>,
    whatsapp: Option<WhatsAppPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ComputePatch {
    backend: Option<ComputeBackend>,
    endpoint: Option<String>,
    api_token: Option<String>,
    region: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    max_round_trips: Option<u32>,
    request_timeout_secs: Option<u64>,
    session_idle_secs: Option<u64>,
    system_prompt_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsAppPatch {
    enabled: Option<bool>,
    access_token: Option<String>,
    phone_number_id: Option<String>,
    verify_token: Option<String>,
    api_base_url: Option<String>,
    chunk_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ComputeBackend, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const TOUCHED_VARS: &[&str] = &[
        "CLOUDPILOT_LLM_API_KEY",
        "OPENAI_API_KEY",
        "CLOUDPILOT_DATABASE_URL",
        "CLOUDPILOT_LOG_LEVEL",
        "CLOUDPILOT_LOG_FORMAT",
        "CLOUDPILOT_COMPUTE_BACKEND",
        "CLOUDPILOT_AGENT_MAX_ROUND_TRIPS",
        "TEST_LLM_API_KEY",
    ];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(TOUCHED_VARS);

        env::set_var("TEST_LLM_API_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("cloudpilot.toml");
            fs::write(
                &path,
                r#"
[llm]
api_key = "${TEST_LLM_API_KEY}"
model = "gpt-4o"

[agent]
max_round_trips = 6
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "api key should be interpolated from environment",
            )?;
            ensure(config.llm.model == "gpt-4o", "model should come from the file")?;
            ensure(config.agent.max_round_trips == 6, "round trip bound should come from file")?;
            Ok(())
        })();

        clear_vars(TOUCHED_VARS);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(TOUCHED_VARS);

        env::set_var("OPENAI_API_KEY", "sk-test");
        env::set_var("CLOUDPILOT_LOG_LEVEL", "warn");
        env::set_var("CLOUDPILOT_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(TOUCHED_VARS);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(TOUCHED_VARS);

        env::set_var("CLOUDPILOT_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("CLOUDPILOT_LLM_API_KEY", "sk-from-env");
        env::set_var("CLOUDPILOT_AGENT_MAX_ROUND_TRIPS", "4");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("cloudpilot.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[llm]
api_key = "sk-from-file"

[agent]
max_round_trips = 8

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "env api key should win over file and defaults",
            )?;
            ensure(config.agent.max_round_trips == 4, "env round trip bound should win over file")?;
            Ok(())
        })();

        clear_vars(TOUCHED_VARS);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(TOUCHED_VARS);

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(TOUCHED_VARS);
        result
    }

    #[test]
    fn http_compute_backend_requires_endpoint_and_token() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(TOUCHED_VARS);

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    llm_api_key: Some("sk-test".to_string()),
                    compute_backend: Some(ComputeBackend::Http),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            }) {
                Ok(_) => return Err("http backend without endpoint must fail".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::Validation(ref message) if message.contains("compute.endpoint")),
                "validation failure should mention compute.endpoint",
            )?;

            let config = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    llm_api_key: Some("sk-test".to_string()),
                    compute_backend: Some(ComputeBackend::Http),
                    compute_endpoint: Some("https://compute.internal".to_string()),
                    compute_api_token: Some("token".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.compute.region == "ap-south-1", "region should keep its default")
        })();

        clear_vars(TOUCHED_VARS);
        result
    }

    #[test]
    fn whatsapp_requires_credentials_when_enabled() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(TOUCHED_VARS);

        let result = (|| -> Result<(), String> {
            let outcome = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    llm_api_key: Some("sk-test".to_string()),
                    whatsapp_enabled: Some(true),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            });
            ensure(
                matches!(outcome, Err(ConfigError::Validation(ref message)) if message.contains("whatsapp.access_token")),
                "enabled whatsapp without token should fail validation",
            )
        })();

        clear_vars(TOUCHED_VARS);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(TOUCHED_VARS);

        env::set_var("CLOUDPILOT_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            ensure(
                matches!(config.compute.backend, ComputeBackend::Memory),
                "default compute backend should be memory",
            )?;
            Ok(())
        })();

        clear_vars(TOUCHED_VARS);
        result
    }
}
