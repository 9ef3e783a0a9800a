use std::env;
use std::sync::{Mutex, OnceLock};

use cloudpilot_cli::commands::{ask, config, doctor, migrate};
use serde_json::Value;

const VALID_ENV: &[(&str, &str)] = &[
    ("CLOUDPILOT_DATABASE_URL", "sqlite::memory:"),
    ("CLOUDPILOT_LLM_API_KEY", "sk-test-secret"),
    ("CLOUDPILOT_COMPUTE_BACKEND", "memory"),
];

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(VALID_ENV, || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(
            payload["message"],
            "applied pending migrations; chat log holds 0 exchange(s)"
        );
    });
}

#[test]
fn migrate_returns_config_failure_without_api_key() {
    with_env(&[("CLOUDPILOT_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn config_attributes_env_sources_and_redacts_secrets() {
    with_env(VALID_ENV, || {
        let output = config::run();

        assert!(output.contains("- database.url = sqlite::memory: (source: env (CLOUDPILOT_DATABASE_URL))"));
        assert!(output.contains("- llm.api_key = sk-*** (source: env (CLOUDPILOT_LLM_API_KEY))"));
        assert!(output.contains("- agent.max_round_trips = 10 (source: default)"));
        assert!(!output.contains("sk-test-secret"));
    });
}

#[test]
fn doctor_passes_with_memory_backend() {
    with_env(VALID_ENV, || {
        let report: Value = serde_json::from_str(&doctor::run(true)).expect("doctor json");

        assert_eq!(report["overall_status"], "pass");
        let names: Vec<&str> = report["checks"]
            .as_array()
            .expect("checks")
            .iter()
            .filter_map(|check| check["name"].as_str())
            .collect();
        assert_eq!(names, vec!["config_validation", "agent_assembly", "database_connectivity"]);
        assert!(report["checks"][1]["details"]
            .as_str()
            .unwrap_or_default()
            .starts_with("8 operations on in-memory backend"));
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_invalid() {
    with_env(&[("CLOUDPILOT_COMPUTE_BACKEND", "http"), ("CLOUDPILOT_LLM_API_KEY", "sk-x")], || {
        let output = doctor::run(false);

        assert!(output.starts_with("doctor: one or more readiness checks failed"));
        assert!(output.contains("- [fail] config_validation:"));
        assert!(output.contains("- [skip] agent_assembly:"));
        assert!(output.contains("- [skip] database_connectivity:"));
    });
}

#[test]
fn ask_reports_unreachable_assistant_as_answer() {
    let vars = [VALID_ENV, &[("CLOUDPILOT_LLM_BASE_URL", "http://127.0.0.1:9/v1")]].concat();
    with_env(&vars, || {
        let result = ask::run("ops", "list my instances");
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "ask");
        assert_eq!(
            payload["message"],
            "❌ Error: the assistant is unavailable right now. Please try again later."
        );
    });
}

#[test]
fn ask_returns_config_failure_without_api_key() {
    with_env(&[], || {
        let result = ask::run("ops", "hello");
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "CLOUDPILOT_DATABASE_URL",
        "CLOUDPILOT_DATABASE_MAX_CONNECTIONS",
        "CLOUDPILOT_DATABASE_TIMEOUT_SECS",
        "CLOUDPILOT_LLM_PROVIDER",
        "CLOUDPILOT_LLM_API_KEY",
        "OPENAI_API_KEY",
        "CLOUDPILOT_LLM_BASE_URL",
        "CLOUDPILOT_LLM_MODEL",
        "CLOUDPILOT_LLM_MAX_TOKENS",
        "CLOUDPILOT_LLM_TIMEOUT_SECS",
        "CLOUDPILOT_COMPUTE_BACKEND",
        "CLOUDPILOT_COMPUTE_ENDPOINT",
        "CLOUDPILOT_COMPUTE_API_TOKEN",
        "CLOUDPILOT_COMPUTE_REGION",
        "CLOUDPILOT_AGENT_MAX_ROUND_TRIPS",
        "CLOUDPILOT_AGENT_REQUEST_TIMEOUT_SECS",
        "CLOUDPILOT_AGENT_SYSTEM_PROMPT_PATH",
        "CLOUDPILOT_WHATSAPP_ENABLED",
        "CLOUDPILOT_LOGGING_LEVEL",
        "CLOUDPILOT_LOGGING_FORMAT",
        "CLOUDPILOT_LOG_LEVEL",
        "CLOUDPILOT_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
