use std::sync::Arc;

use cloudpilot_agent::{assemble, TracingAuditSink};
use cloudpilot_core::config::{AppConfig, LoadOptions};

use crate::commands::CommandResult;

/// Runs a single exchange against a freshly assembled runtime.
///
/// Sessions live only as long as the process, so a partial launch request
/// cannot be continued by a later `ask`.
pub fn run(user_id: &str, message: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "ask",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let stack = match assemble(&config, Arc::new(TracingAuditSink)) {
        Ok(stack) => stack,
        Err(error) => {
            return CommandResult::failure("ask", "agent_assembly", error.to_string(), 3);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "ask",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                4,
            );
        }
    };

    let answer = runtime.block_on(stack.runtime.handle_message(user_id, message));
    CommandResult::success("ask", answer)
}
