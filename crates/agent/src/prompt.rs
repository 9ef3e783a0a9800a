use std::path::Path;

use thiserror::Error;

pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are an operations assistant that manages cloud virtual machines for the user.

Use the available operations to answer. Never invent instance ids, addresses or states;
call an operation and report what it returns.

- list_instances: show every instance with its name, id, state and addresses.
- describe_instance: details for one instance. Accepts an instance id, Name tag,
  private IP or public IP.
- start_instance / stop_instance: change the power state of one instance, identified
  the same way as describe_instance.
- create_instance: pass the user's latest message as `request`. When it returns a
  question, relay that question to the user verbatim and wait for the answer. Only
  report a launch when it returns a success message.
- list_security_groups, list_key_pairs, list_volume_types: show the choices available
  when the user is deciding how to configure a new instance.

Keep answers short. Report failures plainly with the text the operation returned.";

#[derive(Debug, Error)]
#[error("failed to read system prompt from `{path}`: {source}")]
pub struct PromptError {
    path: String,
    #[source]
    source: std::io::Error,
}

/// Reads the prompt file when one is configured, otherwise returns the
/// built-in prompt. An empty file falls back to the built-in prompt.
pub fn load_system_prompt(path: Option<&Path>) -> Result<String, PromptError> {
    let Some(path) = path else {
        return Ok(DEFAULT_SYSTEM_PROMPT.to_string());
    };
    let content = std::fs::read_to_string(path)
        .map_err(|source| PromptError { path: path.display().to_string(), source })?;
    if content.trim().is_empty() {
        return Ok(DEFAULT_SYSTEM_PROMPT.to_string());
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{load_system_prompt, DEFAULT_SYSTEM_PROMPT};

    #[test]
    fn missing_path_uses_builtin_prompt() {
        assert_eq!(load_system_prompt(None).expect("prompt"), DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn configured_file_replaces_builtin_prompt() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "You only manage staging machines.").expect("write");

        let prompt = load_system_prompt(Some(file.path())).expect("prompt");
        assert_eq!(prompt, "You only manage staging machines.");
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let error = load_system_prompt(Some(std::path::Path::new("/nonexistent/prompt.txt")))
            .expect_err("missing file");
        assert!(error.to_string().contains("/nonexistent/prompt.txt"));
    }
}
