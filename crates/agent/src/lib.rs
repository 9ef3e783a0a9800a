//! Agent runtime: the conversational front-end over the compute gateway.
//!
//! One top-level chat message drives one bounded DECIDE/ACT loop:
//! 1. **Decide** (`llm`) - the decider sees the turn history and either answers
//!    or requests operations
//! 2. **Act** (`tools`) - requested operations run against the resource gateway
//!    and their results are fed back as tool-result turns
//! 3. **Provision** (`sessions`, `conversation`) - instance creation accumulates
//!    slot values across messages, per user, until a launch succeeds
//!
//! # Key Types
//!
//! - `AgentRuntime` - the orchestration loop (`handle_message`)
//! - `Decider` - pluggable next-step capability (OpenAI-compatible by default)
//! - `ActionDispatcher` / `ToolRegistry` - operation routing
//! - `SlotFillingSessionManager` - per-user provisioning sessions
//!
//! The decider never launches anything by itself. A launch happens only when
//! every required slot holds a value, and the session is cleared only once the
//! provider confirms the launch.

pub mod assembly;
pub mod conversation;
pub mod llm;
pub mod prompt;
pub mod runtime;
pub mod sessions;
pub mod tools;

pub use assembly::{assemble, assemble_with, AgentStack, AssemblyError};
pub use conversation::{FragmentExtractor, KeywordFragmentExtractor};
pub use llm::{Decider, DeciderError, OpenAiDecider};
pub use prompt::{load_system_prompt, PromptError, DEFAULT_SYSTEM_PROMPT};
pub use runtime::{AgentRuntime, OrchestrationError, RuntimeSettings, TracingAuditSink};
pub use sessions::{ProvisionOutcome, SessionStore, SlotFillingSessionManager};
pub use tools::{ActionContext, ActionDispatcher, Tool, ToolError, ToolRegistry, ToolSpec};
