pub mod chat_log;
pub mod conversation;
pub mod instance;
pub mod provisioning;
