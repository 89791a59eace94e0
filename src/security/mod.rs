pub mod command_executor;
pub mod credential_resolver;
pub mod redaction;

pub use command_executor::{SafeCommandExecutor, TracingSink};
pub use credential_resolver::EnvCredentialResolver;
pub use redaction::Redactor;
