use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForemanError {
    #[error("No configuration for key '{0}' in store or seed")]
    ConfigMissing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid session transition: {from} -> {to} (allowed: {allowed})")]
    InvalidTransition {
        from: String,
        to: String,
        allowed: String,
    },

    #[error("Phase {0} not initialized")]
    PhaseNotInitialized(u32),

    #[error("Worker {worker_id} failed after {attempts} attempts: {reason}")]
    WorkerFailure {
        worker_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Group {group_id} produced no terminal report within {timeout_secs}s")]
    GroupTimeout { group_id: String, timeout_secs: u64 },

    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("Capability '{name}' failed: {message}")]
    Capability { name: String, message: String },

    #[error("Durable store unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Session aborted")]
    Aborted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, ForemanError>;
