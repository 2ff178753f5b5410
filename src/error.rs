use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("no response received within {0} ms")]
    ResponseTimeout(u64),

    #[error("messaging error: {0}")]
    Messaging(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, MeshError>;
