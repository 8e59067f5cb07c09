use thiserror::Error;

#[derive(Debug, Error)]
pub enum DroidClawError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("SSE parsing error: {0}")]
    SseParsing(String),

    #[error("Perception error: {0}")]
    Perception(String),

    /// No device is connected, or the backend binary could not be reached.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A device command ran but failed (bad package, rejected input).
    #[error("Device command failed: {0}")]
    DeviceCommand(String),

    /// The model's tool call does not fit the action schema.
    #[error("Malformed action: {0}")]
    MalformedAction(String),

    /// A cell label that does not parse or falls outside the current grid.
    #[error("Invalid cell: {0}")]
    InvalidCell(String),

    #[error("No action chosen: model replied without a tool call")]
    NoActionChosen,

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl DroidClawError {
    /// Errors that only concern interpreting a single turn. The loop records
    /// them and keeps going; everything else ends the session.
    pub fn is_turn_local(&self) -> bool {
        matches!(
            self,
            DroidClawError::MalformedAction(_)
                | DroidClawError::InvalidCell(_)
                | DroidClawError::NoActionChosen
        )
    }
}

impl serde::Serialize for DroidClawError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type DroidClawResult<T> = Result<T, DroidClawError>;
