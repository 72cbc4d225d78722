use thiserror::Error;

/// Failure kinds the core distinguishes. None of them is fatal: each one has a
/// fallback at the call site and is logged there.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("all transports failed for `{command}`: {reasons}")]
    TransportFailure { command: String, reasons: String },

    #[error("layout `{name}` could not be loaded: {reason}")]
    LayoutLoadFailure { name: String, reason: String },

    #[error("invalid {element}: {reason}")]
    GeometryInvalid { element: String, reason: String },

    #[error("no standable position within {radius} blocks of ({x}, {y}, {z})")]
    NoSafeSpotFound { x: i64, y: i64, z: i64, radius: i64 },

    #[error("world query unavailable: {0}")]
    WorldQueryUnavailable(String),

    #[error("store: {0}")]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    pub fn layout(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::LayoutLoadFailure {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn geometry(element: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::GeometryInvalid {
            element: element.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
