use thiserror::Error;

#[derive(Error, Debug)]
pub enum MuxError {
    /// Malformed parameter-set record or invalid configuration value.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transport callback failure. End of stream is never reported here.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Container data could not be written or parsed.
    #[error("format error: {0}")]
    Format(String),

    /// Operation invoked outside its valid lifecycle state.
    #[error("state error: cannot {operation} while {state}")]
    State {
        operation: &'static str,
        state: String,
    },
}

impl MuxError {
    pub(crate) fn state(operation: &'static str, state: impl std::fmt::Debug) -> Self {
        MuxError::State {
            operation,
            state: format!("{:?}", state),
        }
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
