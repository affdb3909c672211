/// Result alias that carries the custom [`BeatMatrixError`] type.
pub type Result<T> = std::result::Result<T, BeatMatrixError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum BeatMatrixError {
    /// Free-form message for conditions that do not warrant their own variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration could not be parsed or serialised.
    #[error("config: {0}")]
    Json(#[from] serde_json::Error),
    /// The FFT backend rejected a buffer.
    #[error("fft: {0}")]
    Fft(#[from] realfft::FftError),
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A ring buffer read started below the oldest retained element.
    #[error("read at position {position} but oldest retained element is {oldest}")]
    Overrun { position: u64, oldest: u64 },
    /// The audio backend failed to open or read.
    #[error("audio backend: {0}")]
    Backend(String),
    /// A thread panicked while holding a shared lock.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
    /// A lifecycle call was made in the wrong state.
    #[error("cannot {operation} a pipeline that is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
}

impl BeatMatrixError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn backend<T: Into<String>>(msg: T) -> Self {
        Self::Backend(msg.into())
    }

    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

impl From<&str> for BeatMatrixError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for BeatMatrixError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_overrun_positions() {
        let err = BeatMatrixError::Overrun {
            position: 3,
            oldest: 10,
        };
        let text = err.to_string();
        assert!(text.contains('3'));
        assert!(text.contains("10"));
    }

    #[test]
    fn formats_invalid_state() {
        let err = BeatMatrixError::InvalidState {
            operation: "start",
            state: "stopped",
        };
        assert_eq!(err.to_string(), "cannot start a pipeline that is stopped");
    }

    #[test]
    fn plain_messages_convert_with_question_mark() {
        fn missing() -> Result<u8> {
            let slot: Option<u8> = None;
            let value = slot.ok_or("nothing here")?;
            Ok(value + 1)
        }
        fn formatted(count: usize) -> Result<()> {
            Err(format!("{count} left").into())
        }

        assert!(matches!(missing(), Err(BeatMatrixError::Message(m)) if m == "nothing here"));
        assert_eq!(formatted(3).unwrap_err().to_string(), "3 left");
    }
}
