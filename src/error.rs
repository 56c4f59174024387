//! INDI error types.

/// Errors produced by the INDI client engine.
#[derive(Debug, thiserror::Error)]
pub enum IndiError {
    /// A single wire message could not be decoded. The stream itself
    /// remains usable and the next message can still be read.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The underlying transport failed (connection reset, stream closed).
    #[error("transport error: {0}")]
    Transport(String),

    /// The outbound channel is gone; the command was dropped.
    #[error("outbound channel closed")]
    ChannelClosed,

    /// Baud rate is not one of the supported serial rates.
    #[error("unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),

    /// Serial port name is blank.
    #[error("serial port must not be blank")]
    BlankSerialPort,
}

/// Result type for INDI operations.
pub type IndiResult<T> = Result<T, IndiError>;

impl From<quick_xml::Error> for IndiError {
    fn from(err: quick_xml::Error) -> Self {
        match err {
            quick_xml::Error::Io(e) => IndiError::Transport(e.to_string()),
            other => IndiError::MalformedMessage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndiError::MalformedMessage("missing device attribute".to_string());
        assert_eq!(err.to_string(), "malformed message: missing device attribute");

        let err = IndiError::UnsupportedBaudRate(4800);
        assert_eq!(err.to_string(), "unsupported baud rate: 4800");

        let err = IndiError::BlankSerialPort;
        assert!(err.to_string().contains("blank"));
    }
}
