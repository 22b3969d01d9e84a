use std::fmt;
use std::io;
use std::result::Result as StdResult;

pub type Result<T> = StdResult<T, SelectorError>;

/// Errors produced by the selector core.
///
/// The first three variants are data-plane signals with fixed routing rules:
/// they are delivered to the submitter's listener or to the event handler's
/// `*_exception` callbacks and never unwind the selector loop.
#[derive(Debug)]
pub enum SelectorError {
    /// The channel was closed before or during registration or write queueing.
    ClosedChannel,
    /// The operation was submitted after the selector left the OPEN state, or
    /// was still pending when the selector shut down.
    ClosedSelector,
    /// Interest-ops mutation was attempted on a cancelled (or never bound)
    /// selection key.
    CancelledKey,
    /// An I/O error from the OS selector or the underlying socket.
    Io(io::Error),
}

impl fmt::Display for SelectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorError::ClosedChannel => write!(f, "channel is closed"),
            SelectorError::ClosedSelector => write!(f, "selector is closed"),
            SelectorError::CancelledKey => write!(f, "selection key is cancelled"),
            SelectorError::Io(e) => write!(f, "IO Error: {}", e),
        }
    }
}

impl std::error::Error for SelectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SelectorError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SelectorError {
    fn from(err: io::Error) -> Self {
        SelectorError::Io(err)
    }
}

impl SelectorError {
    /// True for the errors that mean "this channel or key is dead", as
    /// opposed to a transport fault.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SelectorError::ClosedChannel
                | SelectorError::ClosedSelector
                | SelectorError::CancelledKey
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_condition() {
        assert_eq!(SelectorError::ClosedChannel.to_string(), "channel is closed");
        assert_eq!(
            SelectorError::ClosedSelector.to_string(),
            "selector is closed"
        );
        assert_eq!(
            SelectorError::CancelledKey.to_string(),
            "selection key is cancelled"
        );
    }

    #[test]
    fn io_errors_convert_and_chain() {
        let err: SelectorError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(err.to_string().contains("pipe"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_terminal());
    }
}
