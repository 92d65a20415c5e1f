use std::fmt;

use failure::Backtrace;
use failure::Context;
use failure::Fail;
use zookeeper::ZkError;

/// Error information returned by the `ZookeeperClient` API in case of errors.
#[derive(Debug)]
pub struct Error(Context<ErrorKind>);

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.0.get_context().clone()
    }

    /// True for errors that abort a single operation on an otherwise usable client.
    ///
    /// Construction failures (`Connect`, `SpawnThread`) are the only kinds excluded.
    pub fn is_coordination_failure(&self) -> bool {
        match self.0.get_context() {
            ErrorKind::Backend(_) => true,
            ErrorKind::Closed => true,
            ErrorKind::Decode(_) => true,
            ErrorKind::Encode(_) => true,
            ErrorKind::Connect => false,
            ErrorKind::SpawnThread(_) => false,
        }
    }

    /// Return the zookeeper error that caused this error, if any.
    pub fn zk_error(&self) -> Option<ZkError> {
        self.0
            .cause()
            .and_then(|cause| cause.downcast_ref::<ZkError>())
            .cloned()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error(Context::new(kind))
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error(inner)
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.0.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.0.backtrace()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Exhaustive list of possible errors emitted by this crate.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "{} failed due to zookeeper error", _0)]
    Backend(&'static str),

    #[fail(display = "zookeeper client is closed")]
    Closed,

    #[fail(display = "connection to zookeeper failed")]
    Connect,

    #[fail(display = "failed to decode {}", _0)]
    Decode(&'static str),

    #[fail(display = "failed to encode {}", _0)]
    Encode(&'static str),

    #[fail(display = "unable to spawn new thread for '{}'", _0)]
    SpawnThread(&'static str),
}

/// Short form alias for functions returning `Error`s.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Render an error and all its causes as a single line for logging.
pub fn failure_chain(error: &dyn Fail) -> String {
    error
        .iter_chain()
        .map(|fail| fail.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}

#[cfg(test)]
mod tests {
    use failure::ResultExt;
    use zookeeper::ZkError;

    use super::failure_chain;
    use super::Error;
    use super::ErrorKind;
    use super::Result;

    fn backend_error() -> Result<()> {
        Err(ZkError::ConnectionLoss).context(ErrorKind::Backend("node lookup"))?;
        Ok(())
    }

    #[test]
    fn backend_errors_carry_the_zookeeper_cause() {
        let error = backend_error().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Backend("node lookup"));
        assert_eq!(error.zk_error(), Some(ZkError::ConnectionLoss));
        assert!(error.is_coordination_failure());
    }

    #[test]
    fn construction_errors_are_not_coordination_failures() {
        let error: Error = ErrorKind::Connect.into();
        assert!(!error.is_coordination_failure());
        assert_eq!(error.zk_error(), None);
    }

    #[test]
    fn chain_includes_causes() {
        let error = backend_error().unwrap_err();
        let chain = failure_chain(&error);
        assert!(chain.starts_with("node lookup failed due to zookeeper error: "));
        assert!(chain.len() > "node lookup failed due to zookeeper error: ".len());
    }
}
