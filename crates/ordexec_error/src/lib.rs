use std::error::Error;
use std::fmt;

pub type Result<T, E = OrdexecError> = std::result::Result<T, E>;

/// Coarse classification for errors.
///
/// Most call sites only care about `Cancelled`, which needs to be
/// distinguishable from ordinary execution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Other,
    Cancelled,
    OutOfMemory,
    Io,
    Invariant,
}

#[derive(Debug)]
pub struct OrdexecError {
    msg: String,
    kind: ErrorKind,
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl OrdexecError {
    pub fn new(msg: impl Into<String>) -> Self {
        OrdexecError {
            msg: msg.into(),
            kind: ErrorKind::Other,
            source: None,
        }
    }

    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        OrdexecError {
            msg: msg.into(),
            kind: ErrorKind::Other,
            source: Some(source),
        }
    }

    pub fn with_kind(msg: impl Into<String>, kind: ErrorKind) -> Self {
        OrdexecError {
            msg: msg.into(),
            kind,
            source: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::with_kind("Execution cancelled", ErrorKind::Cancelled)
    }

    pub fn out_of_memory(msg: impl Into<String>) -> Self {
        Self::with_kind(msg, ErrorKind::OutOfMemory)
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::with_kind(msg, ErrorKind::Invariant)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl fmt::Display for OrdexecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl Error for OrdexecError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.source {
            Some(source) => Some(source.as_ref()),
            None => None,
        }
    }
}

impl From<std::io::Error> for OrdexecError {
    fn from(value: std::io::Error) -> Self {
        OrdexecError {
            msg: "IO error".to_string(),
            kind: ErrorKind::Io,
            source: Some(Box::new(value)),
        }
    }
}

impl From<std::fmt::Error> for OrdexecError {
    fn from(value: std::fmt::Error) -> Self {
        Self::with_source("Format error", Box::new(value))
    }
}

pub trait ResultExt<T, E> {
    /// Wrap an error with additional context.
    fn context(self, msg: &'static str) -> Result<T>;

    /// Wrap an error with additional context built lazily.
    fn context_fn<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Error + Send + Sync + 'static> ResultExt<T, E> for Result<T, E> {
    fn context(self, msg: &'static str) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(OrdexecError::with_source(msg, Box::new(e))),
        }
    }

    fn context_fn<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(OrdexecError::with_source(f(), Box::new(e))),
        }
    }
}

pub trait OptionExt<T> {
    /// Return an error with a "field required" message if the option is None.
    fn required(self, field: &'static str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required(self, field: &'static str) -> Result<T> {
        match self {
            Some(v) => Ok(v),
            None => Err(OrdexecError::new(format!("Missing required field: {field}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_distinguishable() {
        let err = OrdexecError::cancelled();
        assert!(err.is_cancelled());

        let err = OrdexecError::new("something else");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn context_wraps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let res: Result<(), _> = Err(io);
        let err = res.context("opening spill file").unwrap_err();
        assert!(err.to_string().contains("opening spill file"));
        assert!(err.source().is_some());
    }
}
