use crate::errors::types::Error;
use std::fmt;

/// Context information for an error
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Component where the error occurred
    pub component: String,
    /// Operation that was being performed
    pub operation: String,
    /// Additional context information
    pub details: Option<String>,
}

impl ErrorContext {
    pub fn new<S: Into<String>, T: Into<String>>(component: S, operation: T) -> Self {
        ErrorContext {
            component: component.into(),
            operation: operation.into(),
            details: None,
        }
    }

    pub fn with_details<S: Into<String>>(mut self, details: S) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.component, self.operation)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Attach component/operation context to infra errors.
///
/// Config and spawn errors keep their variant so callers can still match on
/// them; everything else collapses into [`Error::Custom`].
pub trait ErrorExt<T> {
    fn context(self, ctx: ErrorContext) -> std::result::Result<T, Error>;

    fn with_context<S: Into<String>, U: Into<String>>(
        self,
        component: S,
        operation: U,
    ) -> std::result::Result<T, Error>;
}

fn annotate(err: Error, ctx: &ErrorContext) -> Error {
    match err {
        Error::Config(msg) => Error::Config(format!("{} [{}]", msg, ctx)),
        Error::ThreadSpawn(msg) => Error::ThreadSpawn(format!("{} [{}]", msg, ctx)),
        Error::NoWorkerAvailable(msg) => Error::NoWorkerAvailable(format!("{} [{}]", msg, ctx)),
        other => Error::Custom(format!("{} [{}]", other, ctx)),
    }
}

impl<T> ErrorExt<T> for std::result::Result<T, Error> {
    fn context(self, ctx: ErrorContext) -> std::result::Result<T, Error> {
        self.map_err(|e| annotate(e, &ctx))
    }

    fn with_context<S: Into<String>, U: Into<String>>(
        self,
        component: S,
        operation: U,
    ) -> std::result::Result<T, Error> {
        self.context(ErrorContext::new(component, operation))
    }
}
