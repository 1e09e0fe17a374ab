use std::fmt;

use thiserror::Error;

use crate::kv::KvError;

/// Domain tag carried by every error this crate produces.
pub const ERROR_DOMAIN: &str = "STORAGE";

/// Who is expected to act on an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller supplied bad input or referenced something that does not exist.
    User,
    /// The key-value backend failed.
    ThirdParty,
    /// Stored data or local setup is broken.
    System,
}

/// Identifiers attached to a backend failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    fields: Vec<(&'static str, String)>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread(thread_id: impl Into<String>) -> Self {
        Self::new().with("threadId", thread_id)
    }

    pub fn message(message_id: impl Into<String>) -> Self {
        Self::new().with("messageId", message_id)
    }

    pub fn resource(resource_id: impl Into<String>) -> Self {
        Self::new().with("resourceId", resource_id)
    }

    pub fn with(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.fields.push((name, value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Invalid input: {}", .violations.join("; "))]
    Validation { violations: Vec<String> },

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Storage error [{code}] ({context}): {source}")]
    Backend {
        code: &'static str,
        context: ErrorContext,
        #[source]
        source: KvError,
    },

    #[error("Corrupt record at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;

impl MemoryError {
    pub fn validation(violation: impl Into<String>) -> Self {
        MemoryError::Validation {
            violations: vec![violation.into()],
        }
    }

    /// Stable, machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::Validation { .. } => "STORAGE_VALIDATION_FAILED",
            MemoryError::ThreadNotFound(_) => "STORAGE_THREAD_NOT_FOUND",
            MemoryError::MessageNotFound(_) => "STORAGE_MESSAGE_NOT_FOUND",
            MemoryError::Backend { code, .. } => *code,
            MemoryError::Corrupt { .. } => "STORAGE_CORRUPT_RECORD",
            MemoryError::Config(_) => "STORAGE_INVALID_CONFIG",
        }
    }

    pub fn domain(&self) -> &'static str {
        ERROR_DOMAIN
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            MemoryError::Validation { .. }
            | MemoryError::ThreadNotFound(_)
            | MemoryError::MessageNotFound(_) => ErrorCategory::User,
            MemoryError::Backend { .. } => ErrorCategory::ThirdParty,
            MemoryError::Corrupt { .. } | MemoryError::Config(_) => ErrorCategory::System,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, MemoryError::Validation { .. })
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            MemoryError::Backend { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// Wraps adapter failures into [`MemoryError::Backend`].
pub(crate) trait BackendResultExt<T> {
    fn backend(self, code: &'static str, context: impl FnOnce() -> ErrorContext) -> Result<T>;
}

impl<T> BackendResultExt<T> for std::result::Result<T, KvError> {
    fn backend(self, code: &'static str, context: impl FnOnce() -> ErrorContext) -> Result<T> {
        self.map_err(|source| MemoryError::Backend {
            code,
            context: context(),
            source,
        })
    }
}

/// Read paths hand back an empty value instead of a backend failure.
/// Validation errors still surface.
pub(crate) trait DegradeExt<T> {
    fn or_degraded(self, operation: &str, fallback: impl FnOnce() -> T) -> Result<T>;
}

impl<T> DegradeExt<T> for Result<T> {
    fn or_degraded(self, operation: &str, fallback: impl FnOnce() -> T) -> Result<T> {
        match self {
            Err(e) if e.is_validation() => Err(e),
            Err(e) => {
                tracing::error!(code = e.code(), "{} failed, returning empty result: {}", operation, e);
                Ok(fallback())
            }
            ok => ok,
        }
    }
}
