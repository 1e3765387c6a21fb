//! Error types for clashbuilder.
//!
//! Library crates use [`ClashBuilderError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Every variant that concerns an external resource carries its identifier
//! (file path or URL) so a failed run always names what broke.

use std::path::PathBuf;

/// Top-level error type for all clashbuilder operations.
#[derive(Debug, thiserror::Error)]
pub enum ClashBuilderError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The node source was unreachable or returned malformed content.
    #[error("failed to fetch nodes from {url}: {reason}")]
    SourceFetch { url: String, reason: String },

    /// A required static file (base template, rule providers, mode file) is
    /// missing or structurally invalid.
    #[error("failed to load template {path:?}: {reason}")]
    TemplateLoad { path: PathBuf, reason: String },

    /// A glob-matched user rule fragment is malformed.
    #[error("failed to load rule fragment {path:?}: {reason}")]
    FragmentLoad { path: PathBuf, reason: String },

    /// Two documents disagree on the shape of a top-level key.
    #[error("cannot merge key '{key}' from {source_name}: {message}")]
    Composition {
        key: String,
        source_name: String,
        message: String,
    },

    /// An output document could not be written.
    #[error("failed to persist {path:?}: {reason}")]
    Persist { path: PathBuf, reason: String },

    /// Filesystem I/O error outside of template/fragment loading.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad profile, invalid region map, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ClashBuilderError>;

impl ClashBuilderError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Node source failure for `url`.
    pub fn source_fetch(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceFetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Template load failure for `path`.
    pub fn template_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::TemplateLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// User rule fragment load failure for `path`.
    pub fn fragment_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::FragmentLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Shape conflict on `key` while merging the document named `source_name`.
    pub fn composition(
        key: impl Into<String>,
        source_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Composition {
            key: key.into(),
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Output write failure for `path`.
    pub fn persist(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Persist {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Stable, machine-friendly label for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::SourceFetch { .. } => "source-fetch",
            Self::TemplateLoad { .. } => "template-load",
            Self::FragmentLoad { .. } => "fragment-load",
            Self::Composition { .. } => "composition",
            Self::Persist { .. } => "persist",
            Self::Io { .. } => "io",
            Self::Validation { .. } => "validation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ClashBuilderError::config("missing home directory");
        assert_eq!(err.to_string(), "config error: missing home directory");

        let err = ClashBuilderError::source_fetch("https://sub.example.com/x", "HTTP 503");
        assert_eq!(
            err.to_string(),
            "failed to fetch nodes from https://sub.example.com/x: HTTP 503"
        );
    }

    #[test]
    fn errors_name_the_offending_resource() {
        let err = ClashBuilderError::fragment_load("rules/user-defined/a.yaml", "not a mapping");
        assert!(err.to_string().contains("rules/user-defined/a.yaml"));
        assert_eq!(err.kind(), "fragment-load");

        let err = ClashBuilderError::composition("dns", "rule-providers.yaml", "mapping vs sequence");
        assert!(err.to_string().contains("'dns'"));
        assert!(err.to_string().contains("rule-providers.yaml"));
        assert_eq!(err.kind(), "composition");
    }
}
