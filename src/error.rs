use serde_json::json;

/// Failure taxonomy shared by every pipeline stage. Each variant carries
/// enough identifiers in `details` for the caller to find the offending
/// record.
#[derive(Debug, thiserror::Error)]
pub enum ResultError {
    #[error("{message}")]
    NotFound {
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("{message}")]
    Configuration {
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("{message}")]
    LockedState {
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl ResultError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            details: None,
        }
    }

    pub fn locked(message: impl Into<String>) -> Self {
        Self::LockedState {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, value: serde_json::Value) -> Self {
        match &mut self {
            Self::NotFound { details, .. }
            | Self::Validation { details, .. }
            | Self::Configuration { details, .. }
            | Self::LockedState { details, .. } => *details = Some(value),
            Self::Store(_) => {}
        }
        self
    }

    /// Stable IPC error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation { .. } => "validation_failed",
            Self::Configuration { .. } => "configuration_error",
            Self::LockedState { .. } => "component_locked",
            Self::Store(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::NotFound { details, .. }
            | Self::Validation { details, .. }
            | Self::Configuration { details, .. }
            | Self::LockedState { details, .. } => details.clone(),
            Self::Store(e) => Some(json!({ "sqlite": e.to_string() })),
        }
    }
}

pub type CalcResult<T> = Result<T, ResultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ResultError::not_found("x").code(), "not_found");
        assert_eq!(ResultError::validation("x").code(), "validation_failed");
        assert_eq!(ResultError::configuration("x").code(), "configuration_error");
        assert_eq!(ResultError::locked("x").code(), "component_locked");
    }

    #[test]
    fn details_attach_to_domain_variants() {
        let e = ResultError::validation("marks exceed max")
            .with_details(json!({ "studentId": "s1", "componentId": "c1" }));
        assert_eq!(e.to_string(), "marks exceed max");
        assert_eq!(
            e.details().and_then(|d| d.get("componentId").cloned()),
            Some(json!("c1"))
        );
    }
}
