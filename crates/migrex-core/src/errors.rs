use migrex_core_types::RunId;
use thiserror::Error;

/// Result type alias using MigrexError
pub type Result<T> = std::result::Result<T, MigrexError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code used for programmatic handling,
/// test assertions and the CLI exit code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Input
    InvalidInput,
    InvalidIdentifier,
    Config,

    // Registry integrity
    DuplicateIdentifier,
    EmptyRegistry,
    UnknownTarget,
    MissingDefinition,

    // Ledger integrity
    AlreadyRecorded,
    NotRecorded,

    // Run lock
    LockHeld,
    LockLost,

    // Execution
    UnitExecutionFailure,
    Irreversible,

    // Integration/IO
    Io,
    Serialization,
    Persistence,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::InvalidIdentifier => "ERR_INVALID_IDENTIFIER",
            ExErrorKind::Config => "ERR_CONFIG",
            ExErrorKind::DuplicateIdentifier => "ERR_DUPLICATE_IDENTIFIER",
            ExErrorKind::EmptyRegistry => "ERR_EMPTY_REGISTRY",
            ExErrorKind::UnknownTarget => "ERR_UNKNOWN_TARGET",
            ExErrorKind::MissingDefinition => "ERR_MISSING_DEFINITION",
            ExErrorKind::AlreadyRecorded => "ERR_ALREADY_RECORDED",
            ExErrorKind::NotRecorded => "ERR_NOT_RECORDED",
            ExErrorKind::LockHeld => "ERR_LOCK_HELD",
            ExErrorKind::LockLost => "ERR_LOCK_LOST",
            ExErrorKind::UnitExecutionFailure => "ERR_UNIT_EXECUTION_FAILURE",
            ExErrorKind::Irreversible => "ERR_IRREVERSIBLE",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Whether retrying the same run later can succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExErrorKind::LockHeld)
    }
}

/// Canonical structured error type
///
/// Carries the classification kind plus the context a caller needs to act on
/// the failure: which migration failed, who holds the lock, and which units
/// had already completed in the run before it stopped.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    migration_id: Option<String>,
    holder: Option<String>,
    run_id: Option<RunId>,
    message: String,
    source: Option<Box<ExError>>,
    completed: Option<Vec<String>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            migration_id: None,
            holder: None,
            run_id: None,
            message: String::new(),
            source: None,
            completed: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add the identifier of the migration involved
    pub fn with_migration_id(mut self, id: impl Into<String>) -> Self {
        self.migration_id = Some(id.into());
        self
    }

    /// Add the run lock holder involved
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = Some(holder.into());
        self
    }

    /// Add run ID context
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Record the identifiers that completed before the run stopped
    pub fn with_completed(mut self, ids: Vec<String>) -> Self {
        self.completed = Some(ids);
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the migration identifier, if any
    pub fn migration_id(&self) -> Option<&str> {
        self.migration_id.as_deref()
    }

    /// Get the lock holder, if any
    pub fn holder(&self) -> Option<&str> {
        self.holder.as_deref()
    }

    /// Get the run ID context, if any
    pub fn run_id(&self) -> Option<&RunId> {
        self.run_id.as_ref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }

    /// Identifiers completed in the run before the failure (empty if none)
    pub fn completed(&self) -> &[String] {
        self.completed.as_deref().unwrap_or(&[])
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(id) = &self.migration_id {
            write!(f, " (migration: {})", id)?;
        }
        if let Some(holder) = &self.holder {
            write!(f, " (holder: {})", holder)?;
        }
        if let Some(source) = &self.source {
            write!(f, "; caused by {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Domain error taxonomy for registry, ledger, lock and execution failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MigrexError {
    // ===== Input Errors =====
    /// Identifier is empty or contains characters outside the allowed set
    #[error("Invalid migration identifier '{id}': {reason}")]
    InvalidIdentifier { id: String, reason: String },

    /// Caller-supplied argument is out of range
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    // ===== Registry Errors =====
    /// Two units share an identifier
    #[error("Duplicate migration identifier: {id}")]
    DuplicateIdentifier { id: String },

    /// The caller required at least one unit and the registry has none
    #[error("Migration registry is empty")]
    EmptyRegistry,

    /// `--to` names an identifier the registry does not know
    #[error("Target migration not found in registry: {id}")]
    UnknownTarget { id: String },

    /// A ledger entry must be reverted but its definition is gone
    #[error("Applied migration {id} has no definition in the registry")]
    MissingDefinition { id: String },

    // ===== Ledger Errors =====
    /// record_applied called for an identifier already in the ledger
    #[error("Migration already recorded as applied: {id}")]
    AlreadyRecorded { id: String },

    /// remove_applied called for an identifier absent from the ledger
    #[error("Migration not recorded as applied: {id}")]
    NotRecorded { id: String },

    // ===== Lock Errors =====
    /// Another live holder owns the run lock
    #[error("Migration run lock is held by {holder} until {expires_at}")]
    LockHeld { holder: String, expires_at: String },

    /// Our lease was reclaimed by someone else while the run was in progress
    #[error("Migration run lock was lost by {holder}")]
    LockLost { holder: String },

    // ===== Execution Errors =====
    /// The unit's own logic failed
    #[error("Migration {id} failed: {cause}")]
    UnitExecutionFailure { id: String, cause: String },

    /// Revert requested for a unit without a down step
    #[error("Migration {id} is irreversible")]
    Irreversible { id: String },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl MigrexError {
    /// Build an execution failure from a unit's error, flattening its cause chain
    pub fn unit_failure(id: impl Into<String>, cause: &anyhow::Error) -> Self {
        MigrexError::UnitExecutionFailure {
            id: id.into(),
            cause: format!("{:#}", cause),
        }
    }
}

/// Conversion from MigrexError to ExError
impl From<MigrexError> for ExError {
    fn from(err: MigrexError) -> Self {
        match err {
            MigrexError::InvalidIdentifier { id, reason } => {
                ExError::new(ExErrorKind::InvalidIdentifier)
                    .with_migration_id(id)
                    .with_message(reason)
            }

            MigrexError::InvalidInput { reason } => {
                ExError::new(ExErrorKind::InvalidInput).with_message(reason)
            }

            MigrexError::DuplicateIdentifier { id } => {
                ExError::new(ExErrorKind::DuplicateIdentifier)
                    .with_migration_id(id)
                    .with_message("Two migration units share this identifier")
            }

            MigrexError::EmptyRegistry => ExError::new(ExErrorKind::EmptyRegistry)
                .with_message("No migration units are registered"),

            MigrexError::UnknownTarget { id } => ExError::new(ExErrorKind::UnknownTarget)
                .with_migration_id(id)
                .with_message("Target migration not found in registry"),

            MigrexError::MissingDefinition { id } => {
                ExError::new(ExErrorKind::MissingDefinition)
                    .with_migration_id(id)
                    .with_message("Applied migration has no definition in the registry")
            }

            MigrexError::AlreadyRecorded { id } => ExError::new(ExErrorKind::AlreadyRecorded)
                .with_migration_id(id)
                .with_message("Migration already recorded as applied"),

            MigrexError::NotRecorded { id } => ExError::new(ExErrorKind::NotRecorded)
                .with_migration_id(id)
                .with_message("Migration not recorded as applied"),

            MigrexError::LockHeld { holder, expires_at } => ExError::new(ExErrorKind::LockHeld)
                .with_holder(holder)
                .with_message(format!("Run lock held until {}", expires_at)),

            MigrexError::LockLost { holder } => ExError::new(ExErrorKind::LockLost)
                .with_holder(holder)
                .with_message("Run lock lease was reclaimed by another holder"),

            MigrexError::UnitExecutionFailure { id, cause } => {
                ExError::new(ExErrorKind::UnitExecutionFailure)
                    .with_migration_id(id)
                    .with_message(cause)
            }

            MigrexError::Irreversible { id } => ExError::new(ExErrorKind::Irreversible)
                .with_migration_id(id)
                .with_message("Migration has no down step"),

            MigrexError::Internal { message } => {
                ExError::new(ExErrorKind::Internal).with_message(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        let kinds = [
            ExErrorKind::InvalidInput,
            ExErrorKind::InvalidIdentifier,
            ExErrorKind::Config,
            ExErrorKind::DuplicateIdentifier,
            ExErrorKind::EmptyRegistry,
            ExErrorKind::UnknownTarget,
            ExErrorKind::MissingDefinition,
            ExErrorKind::AlreadyRecorded,
            ExErrorKind::NotRecorded,
            ExErrorKind::LockHeld,
            ExErrorKind::LockLost,
            ExErrorKind::UnitExecutionFailure,
            ExErrorKind::Irreversible,
            ExErrorKind::Io,
            ExErrorKind::Serialization,
            ExErrorKind::Persistence,
            ExErrorKind::Internal,
        ];
        let mut codes: Vec<&str> = kinds.iter().map(|k| k.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_only_lock_held_is_retryable() {
        assert!(ExErrorKind::LockHeld.is_retryable());
        assert!(!ExErrorKind::UnitExecutionFailure.is_retryable());
        assert!(!ExErrorKind::LockLost.is_retryable());
    }

    #[test]
    fn test_unit_failure_keeps_identifier_and_cause() {
        let cause = anyhow::anyhow!("no such column: b").context("adding index");
        let err: ExError = MigrexError::unit_failure("20240101_000000_b", &cause).into();

        assert_eq!(err.kind(), ExErrorKind::UnitExecutionFailure);
        assert_eq!(err.migration_id(), Some("20240101_000000_b"));
        assert_eq!(err.message(), "adding index: no such column: b");
    }

    #[test]
    fn test_display_includes_code_and_context() {
        let err = ExError::new(ExErrorKind::LockHeld)
            .with_op("acquire_lock")
            .with_holder("run-1@pid7")
            .with_message("busy");
        let rendered = err.to_string();
        assert!(rendered.starts_with("[ERR_LOCK_HELD]"));
        assert!(rendered.contains("acquire_lock"));
        assert!(rendered.contains("run-1@pid7"));
    }

    #[test]
    fn test_completed_defaults_to_empty() {
        let err = ExError::new(ExErrorKind::Internal);
        assert!(err.completed().is_empty());

        let err = err.with_completed(vec!["a".to_string()]);
        assert_eq!(err.completed(), ["a".to_string()]);
    }

    #[test]
    fn test_source_is_exposed() {
        use std::error::Error;

        let inner = ExError::new(ExErrorKind::Persistence).with_message("disk full");
        let outer = ExError::new(ExErrorKind::UnitExecutionFailure).with_source(inner);
        assert!(outer.source().is_some());
        assert_eq!(
            outer.source_error().map(|e| e.kind()),
            Some(ExErrorKind::Persistence)
        );
    }
}
