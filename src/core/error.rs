use std::fmt;
use thiserror::Error;

/// Stage of a merge run, carried by operational errors so an operator knows
/// where the procedure stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePhase {
    Preconditions,
    PerformanceTuning,
    SchemaProvisioning,
    Export,
    Transfer,
    Import,
    SettingsRollback,
    ReplicationHierarchy,
    Validation,
    Compensation,
}

impl fmt::Display for MergePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergePhase::Preconditions => "preconditions",
            MergePhase::PerformanceTuning => "performance_tuning",
            MergePhase::SchemaProvisioning => "schema_provisioning",
            MergePhase::Export => "export",
            MergePhase::Transfer => "transfer",
            MergePhase::Import => "import",
            MergePhase::SettingsRollback => "settings_rollback",
            MergePhase::ReplicationHierarchy => "replication_hierarchy",
            MergePhase::Validation => "validation",
            MergePhase::Compensation => "compensation",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Operational error during {phase} on node '{node}': {message}")]
    Operational {
        phase: MergePhase,
        node: String,
        message: String,
    },

    #[error(
        "Row count mismatch on node '{node}' for table '{table}': expected {expected}, got {actual}"
    )]
    ValidationMismatch {
        node: String,
        table: String,
        expected: u64,
        actual: u64,
    },

    #[error("Timed out during {phase} on node '{node}' after {after_ms}ms")]
    Timeout {
        phase: MergePhase,
        node: String,
        after_ms: u64,
    },

    #[error("Merge cancelled during {phase}")]
    Cancelled { phase: MergePhase },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl MergeError {
    /// Builds an operational error tagged with the phase and node it came from.
    pub fn operational(
        phase: MergePhase,
        node: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Operational {
            phase,
            node: node.into(),
            message: message.into(),
        }
    }

    /// Returns the phase this error was raised in, when it is known.
    pub fn phase(&self) -> Option<MergePhase> {
        match self {
            MergeError::Precondition(_) => Some(MergePhase::Preconditions),
            MergeError::Operational { phase, .. }
            | MergeError::Timeout { phase, .. }
            | MergeError::Cancelled { phase } => Some(*phase),
            MergeError::ValidationMismatch { .. } => Some(MergePhase::Import),
            _ => None,
        }
    }

    /// True when nothing has been touched yet and the call can simply be retried.
    pub fn is_precondition(&self) -> bool {
        matches!(self, MergeError::Precondition(_))
    }

    /// Re-tags a collaborator error with the phase and node it surfaced in.
    ///
    /// Errors that already carry a phase keep it.
    pub fn in_phase(self, phase: MergePhase, node: &str) -> Self {
        match self {
            MergeError::Io(message)
            | MergeError::Serialization(message)
            | MergeError::LockError(message) => MergeError::operational(phase, node, message),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, MergeError>;

impl<T> From<std::sync::PoisonError<T>> for MergeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for MergeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MergeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operational_error_names_phase_and_node() {
        let err = MergeError::operational(MergePhase::Export, "db-3", "disk full");
        assert_eq!(err.phase(), Some(MergePhase::Export));
        assert_eq!(
            err.to_string(),
            "Operational error during export on node 'db-3': disk full"
        );
    }

    #[test]
    fn in_phase_keeps_existing_phase() {
        let err = MergeError::Timeout {
            phase: MergePhase::Import,
            node: "db-1".to_string(),
            after_ms: 10,
        };
        let retagged = err.clone().in_phase(MergePhase::Transfer, "db-2");
        assert_eq!(retagged, err);

        let io = MergeError::Io("broken pipe".to_string()).in_phase(MergePhase::Transfer, "db-2");
        assert_eq!(io.phase(), Some(MergePhase::Transfer));
    }
}
