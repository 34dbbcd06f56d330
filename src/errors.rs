use thiserror::Error;

/// Failures an engine driver can hit while producing artifacts.
///
/// Engine-level variants (`ToolNotFound`, `ConnectionFailed`, `EnumerationFailed`) make the
/// driver return no artifacts for the run. Per-database variants only skip that database.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("required tool not found: {0}")]
    ToolNotFound(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("failed to enumerate databases: {0}")]
    EnumerationFailed(String),

    #[error("dump of database '{database}' failed: {message}")]
    DumpFailed { database: String, message: String },

    #[error("failed to write archive for database '{database}': {message}")]
    ArchiveWriteFailed { database: String, message: String },
}

impl DriverError {
    /// True when the error only affects a single database rather than the whole engine.
    pub fn is_per_database(&self) -> bool {
        matches!(
            self,
            DriverError::DumpFailed { .. } | DriverError::ArchiveWriteFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_database_classification() {
        let dump = DriverError::DumpFailed {
            database: "orders".into(),
            message: "exit status 2".into(),
        };
        assert!(dump.is_per_database());
        assert!(dump.to_string().contains("orders"));

        let archive = DriverError::ArchiveWriteFailed {
            database: "users".into(),
            message: "disk full".into(),
        };
        assert!(archive.is_per_database());

        assert!(!DriverError::ToolNotFound("mysqldump".into()).is_per_database());
        assert!(!DriverError::EnumerationFailed("access denied".into()).is_per_database());
    }
}
