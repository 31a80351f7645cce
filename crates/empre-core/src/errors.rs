/// Error surfaced across the ledger and ownership seams.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("invalid message: {0}")]
    Invalid(String),
}

impl LedgerError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage",
            Self::Invalid(_) => "invalid",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = LedgerError::NotFound("entity 42".into());
        assert_eq!(err.to_string(), "not found: entity 42");
        assert_eq!(err.error_kind(), "not_found");
    }
}
