//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::{DocumentError, SessionError};

/// Map domain errors to a string for CLI output.
pub fn map_error(e: &SessionError) -> String {
    match e {
        SessionError::Document(DocumentError::UnsupportedVersion { .. }) => {
            format!("{}; the session was not loaded", e)
        }
        SessionError::Document(DocumentError::SchemaInvalid(_)) => {
            format!("{}\nThe session was not loaded.", e)
        }
        _ => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_documents_say_nothing_was_loaded() {
        let e = SessionError::Document(DocumentError::UnsupportedVersion {
            found: "1.0".to_string(),
            min: "2.0".to_string(),
            max: "2.4".to_string(),
        });
        assert!(map_error(&e).ends_with("the session was not loaded"));
        assert_eq!(map_error(&SessionError::ShutDown), "Reconciler is shut down");
    }
}
