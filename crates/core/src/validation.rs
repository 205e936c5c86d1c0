//! Input validation for catalogue entities and run submissions.

use std::path::{Component, Path};

use crate::error::CoreError;

/// Maximum length of an environment name.
const MAX_ENV_NAME_LEN: usize = 128;

/// Maximum length of a test file path, in bytes.
const MAX_PATH_LEN: usize = 1024;

/// Maximum length of the requester name.
const MAX_REQUESTER_LEN: usize = 255;

/// Validate an environment name.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_ENV_NAME_LEN` characters.
/// - Must contain only alphanumeric, hyphen, underscore, or dot characters.
pub fn validate_environment_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation(
            "Environment name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_ENV_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Environment name must not exceed {MAX_ENV_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(CoreError::Validation(
            "Environment name may only contain alphanumeric, hyphen, underscore, or dot characters"
                .to_string(),
        ));
    }
    Ok(())
}

/// Validate a test file path.
///
/// Paths are handed to the test runner as arguments relative to the test
/// base directory, so they must stay inside it.
pub fn validate_test_path(path: &str) -> Result<(), CoreError> {
    if path.trim().is_empty() {
        return Err(CoreError::Validation(
            "Test path must not be empty".to_string(),
        ));
    }
    if path.len() > MAX_PATH_LEN {
        return Err(CoreError::Validation(format!(
            "Test path must not exceed {MAX_PATH_LEN} bytes"
        )));
    }
    if path.contains('\0') {
        return Err(CoreError::Validation(
            "Test path must not contain NUL bytes".to_string(),
        ));
    }
    if path.starts_with('-') {
        return Err(CoreError::Validation(format!(
            "Test path must not start with '-': {path}"
        )));
    }
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(CoreError::Validation(format!(
                    "Test path must not contain '..': {path}"
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(CoreError::Validation(format!(
                    "Test path must be relative: {path}"
                )));
            }
        }
    }
    Ok(())
}

/// Validate the inputs of a run submission.
pub fn validate_submission(requested_by: &str, path_ids: &[i64]) -> Result<(), CoreError> {
    if requested_by.trim().is_empty() {
        return Err(CoreError::Validation(
            "requested_by must not be empty".to_string(),
        ));
    }
    if requested_by.len() > MAX_REQUESTER_LEN {
        return Err(CoreError::Validation(format!(
            "requested_by must not exceed {MAX_REQUESTER_LEN} characters"
        )));
    }
    if path_ids.is_empty() {
        return Err(CoreError::Validation(
            "At least one test path is required".to_string(),
        ));
    }

    let mut seen = std::collections::HashSet::with_capacity(path_ids.len());
    for id in path_ids {
        if !seen.insert(id) {
            return Err(CoreError::Validation(format!("Duplicate test path id: {id}")));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn valid_environment_names() {
        assert!(validate_environment_name("envA").is_ok());
        assert!(validate_environment_name("staging-eu_1.2").is_ok());
    }

    #[test]
    fn invalid_environment_names() {
        assert!(validate_environment_name("").is_err());
        assert!(validate_environment_name("env A").is_err());
        assert!(validate_environment_name("env;rm").is_err());
        assert!(validate_environment_name(&"a".repeat(200)).is_err());
    }

    #[test]
    fn valid_test_paths() {
        assert!(validate_test_path("tests/test_login.py").is_ok());
        assert!(validate_test_path("./suite/test_api.py").is_ok());
    }

    #[test]
    fn rejects_escaping_paths() {
        assert_matches!(
            validate_test_path("../etc/passwd"),
            Err(CoreError::Validation(msg)) if msg.contains("..")
        );
        assert_matches!(
            validate_test_path("/abs/test.py"),
            Err(CoreError::Validation(msg)) if msg.contains("relative")
        );
    }

    #[test]
    fn rejects_option_like_paths() {
        assert!(validate_test_path("--collect-only").is_err());
    }

    #[test]
    fn rejects_blank_paths() {
        assert!(validate_test_path("").is_err());
        assert!(validate_test_path("   ").is_err());
        assert!(validate_test_path("a\0b").is_err());
    }

    #[test]
    fn submission_requires_requester_and_paths() {
        assert!(validate_submission("", &[1]).is_err());
        assert!(validate_submission("alice", &[]).is_err());
        assert!(validate_submission("alice", &[1, 2]).is_ok());
    }

    #[test]
    fn submission_rejects_duplicate_paths() {
        assert_matches!(
            validate_submission("alice", &[3, 3]),
            Err(CoreError::Validation(msg)) if msg.contains("Duplicate")
        );
    }
}
