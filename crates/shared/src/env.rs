use std::path::PathBuf;

use crate::error::CommonError;

fn traverse_up_for_env_file(file_name: &str) -> Option<PathBuf> {
    let relative_workspace_root = PathBuf::from("./../../").join(file_name);

    if PathBuf::from(file_name).exists() {
        Some(PathBuf::from(file_name))
    } else if relative_workspace_root.exists() {
        Some(relative_workspace_root)
    } else {
        None
    }
}

/// Load `.env` and `.env.secrets` from the current directory or the workspace
/// root, when present. Missing files are not an error.
pub fn load_optional_env_files() {
    for file_name in [".env", ".env.secrets"] {
        if let Some(path) = traverse_up_for_env_file(file_name) {
            tracing::debug!("loading environment variables from {}", path.display());
            dotenv::from_filename(path).ok();
        }
    }
}

/// Read an environment variable, falling back to a default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read a required environment variable.
pub fn require_env(key: &str) -> Result<String, CommonError> {
    std::env::var(key).map_err(|_| CommonError::Internal {
        msg: format!("required environment variable {key} is not set"),
        source: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back_to_default() {
        assert_eq!(env_or("SOME_UNSET_VARIABLE_FOR_TESTS", "fallback"), "fallback");
    }

    #[test]
    fn test_require_env_reports_the_missing_key() {
        let err = require_env("ANOTHER_UNSET_VARIABLE_FOR_TESTS").unwrap_err();
        assert!(err.to_string().contains("ANOTHER_UNSET_VARIABLE_FOR_TESTS"));
    }
}
