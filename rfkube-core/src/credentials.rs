//! RapidFort runtime credentials
//!
//! Read from a `key = value` file (`access_id`, `secret_key`, `rf_root_url`).
//! The values live only in memory for the duration of the run.

use snafu::ResultExt;
use std::fmt;
use std::path::Path;

use crate::error::{CredentialsUnreadableSnafu, Error, Result};

#[derive(Clone, Default, PartialEq, Eq)]
pub struct RuntimeCredentials {
    pub access_id: String,
    pub secret_key: String,
    pub root_url: String,
}

impl fmt::Debug for RuntimeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeCredentials")
            .field("access_id", &self.access_id)
            .field("secret_key", &"****")
            .field("root_url", &self.root_url)
            .finish()
    }
}

impl RuntimeCredentials {
    /// Load from a credentials file; unknown keys are ignored
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context(CredentialsUnreadableSnafu { path })?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mut creds = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
            match key.trim() {
                "access_id" => creds.access_id = value,
                "secret_key" => creds.secret_key = value,
                "rf_root_url" => creds.root_url = value,
                _ => {}
            }
        }
        creds
    }

    /// Every field must be non-empty before a deployment is attempted
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("access_id", &self.access_id),
            ("secret_key", &self.secret_key),
            ("rf_root_url", &self.root_url),
        ] {
            if value.trim().is_empty() {
                return Err(Error::IncompleteCredentials { field });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_key_value_lines() {
        let creds = RuntimeCredentials::parse(
            "# rapidfort\n[default]\naccess_id = abc123\nsecret_key=\"s3cr3t\"\nrf_root_url = https://us01.rapidfort.com\nother = x\n",
        );
        assert_eq!(creds.access_id, "abc123");
        assert_eq!(creds.secret_key, "s3cr3t");
        assert_eq!(creds.root_url, "https://us01.rapidfort.com");
        assert!(creds.validate().is_ok());
    }

    #[test]
    fn test_validate_names_first_empty_field() {
        let creds = RuntimeCredentials {
            access_id: "abc".into(),
            secret_key: "  ".into(),
            root_url: String::new(),
        };
        let err = creds.validate().unwrap_err();
        assert!(matches!(err, Error::IncompleteCredentials { field: "secret_key" }));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = RuntimeCredentials::parse("secret_key = topsecret");
        assert!(!format!("{creds:?}").contains("topsecret"));
    }

    #[test]
    fn test_load_from_file_and_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "access_id = id\nsecret_key = key\nrf_root_url = https://rf").unwrap();
        let creds = RuntimeCredentials::load(file.path()).unwrap();
        assert_eq!(creds.access_id, "id");

        let err = RuntimeCredentials::load(Path::new("/nonexistent/credentials")).unwrap_err();
        assert!(matches!(err, Error::CredentialsUnreadable { .. }));
    }
}
