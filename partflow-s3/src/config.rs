//! Connection settings for the S3 backend

use serde::Deserialize;
use std::env;

use crate::error::S3ConfigError;

pub const ENDPOINT_VAR: &str = "S3_ENDPOINT";
pub const REGION_VAR: &str = "S3_REGION";
pub const ACCESS_KEY_VAR: &str = "S3_ACCESS_KEY";
pub const SECRET_KEY_VAR: &str = "S3_SECRET_KEY";
pub const PATH_STYLE_VAR: &str = "S3_FORCE_PATH_STYLE";

/// Where and how to reach the object store.
///
/// Unset fields fall back to the AWS default provider chain, so an empty
/// config talks to AWS with ambient credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Custom endpoint for S3-compatible services (MinIO, R2, ...)
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`
    pub force_path_style: bool,
}

impl StorageConfig {
    /// Read settings from the environment, loading `.env` first if present
    pub fn from_env() -> Result<Self, S3ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build settings from any variable lookup.
    ///
    /// Path-style addressing defaults to on whenever a custom endpoint is
    /// given, since most S3-compatible services require it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, S3ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let read = |name: &'static str| -> Result<Option<String>, S3ConfigError> {
            match lookup(name) {
                Some(value) if value.trim().is_empty() => Err(S3ConfigError::Empty(name)),
                other => Ok(other),
            }
        };

        let endpoint = read(ENDPOINT_VAR)?;
        let force_path_style = match read(PATH_STYLE_VAR)? {
            Some(value) => parse_bool(PATH_STYLE_VAR, &value)?,
            None => endpoint.is_some(),
        };

        let config = StorageConfig {
            endpoint,
            region: read(REGION_VAR)?,
            access_key: read(ACCESS_KEY_VAR)?,
            secret_key: read(SECRET_KEY_VAR)?,
            force_path_style,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self.force_path_style = true;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    /// Static credentials must come as a pair
    pub fn validate(&self) -> Result<(), S3ConfigError> {
        match (&self.access_key, &self.secret_key) {
            (Some(_), None) => Err(S3ConfigError::IncompleteCredentials {
                present: ACCESS_KEY_VAR,
                missing: SECRET_KEY_VAR,
            }),
            (None, Some(_)) => Err(S3ConfigError::IncompleteCredentials {
                present: SECRET_KEY_VAR,
                missing: ACCESS_KEY_VAR,
            }),
            _ => Ok(()),
        }
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, S3ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(S3ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let vars: HashMap<&'static str, String> =
            vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = StorageConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StorageConfig::default());
        assert!(!config.force_path_style);
    }

    #[test]
    fn test_custom_endpoint_enables_path_style() {
        let config = StorageConfig::from_lookup(lookup(&[
            (ENDPOINT_VAR, "http://localhost:9000"),
            (REGION_VAR, "eu-west-1"),
            (ACCESS_KEY_VAR, "admin"),
            (SECRET_KEY_VAR, "password"),
        ]))
        .unwrap();

        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert!(config.force_path_style);
    }

    #[test]
    fn test_path_style_can_be_disabled() {
        let config = StorageConfig::from_lookup(lookup(&[
            (ENDPOINT_VAR, "https://s3.example.com"),
            (PATH_STYLE_VAR, "false"),
        ]))
        .unwrap();
        assert!(!config.force_path_style);
    }

    #[test]
    fn test_half_credentials_rejected() {
        let err = StorageConfig::from_lookup(lookup(&[(ACCESS_KEY_VAR, "admin")])).unwrap_err();
        assert_eq!(
            err,
            S3ConfigError::IncompleteCredentials {
                present: ACCESS_KEY_VAR,
                missing: SECRET_KEY_VAR
            }
        );
    }

    #[test]
    fn test_bad_values_rejected() {
        assert!(matches!(
            StorageConfig::from_lookup(lookup(&[(PATH_STYLE_VAR, "sometimes")])),
            Err(S3ConfigError::InvalidValue { .. })
        ));
        assert_eq!(
            StorageConfig::from_lookup(lookup(&[(REGION_VAR, "  ")])).unwrap_err(),
            S3ConfigError::Empty(REGION_VAR)
        );
    }
}
