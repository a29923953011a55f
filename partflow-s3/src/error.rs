//! Storage configuration errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum S3ConfigError {
    #[error("{present} is set but {missing} is not")]
    IncompleteCredentials {
        present: &'static str,
        missing: &'static str,
    },

    #[error("Invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Empty value for {0}")]
    Empty(&'static str),
}
