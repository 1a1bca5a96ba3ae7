//! All errors that can occur in the epidrift library.

use std::fmt;

#[derive(Debug)]
pub enum EpidriftError {
    ConfigError(String),
    CheckpointError(String),
    IoError(std::io::Error),
    YamlError(serde_yaml::Error),
    CsvError(csv::Error),
}

impl fmt::Display for EpidriftError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EpidriftError::ConfigError(message) => {
                write!(f, "ConfigError: {}", message)
            }
            EpidriftError::CheckpointError(message) => {
                write!(f, "CheckpointError: {}", message)
            }
            EpidriftError::IoError(error) => write!(f, "IO error: {}", error),
            EpidriftError::YamlError(error) => write!(f, "YAML error: {}", error),
            EpidriftError::CsvError(error) => write!(f, "CSV error: {}", error),
        }
    }
}

impl std::error::Error for EpidriftError {}

impl From<std::io::Error> for EpidriftError {
    fn from(error: std::io::Error) -> Self {
        EpidriftError::IoError(error)
    }
}

impl From<serde_yaml::Error> for EpidriftError {
    fn from(error: serde_yaml::Error) -> Self {
        EpidriftError::YamlError(error)
    }
}

impl From<csv::Error> for EpidriftError {
    fn from(error: csv::Error) -> Self {
        EpidriftError::CsvError(error)
    }
}
