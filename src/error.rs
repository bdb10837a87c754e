use thiserror::Error;

pub type CalcGraphResult<T> = Result<T, CalcGraphError>;

/// Faults that stop a whole operation (loading, configuration, export).
///
/// Problems inside individual formulas are never reported through this type:
/// they are collected as values in [`crate::core::ValidationResult`] and
/// [`crate::core::EvalError`].
#[derive(Error, Debug)]
pub enum CalcGraphError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Workbook load error: {0}")]
    Load(String),

    #[error("Duplicate cell {address} in sheet '{sheet}'")]
    DuplicateCell { sheet: String, address: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}
