use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("serde yaml error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed timestamp {value:?} in field {field}")]
    Timestamp { field: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, ReportError>;
