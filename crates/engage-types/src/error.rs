use thiserror::Error;

pub type Result<T> = std::result::Result<T, TypesError>;

#[derive(Debug, Error)]
pub enum TypesError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}
