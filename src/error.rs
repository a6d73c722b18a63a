use thiserror::Error;

#[derive(Error, Debug)]
pub enum GstError {
    #[error("Validation failed: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, GstError>;
