use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlasError {
    #[error("{routine}: invalid argument '{arg}': {detail}")]
    InvalidArgument {
        routine: &'static str,
        arg: &'static str,
        detail: String,
    },
    #[error("unsupported routine: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, BlasError>;
