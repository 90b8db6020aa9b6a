use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("policy engine error: {0}")]
    Engine(#[from] casbin::Error),
    #[error("invalid policy model: {0}")]
    InvalidModel(String),
}

pub type AuthzResult<T> = Result<T, AuthzError>;
