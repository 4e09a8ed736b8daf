pub mod account;
pub mod jwt;
pub mod middleware;
pub mod password;

use thiserror::Error;

pub use jwt::{resolve, Identity};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
    #[error("wrong token kind")]
    WrongKind,
    #[error("token encoding failed: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),
    #[error("password hashing failed: {0}")]
    Hash(String),
}
