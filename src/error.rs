//! Error types for the proxy core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("parameter validation failed: {reason}")]
    Validation { reason: String },

    #[error("backend dispatch failed: {reason}")]
    Backend { reason: String },

    #[error("operation timed out")]
    Timeout,

    #[error("torn record observed in slot {slot}")]
    TornRecord { slot: u16 },

    #[error("unexpected error: {message}")]
    Unexpected { message: String },
}

impl ProxyError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation { reason: reason.into() }
    }

    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend { reason: reason.into() }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected { message: message.into() }
    }
}
