use thiserror::Error;

use crate::crypto::hmac::Stage;

/// Ошибки HMAC-движка и примитивов хеширования
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HmacError {
    /// Операция вызвана в недопустимом состоянии (update/final после final)
    #[error("invalid state: {operation} is not allowed in stage {stage:?}")]
    InvalidState {
        operation: &'static str,
        stage: Stage,
    },

    /// Примитив хеширования сообщает некорректные параметры
    #[error("malformed hash primitive: {0}")]
    MalformedCapability(String),

    /// Ошибка, возникшая внутри самого примитива хеширования
    #[error("hash primitive error: {0}")]
    Primitive(String),

    /// Длина тега вне допустимого диапазона
    #[error("invalid tag length {len}: expected {min}..={max} bytes")]
    InvalidTagLength { len: usize, min: usize, max: usize },

    #[error("unknown HMAC algorithm: {0}")]
    UnknownAlgorithm(String),
}

pub type Result<T> = std::result::Result<T, HmacError>;
