use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::crypto::hash::{
    HashPrimitive, Sha224Primitive, Sha256Primitive, Sha384Primitive, Sha512Primitive,
};
use crate::crypto::hmac::{min_tag_length, HmacEngine};
use crate::error::{HmacError, Result};

/// Примитив с динамической диспетчеризацией
pub type DynPrimitive = Box<dyn HashPrimitive + Send>;

/// HMAC-движок, алгоритм которого выбран во время выполнения
pub type DynHmacEngine = HmacEngine<DynPrimitive>;

/// Алгоритмы, доступные хранилищу записей
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HmacAlgorithm {
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HmacAlgorithm {
    pub const ALL: [HmacAlgorithm; 4] = [
        HmacAlgorithm::Sha224,
        HmacAlgorithm::Sha256,
        HmacAlgorithm::Sha384,
        HmacAlgorithm::Sha512,
    ];

    pub const fn block_size(self) -> usize {
        match self {
            HmacAlgorithm::Sha224 | HmacAlgorithm::Sha256 => 64,
            HmacAlgorithm::Sha384 | HmacAlgorithm::Sha512 => 128,
        }
    }

    pub const fn digest_length(self) -> usize {
        match self {
            HmacAlgorithm::Sha224 => 28,
            HmacAlgorithm::Sha256 => 32,
            HmacAlgorithm::Sha384 => 48,
            HmacAlgorithm::Sha512 => 64,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            HmacAlgorithm::Sha224 => "HMAC-SHA224",
            HmacAlgorithm::Sha256 => "HMAC-SHA256",
            HmacAlgorithm::Sha384 => "HMAC-SHA384",
            HmacAlgorithm::Sha512 => "HMAC-SHA512",
        }
    }

    /// Новый экземпляр соответствующей хеш-функции
    pub fn primitive(self) -> DynPrimitive {
        match self {
            HmacAlgorithm::Sha224 => Box::new(Sha224Primitive::new()),
            HmacAlgorithm::Sha256 => Box::new(Sha256Primitive::new()),
            HmacAlgorithm::Sha384 => Box::new(Sha384Primitive::new()),
            HmacAlgorithm::Sha512 => Box::new(Sha512Primitive::new()),
        }
    }

    /// Создаёт HMAC-движок для ключа `key`
    pub fn engine(self, key: &[u8]) -> Result<DynHmacEngine> {
        HmacEngine::with_factory(key, || self.primitive())
    }

    /// HMAC сообщения за один вызов
    pub fn mac(self, key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
        let mut engine = self.engine(key)?;
        engine.update(message)?;
        engine.finalize()
    }
}

impl fmt::Display for HmacAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HmacAlgorithm {
    type Err = HmacError;

    /// Принимает "HMAC-SHA256", "sha256", "SHA-256" и т.п.
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect();
        let normalized = normalized.strip_prefix("hmac").unwrap_or(&normalized);

        match normalized {
            "sha224" => Ok(HmacAlgorithm::Sha224),
            "sha256" => Ok(HmacAlgorithm::Sha256),
            "sha384" => Ok(HmacAlgorithm::Sha384),
            "sha512" => Ok(HmacAlgorithm::Sha512),
            _ => Err(HmacError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Настройки аутентификации блоков
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(default)]
pub struct MacConfig {
    /// Используемый алгоритм
    pub algorithm: HmacAlgorithm,
    /// Длина хранимого тега; `None` означает полный дайджест
    pub tag_length: Option<usize>,
}

impl MacConfig {
    pub fn new(algorithm: HmacAlgorithm) -> Self {
        Self {
            algorithm,
            tag_length: None,
        }
    }

    pub fn with_tag_length(mut self, tag_length: usize) -> Self {
        self.tag_length = Some(tag_length);
        self
    }

    /// Проверяет, что длина тега допустима для выбранного алгоритма
    pub fn validate(&self) -> Result<()> {
        if let Some(len) = self.tag_length {
            let max = self.algorithm.digest_length();
            let min = min_tag_length(max);
            if len < min || len > max {
                return Err(HmacError::InvalidTagLength { len, min, max });
            }
        }
        Ok(())
    }

    /// Фактическая длина тега
    pub fn tag_length(&self) -> usize {
        self.tag_length
            .unwrap_or_else(|| self.algorithm.digest_length())
    }
}
