//! HMAC поверх подключаемых хеш-функций и проверка целостности блоков
//! зашифрованного хранилища записей.

pub mod crypto;
pub mod error;
pub mod integrity;

pub use crate::crypto::algorithm::{DynHmacEngine, DynPrimitive, HmacAlgorithm, MacConfig};
pub use crate::crypto::hash::{
    DigestPrimitive, HashPrimitive, Sha224Primitive, Sha256Primitive, Sha384Primitive,
    Sha512Primitive,
};
pub use crate::crypto::hmac::{hmac, min_tag_length, truncate_tag, HmacEngine, Stage};
pub use crate::error::{HmacError, Result};
pub use crate::integrity::BlockAuthenticator;
