use sha2::digest::crypto_common::BlockSizeUser;
use sha2::digest::{Digest, FixedOutputReset, Output, Reset};
use sha2::{Sha224, Sha256, Sha384, Sha512};

use crate::error::{HmacError, Result};

/// Контракт хеш-функции, над которой строится HMAC.
///
/// `block_size` и `digest_length` постоянны на всё время жизни экземпляра.
/// После `finalize_into` примитив не принимает новых данных до вызова `reset`.
pub trait HashPrimitive {
    /// Размер блока сжатия (B), байт
    fn block_size(&self) -> usize;

    /// Длина дайджеста (L), байт
    fn digest_length(&self) -> usize;

    /// Сбрасывает накопленное состояние
    fn reset(&mut self);

    /// Поглощает очередную порцию данных
    fn update(&mut self, data: &[u8]) -> Result<()>;

    /// Завершает вычисление и записывает ровно `digest_length()` байт в `out`
    fn finalize_into(&mut self, out: &mut [u8]) -> Result<()>;

    /// То же, что `finalize_into`, но с выделением буфера
    fn finalize(&mut self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.digest_length()];
        self.finalize_into(&mut out)?;
        Ok(out)
    }
}

impl<P: HashPrimitive + ?Sized> HashPrimitive for Box<P> {
    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn digest_length(&self) -> usize {
        (**self).digest_length()
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn update(&mut self, data: &[u8]) -> Result<()> {
        (**self).update(data)
    }

    fn finalize_into(&mut self, out: &mut [u8]) -> Result<()> {
        (**self).finalize_into(out)
    }
}

/// Адаптер для любых хешей RustCrypto (`sha2` и совместимых)
#[derive(Clone, Default)]
pub struct DigestPrimitive<D> {
    state: D,
    finalized: bool,
}

pub type Sha224Primitive = DigestPrimitive<Sha224>;
pub type Sha256Primitive = DigestPrimitive<Sha256>;
pub type Sha384Primitive = DigestPrimitive<Sha384>;
pub type Sha512Primitive = DigestPrimitive<Sha512>;

impl<D> DigestPrimitive<D>
where
    D: Digest + FixedOutputReset + BlockSizeUser + Reset + Default,
{
    pub fn new() -> Self {
        Self {
            state: D::default(),
            finalized: false,
        }
    }
}

impl<D> HashPrimitive for DigestPrimitive<D>
where
    D: Digest + FixedOutputReset + BlockSizeUser + Reset + Default,
{
    fn block_size(&self) -> usize {
        <D as BlockSizeUser>::block_size()
    }

    fn digest_length(&self) -> usize {
        <D as Digest>::output_size()
    }

    fn reset(&mut self) {
        Reset::reset(&mut self.state);
        self.finalized = false;
    }

    fn update(&mut self, data: &[u8]) -> Result<()> {
        if self.finalized {
            return Err(HmacError::Primitive(
                "update after finalize without reset".to_string(),
            ));
        }
        Digest::update(&mut self.state, data);
        Ok(())
    }

    fn finalize_into(&mut self, out: &mut [u8]) -> Result<()> {
        if self.finalized {
            return Err(HmacError::Primitive(
                "finalize called twice without reset".to_string(),
            ));
        }
        let expected = self.digest_length();
        if out.len() != expected {
            return Err(HmacError::Primitive(format!(
                "output buffer is {} bytes, digest is {} bytes",
                out.len(),
                expected
            )));
        }
        // finalize_into_reset оставляет внутреннее состояние чистым
        FixedOutputReset::finalize_into_reset(&mut self.state, Output::<D>::from_mut_slice(out));
        self.finalized = true;
        Ok(())
    }
}
