use std::fmt;
use std::io;

use log::{debug, trace};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypto::hash::HashPrimitive;
use crate::error::{HmacError, Result};

const IPAD: u8 = 0x36;
const OPAD: u8 = 0x5c;

/// Нижняя граница длины усечённого тега (RFC 2104, раздел 5), байт
pub const MIN_TAG_LENGTH: usize = 10;

/// Стадия жизненного цикла движка
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Initialized,
    Updating,
    Finalized,
}

/// HMAC поверх произвольного `HashPrimitive`.
///
/// Ключ после конструирования не хранится: остаются только `inner_pad` и
/// `outer_pad`, которые затираются нулями при освобождении движка.
/// Один экземпляр аутентифицирует одно сообщение; для следующего нужен `reset()`.
pub struct HmacEngine<H: HashPrimitive> {
    block_size: usize,
    digest_length: usize,
    inner_pad: Zeroizing<Vec<u8>>,
    outer_pad: Zeroizing<Vec<u8>>,
    inner: H,
    outer: H,
    stage: Stage,
}

impl<H: HashPrimitive + Default> HmacEngine<H> {
    /// Создаёт движок для ключа `key`, используя `H::default()` как фабрику
    pub fn new(key: &[u8]) -> Result<Self> {
        Self::with_factory(key, H::default)
    }
}

impl<H: HashPrimitive> HmacEngine<H> {
    /// Создаёт движок для ключа `key`.
    ///
    /// `factory` вызывается дважды: для внутреннего и внешнего хеша.
    /// Оба экземпляра обязаны сообщать одинаковые размер блока и длину дайджеста.
    pub fn with_factory<F>(key: &[u8], mut factory: F) -> Result<Self>
    where
        F: FnMut() -> H,
    {
        let mut inner = factory();
        let mut outer = factory();

        let block_size = inner.block_size();
        let digest_length = inner.digest_length();
        if block_size == 0 {
            return Err(HmacError::MalformedCapability(
                "block size is zero".to_string(),
            ));
        }
        if digest_length == 0 {
            return Err(HmacError::MalformedCapability(
                "digest length is zero".to_string(),
            ));
        }
        if outer.block_size() != block_size || outer.digest_length() != digest_length {
            return Err(HmacError::MalformedCapability(format!(
                "factory produced inconsistent primitives: B={}/{}, L={}/{}",
                block_size,
                outer.block_size(),
                digest_length,
                outer.digest_length()
            )));
        }

        let key_block = match normalize_key(key, &mut outer, block_size, digest_length) {
            Ok(key_block) => key_block,
            Err(e) => {
                outer.reset();
                return Err(e);
            }
        };
        let inner_pad = xor_pad(&key_block, IPAD);
        let outer_pad = xor_pad(&key_block, OPAD);
        drop(key_block);

        // Ошибка засева ниже освобождает движок через Drop
        let mut engine = Self {
            block_size,
            digest_length,
            inner_pad,
            outer_pad,
            inner,
            outer,
            stage: Stage::Initialized,
        };
        engine.inner.reset();
        engine.inner.update(&engine.inner_pad)?;

        debug!(
            "HMAC engine initialized: block size {} bytes, digest length {} bytes",
            block_size, digest_length
        );

        Ok(engine)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn digest_length(&self) -> usize {
        self.digest_length
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Добавляет очередной фрагмент сообщения
    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open("update")?;
        self.inner.update(data)?;
        self.stage = Stage::Updating;
        Ok(())
    }

    /// Завершает вычисление и записывает тег длиной `digest_length()` в `out`
    pub fn finalize_into(&mut self, out: &mut [u8]) -> Result<()> {
        self.ensure_open("final")?;
        if out.len() != self.digest_length {
            return Err(HmacError::InvalidTagLength {
                len: out.len(),
                min: self.digest_length,
                max: self.digest_length,
            });
        }

        // H(inner_pad || message)
        let mut inner_digest = Zeroizing::new(vec![0u8; self.digest_length]);
        self.inner.finalize_into(&mut inner_digest)?;
        self.stage = Stage::Finalized;

        // H(outer_pad || inner_digest)
        self.outer.reset();
        self.outer.update(&self.outer_pad)?;
        self.outer.update(&inner_digest)?;
        self.outer.finalize_into(out)?;
        self.outer.reset();

        trace!("HMAC finalized ({} byte tag)", out.len());
        Ok(())
    }

    /// Завершает вычисление и возвращает тег
    pub fn finalize(&mut self) -> Result<Vec<u8>> {
        let mut tag = vec![0u8; self.digest_length];
        self.finalize_into(&mut tag)?;
        Ok(tag)
    }

    /// Возвращает движок в состояние `Initialized` с тем же ключом
    pub fn reset(&mut self) -> Result<()> {
        self.inner.reset();
        self.inner.update(&self.inner_pad)?;
        self.stage = Stage::Initialized;
        Ok(())
    }

    /// Завершает вычисление и сравнивает тег с `expected` за постоянное время.
    ///
    /// `expected` может быть усечённым тегом: допускается длина от
    /// `min_tag_length(L)` до `L` байт. Теги другой длины не проходят проверку.
    pub fn verify(&mut self, expected: &[u8]) -> Result<bool> {
        let tag = Zeroizing::new(self.finalize()?);
        if expected.len() < min_tag_length(self.digest_length) || expected.len() > tag.len() {
            return Ok(false);
        }
        Ok(tag[..expected.len()].ct_eq(expected).into())
    }

    fn ensure_open(&self, operation: &'static str) -> Result<()> {
        match self.stage {
            Stage::Initialized | Stage::Updating => Ok(()),
            Stage::Finalized => Err(HmacError::InvalidState {
                operation,
                stage: self.stage,
            }),
        }
    }
}

impl<H: HashPrimitive> Drop for HmacEngine<H> {
    fn drop(&mut self) {
        // Пады затираются Zeroizing, состояния хешей сбрасываем явно
        self.inner.reset();
        self.outer.reset();
    }
}

impl<H: HashPrimitive> fmt::Debug for HmacEngine<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacEngine")
            .field("block_size", &self.block_size)
            .field("digest_length", &self.digest_length)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

impl<H: HashPrimitive> io::Write for HmacEngine<H> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf)
            .map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Приводит ключ к длине блока: длинный ключ хешируется, короткий дополняется нулями
fn normalize_key<H: HashPrimitive>(
    key: &[u8],
    hasher: &mut H,
    block_size: usize,
    digest_length: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let mut key_block = Zeroizing::new(vec![0u8; block_size]);

    if key.len() > block_size {
        let mut hashed = Zeroizing::new(vec![0u8; digest_length]);
        hasher.reset();
        hasher.update(key)?;
        hasher.finalize_into(&mut hashed)?;
        hasher.reset();

        let n = digest_length.min(block_size);
        key_block[..n].copy_from_slice(&hashed[..n]);
        trace!(
            "Key longer than block size ({} > {}), hashed down",
            key.len(),
            block_size
        );
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }

    Ok(key_block)
}

fn xor_pad(key_block: &[u8], pad: u8) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(key_block.iter().map(|b| b ^ pad).collect())
}

/// Минимально допустимая длина усечённого тега для дайджеста длиной `digest_length`
pub fn min_tag_length(digest_length: usize) -> usize {
    (digest_length / 2).max(MIN_TAG_LENGTH).min(digest_length)
}

/// Усекает тег до `len` байт, соблюдая границы RFC 2104
pub fn truncate_tag(tag: &[u8], len: usize) -> Result<Vec<u8>> {
    let min = min_tag_length(tag.len());
    if len < min || len > tag.len() {
        return Err(HmacError::InvalidTagLength {
            len,
            min,
            max: tag.len(),
        });
    }
    Ok(tag[..len].to_vec())
}

/// HMAC сообщения за один вызов
pub fn hmac<H: HashPrimitive + Default>(key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let mut engine = HmacEngine::<H>::new(key)?;
    engine.update(message)?;
    engine.finalize()
}
