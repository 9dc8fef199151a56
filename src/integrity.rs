use std::io::Read;

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use rayon::prelude::*;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypto::algorithm::{DynHmacEngine, MacConfig};

/// Аутентификация блоков данных хранилища записей.
///
/// Тег блока вычисляется как HMAC(`index` в little-endian || данные блока),
/// поэтому перестановка блоков местами обнаруживается при проверке.
pub struct BlockAuthenticator {
    config: MacConfig,
    key: Zeroizing<Vec<u8>>,
}

impl BlockAuthenticator {
    /// Создаёт аутентификатор для ключа `key`
    pub fn new(key: &[u8], config: MacConfig) -> Result<Self> {
        config.validate().context("Invalid MAC configuration")?;
        if key.is_empty() {
            warn!("Block authenticator created with an empty key");
        }

        debug!(
            "Block authenticator: {}, {} byte tags",
            config.algorithm,
            config.tag_length()
        );

        Ok(Self {
            config,
            key: Zeroizing::new(key.to_vec()),
        })
    }

    pub fn config(&self) -> &MacConfig {
        &self.config
    }

    pub fn tag_length(&self) -> usize {
        self.config.tag_length()
    }

    fn engine(&self) -> Result<DynHmacEngine> {
        self.config
            .algorithm
            .engine(&self.key)
            .context("Failed to create HMAC engine")
    }

    fn finish(&self, engine: &mut DynHmacEngine) -> Result<Vec<u8>> {
        let mut tag = engine.finalize()?;
        tag.truncate(self.config.tag_length());
        Ok(tag)
    }

    /// Тег блока на уже готовом движке; пады ключа переиспользуются через reset()
    fn tag_with(&self, engine: &mut DynHmacEngine, index: u64, data: &[u8]) -> Result<Vec<u8>> {
        engine.reset()?;
        engine.update(&index.to_le_bytes())?;
        engine.update(data)?;
        self.finish(engine)
    }

    /// Вычисляет тег одного блока
    pub fn tag_block(&self, index: u64, data: &[u8]) -> Result<Vec<u8>> {
        let mut engine = self.engine()?;
        self.tag_with(&mut engine, index, data)
    }

    /// Проверяет тег одного блока (сравнение за постоянное время)
    pub fn verify_block(&self, index: u64, data: &[u8], tag: &[u8]) -> Result<bool> {
        if tag.len() != self.tag_length() {
            return Ok(false);
        }
        let expected = self.tag_block(index, data)?;
        Ok(expected.ct_eq(tag).into())
    }

    /// Разбивает `data` на блоки по `block_size` байт (последний может быть короче)
    /// и вычисляет их теги параллельно. Первый блок получает индекс `first_index`.
    pub fn tag_blocks(&self, data: &[u8], block_size: usize, first_index: u64) -> Result<Vec<Vec<u8>>> {
        if block_size == 0 {
            bail!("Block size must be non-zero");
        }

        check_index_range(first_index, data.len().div_ceil(block_size))?;

        // Один движок на поток rayon
        let tags = data
            .par_chunks(block_size)
            .enumerate()
            .map_init(
                || self.engine(),
                |engine, (i, block)| -> Result<Vec<u8>> {
                    let index = first_index + i as u64;
                    let engine = match engine {
                        Ok(engine) => engine,
                        Err(e) => bail!("Failed to create HMAC engine: {:#}", e),
                    };
                    self.tag_with(engine, index, block)
                        .with_context(|| format!("Failed to tag block {}", index))
                },
            )
            .collect::<Result<Vec<_>>>()?;

        debug!("Tagged {} blocks of {} bytes", tags.len(), block_size);
        Ok(tags)
    }

    /// Проверяет теги блоков и возвращает индексы блоков, не прошедших проверку
    pub fn verify_blocks(
        &self,
        data: &[u8],
        block_size: usize,
        first_index: u64,
        tags: &[Vec<u8>],
    ) -> Result<Vec<u64>> {
        if block_size == 0 {
            bail!("Block size must be non-zero");
        }

        let block_count = data.len().div_ceil(block_size);
        if tags.len() != block_count {
            bail!(
                "Tag count mismatch: {} blocks, {} tags",
                block_count,
                tags.len()
            );
        }

        check_index_range(first_index, block_count)?;

        let results = data
            .par_chunks(block_size)
            .zip(tags.par_iter())
            .enumerate()
            .map_init(
                || self.engine(),
                |engine, (i, (block, tag))| -> Result<(u64, bool)> {
                    let index = first_index + i as u64;
                    let engine = match engine {
                        Ok(engine) => engine,
                        Err(e) => bail!("Failed to create HMAC engine: {:#}", e),
                    };
                    if tag.len() != self.tag_length() {
                        return Ok((index, false));
                    }
                    let expected = self
                        .tag_with(engine, index, block)
                        .with_context(|| format!("Failed to verify block {}", index))?;
                    Ok((index, bool::from(expected.ct_eq(tag))))
                },
            )
            .collect::<Result<Vec<_>>>()?;

        let failed: Vec<u64> = results
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(index, _)| index)
            .collect();

        if !failed.is_empty() {
            warn!(
                "{} of {} blocks failed integrity check",
                failed.len(),
                block_count
            );
        }
        Ok(failed)
    }

    /// Тег по всему потоку `reader`
    pub fn stream_tag<R: Read>(&self, mut reader: R) -> Result<Vec<u8>> {
        let mut engine = self.engine()?;
        let copied = std::io::copy(&mut reader, &mut engine)
            .context("Failed to read data stream")?;
        debug!("Authenticated {} bytes from stream", copied);
        self.finish(&mut engine)
    }

    /// Проверяет тег потока
    pub fn verify_stream<R: Read>(&self, reader: R, tag: &[u8]) -> Result<bool> {
        if tag.len() != self.tag_length() {
            return Ok(false);
        }
        let expected = self.stream_tag(reader)?;
        Ok(expected.ct_eq(tag).into())
    }
}

/// Проверяет, что индексы блоков `first_index..first_index + block_count` помещаются в u64
fn check_index_range(first_index: u64, block_count: usize) -> Result<()> {
    if block_count > 0 && first_index.checked_add(block_count as u64 - 1).is_none() {
        bail!(
            "Block index range overflows u64: first index {}, {} blocks",
            first_index,
            block_count
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::algorithm::HmacAlgorithm;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn authenticator(config: MacConfig) -> BlockAuthenticator {
        BlockAuthenticator::new(b"0123456789abcdef0123456789abcdef", config).unwrap()
    }

    #[test]
    fn test_tag_block_binds_index() {
        init_logger();
        let auth = authenticator(MacConfig::default());
        let data = b"This is a test message for block tags!";

        let tag = auth.tag_block(7, data).unwrap();
        assert_eq!(tag.len(), 32);

        // Тот же тег вручную
        let mut engine = HmacAlgorithm::Sha256
            .engine(b"0123456789abcdef0123456789abcdef")
            .unwrap();
        engine.update(&7u64.to_le_bytes()).unwrap();
        engine.update(data).unwrap();
        assert_eq!(tag, engine.finalize().unwrap());

        assert_ne!(tag, auth.tag_block(8, data).unwrap());
        assert!(auth.verify_block(7, data, &tag).unwrap());
        assert!(!auth.verify_block(8, data, &tag).unwrap());
    }

    #[test]
    fn test_verify_detects_tampering() {
        init_logger();
        let auth = authenticator(MacConfig::default());
        let mut data = vec![0x42u8; 512];
        let tag = auth.tag_block(0, &data).unwrap();

        data[100] ^= 0x01;
        assert!(!auth.verify_block(0, &data, &tag).unwrap());
        assert!(!auth.verify_block(0, &data, &tag[..16]).unwrap());
    }

    #[test]
    fn test_truncated_tags() {
        init_logger();
        let full = authenticator(MacConfig::new(HmacAlgorithm::Sha512));
        let short = authenticator(MacConfig::new(HmacAlgorithm::Sha512).with_tag_length(32));

        let full_tag = full.tag_block(3, b"record").unwrap();
        let short_tag = short.tag_block(3, b"record").unwrap();
        assert_eq!(full_tag.len(), 64);
        assert_eq!(&short_tag[..], &full_tag[..32]);
        assert!(short.verify_block(3, b"record", &short_tag).unwrap());
        assert!(!short.verify_block(3, b"record", &full_tag).unwrap());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = MacConfig::new(HmacAlgorithm::Sha256).with_tag_length(8);
        assert!(BlockAuthenticator::new(b"key", config).is_err());
    }

    #[test]
    fn test_parallel_tags_match_sequential() {
        init_logger();
        let auth = authenticator(MacConfig::default());
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let tags = auth.tag_blocks(&data, 512, 100).unwrap();
        assert_eq!(tags.len(), 20);

        for (i, block) in data.chunks(512).enumerate() {
            assert_eq!(tags[i], auth.tag_block(100 + i as u64, block).unwrap());
        }
        // Последний блок короче остальных
        assert_eq!(data.chunks(512).last().unwrap().len(), 10_000 % 512);
    }

    #[test]
    fn test_verify_blocks_reports_failed_indices() {
        init_logger();
        let auth = authenticator(MacConfig::default());
        let mut data = vec![0u8; 4096];
        let tags = auth.tag_blocks(&data, 1024, 0).unwrap();

        assert!(auth.verify_blocks(&data, 1024, 0, &tags).unwrap().is_empty());

        data[1500] = 0xff;
        data[4000] = 0xff;
        assert_eq!(auth.verify_blocks(&data, 1024, 0, &tags).unwrap(), vec![1, 3]);

        // Сдвиг индексов ломает все теги
        data.fill(0);
        assert_eq!(auth.verify_blocks(&data, 1024, 1, &tags).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_verify_blocks_errors() {
        let auth = authenticator(MacConfig::default());
        let data = vec![0u8; 100];
        let tags = auth.tag_blocks(&data, 50, 0).unwrap();

        assert!(auth.verify_blocks(&data, 50, 0, &tags[..1]).is_err());
        assert!(auth.verify_blocks(&data, 0, 0, &tags).is_err());
        assert!(auth.tag_blocks(&data, 0, 0).is_err());
        assert!(auth.tag_blocks(&[], 50, 0).unwrap().is_empty());
    }

    #[test]
    fn test_index_range_overflow_rejected() {
        init_logger();
        let auth = authenticator(MacConfig::default());
        let data = [0u8; 20];

        assert!(auth.tag_blocks(&data, 10, u64::MAX).is_err());
        assert!(auth.tag_blocks(&data, 10, u64::MAX - 2).is_ok());

        let tags = vec![vec![0u8; 32]; 2];
        assert!(auth.verify_blocks(&data, 10, u64::MAX, &tags).is_err());

        // Последний допустимый индекс
        let tags = auth.tag_blocks(&data, 10, u64::MAX - 1).unwrap();
        assert_eq!(tags[1], auth.tag_block(u64::MAX, &data[10..]).unwrap());
        assert!(auth
            .verify_blocks(&data, 10, u64::MAX - 1, &tags)
            .unwrap()
            .is_empty());

        // Один блок с индексом u64::MAX допустим
        assert_eq!(auth.tag_blocks(&data[..10], 10, u64::MAX).unwrap().len(), 1);
    }

    #[test]
    fn test_long_key_engine_reuse() {
        init_logger();
        // Ключ длиннее блока SHA-256: пады вычисляются один раз на поток
        let auth = BlockAuthenticator::new(&[0xaa; 131], MacConfig::default()).unwrap();
        let data: Vec<u8> = (0..8192u32).map(|i| (i % 253) as u8).collect();

        let tags = auth.tag_blocks(&data, 256, 0).unwrap();
        for (i, block) in data.chunks(256).enumerate() {
            assert_eq!(tags[i], auth.tag_block(i as u64, block).unwrap());
        }
        assert!(auth.verify_blocks(&data, 256, 0, &tags).unwrap().is_empty());

        let mut short = tags.clone();
        short[5].truncate(16);
        assert_eq!(auth.verify_blocks(&data, 256, 0, &short).unwrap(), vec![5]);
    }

    #[test]
    fn test_stream_tag() {
        init_logger();
        let auth = authenticator(MacConfig::new(HmacAlgorithm::Sha384));
        let data = vec![0xcdu8; 100_000];

        let tag = auth.stream_tag(&data[..]).unwrap();
        let expected = HmacAlgorithm::Sha384
            .mac(b"0123456789abcdef0123456789abcdef", &data)
            .unwrap();
        assert_eq!(tag, expected);

        assert!(auth.verify_stream(&data[..], &tag).unwrap());
        assert!(!auth.verify_stream(&data[1..], &tag).unwrap());
    }
}
