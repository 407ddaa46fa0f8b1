//! CENC (AES-128-CTR) sample decryption.
//!
//! The keystream runs continuously across a sample's encrypted byte
//! runs: clear runs are skipped without advancing the counter, exactly
//! as the `cenc` scheme prescribes for subsample encryption.

use std::collections::HashMap;

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fragment::SampleEncryption;

type Aes128Ctr = Ctr128BE<Aes128>;

/// Provider of content keys for protected streams.
///
/// `fetch_keys` is called once per initialization segment with the
/// stream's protection-system data (concatenated pssh boxes); `get_key`
/// resolves individual key ids as protected samples are materialized.
pub trait KeySource {
    /// Acquire keys for the given protection-system data.
    fn fetch_keys(&mut self, pssh_data: &[u8]) -> Result<()>;

    /// Return the 16-byte content key for a key id.
    fn get_key(&mut self, key_id: &[u8]) -> Result<Vec<u8>>;
}

/// Key cache in front of a [`KeySource`].
pub(crate) struct DecryptorSource {
    key_source: Box<dyn KeySource>,
    keys: HashMap<[u8; 16], [u8; 16]>,
}

impl DecryptorSource {
    pub fn new(key_source: Box<dyn KeySource>) -> Self {
        Self {
            key_source,
            keys: HashMap::new(),
        }
    }

    /// Fetch keys for new protection-system data, dropping any keys
    /// cached for the previous data.
    pub fn fetch(&mut self, pssh_data: &[u8]) -> Result<()> {
        self.keys.clear();
        self.key_source.fetch_keys(pssh_data)
    }

    /// Decrypt one sample in place.
    pub fn decrypt(
        &mut self,
        key_id: &[u8; 16],
        entry: &SampleEncryption,
        data: &mut [u8],
    ) -> Result<()> {
        let key = match self.keys.get(key_id) {
            Some(key) => *key,
            None => {
                let raw = self.key_source.get_key(key_id)?;
                let key: [u8; 16] = raw
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Decrypt(format!("key is {} bytes, want 16", raw.len())))?;
                debug!(key_id = %hex::encode(key_id), "fetched content key");
                self.keys.insert(*key_id, key);
                key
            }
        };
        decrypt_sample(&key, entry, data)
    }
}

/// Apply AES-128-CTR to the encrypted byte runs of one sample.
pub(crate) fn decrypt_sample(
    key: &[u8; 16],
    entry: &SampleEncryption,
    data: &mut [u8],
) -> Result<()> {
    let iv = match entry.iv.len() {
        // 8-byte IVs are zero-padded into the counter's low half.
        8 => {
            let mut iv = [0u8; 16];
            iv[..8].copy_from_slice(&entry.iv);
            iv
        }
        16 => {
            let mut iv = [0u8; 16];
            iv.copy_from_slice(&entry.iv);
            iv
        }
        n => return Err(Error::Decrypt(format!("IV is {} bytes, want 8 or 16", n))),
    };
    let mut cipher = Aes128Ctr::new(key.into(), &iv.into());

    if entry.subsamples.is_empty() {
        cipher.apply_keystream(data);
        return Ok(());
    }

    if entry.mapped_len() != data.len() as u64 {
        return Err(Error::Decrypt(format!(
            "subsample map covers {} bytes of a {}-byte sample",
            entry.mapped_len(),
            data.len()
        )));
    }
    let mut pos = 0usize;
    for (clear, encrypted) in &entry.subsamples {
        pos += *clear as usize;
        let end = pos + *encrypted as usize;
        cipher.apply_keystream(&mut data[pos..end]);
        pos = end;
    }
    Ok(())
}
