//! Managed symmetric key used to seal magic-link tokens.

use crate::{
    cli::globals::GlobalArgs,
    vault::transit::{self, TransitKey},
};
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Encrypt/decrypt under a server-side key that never leaves the key service.
#[async_trait]
pub trait KeyService: Send + Sync {
    /// Encrypt `plaintext`, returning an opaque ciphertext blob.
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt a blob produced by [`KeyService::encrypt`] with the same key.
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// [`KeyService`] backed by the Vault transit engine.
///
/// The blob is the transit ciphertext string (`vault:v1:...`) as bytes, so
/// key rotation in Vault keeps older tokens decryptable until they expire.
#[derive(Clone, Debug)]
pub struct TransitKeyService {
    globals: GlobalArgs,
    key: TransitKey,
}

impl TransitKeyService {
    #[must_use]
    pub fn new(globals: GlobalArgs, key: TransitKey) -> Self {
        Self { globals, key }
    }
}

#[async_trait]
impl KeyService for TransitKeyService {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let ciphertext = transit::encrypt(&self.globals, &self.key, plaintext).await?;
        Ok(ciphertext.into_bytes())
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let ciphertext =
            std::str::from_utf8(ciphertext).context("ciphertext is not a transit ciphertext")?;
        transit::decrypt(&self.globals, &self.key, ciphertext).await
    }
}
