//! Sources of verification keys

use std::fmt;

use aliri::jwk::KeyIdRef;
use async_trait::async_trait;

use crate::{
    error::KeySourceError,
    keys::{Key, KeySet},
};

mod remote;

pub use remote::{JwksCacheConfig, JwksKeySource};

/// A source able to look up verification keys by key ID
#[async_trait]
pub trait KeySource: fmt::Debug + Send + Sync {
    /// Gets the signing key identified by `kid`
    async fn signing_key(&self, kid: &KeyIdRef) -> Result<Key, KeySourceError>;

    /// Gets every key currently known to the source
    async fn key_set(&self) -> Result<KeySet, KeySourceError>;
}

#[async_trait]
impl KeySource for KeySet {
    async fn signing_key(&self, kid: &KeyIdRef) -> Result<Key, KeySourceError> {
        self.get(kid)
            .cloned()
            .ok_or_else(|| KeySourceError::UnknownKeyId {
                kid: kid.to_owned(),
            })
    }

    async fn key_set(&self) -> Result<KeySet, KeySourceError> {
        Ok(self.clone())
    }
}

/// How the local verifier obtains candidate keys
#[derive(Clone, Copy, Debug)]
pub enum KeyStrategy<'a> {
    /// Every key in a static set is a candidate, subject to selection by
    /// key type and `kid`
    Static(&'a KeySet),
    /// The single key named by the token's `kid` is fetched from a source
    ByKeyId(&'a dyn KeySource),
}
