//! Verification keys and candidate key selection

use std::{convert::TryFrom, fmt, str::FromStr};

use aliri::{jwa, jwk::KeyIdRef, Jwk, Jwks};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::KeyRejected, token::DecodedHeader};

/// The family of a JSON Web Key, as named by its `kty` member
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyType {
    /// A symmetric octet sequence (`oct`), used by `HS*` algorithms
    Octet,
    /// An RSA key (`RSA`), used by `RS*` and `PS*` algorithms
    Rsa,
    /// An elliptic curve key (`EC`), used by `ES*` algorithms
    EllipticCurve,
}

impl KeyType {
    /// The key type that can verify signatures produced with `alg`
    ///
    /// The mapping is by algorithm family prefix, so `HS384` maps to
    /// [`KeyType::Octet`] even if the algorithm itself is not supported.
    pub fn for_algorithm(alg: &str) -> Option<Self> {
        if alg.starts_with("HS") {
            Some(Self::Octet)
        } else if alg.starts_with("RS") || alg.starts_with("PS") {
            Some(Self::Rsa)
        } else if alg.starts_with("ES") {
            Some(Self::EllipticCurve)
        } else {
            None
        }
    }

    /// The `kty` value for this key type
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Octet => "oct",
            Self::Rsa => "RSA",
            Self::EllipticCurve => "EC",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = KeyRejected;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oct" => Ok(Self::Octet),
            "RSA" => Ok(Self::Rsa),
            "EC" => Ok(Self::EllipticCurve),
            _ => Err(KeyRejected::UnsupportedKeyType),
        }
    }
}

/// A verification key together with the metadata used to select it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Key {
    kty: KeyType,
    jwk: Jwk,
}

impl Key {
    /// The key ID, if the key has one
    pub fn key_id(&self) -> Option<&KeyIdRef> {
        self.jwk.key_id()
    }

    /// The key type
    pub fn key_type(&self) -> KeyType {
        self.kty
    }

    /// The algorithm the key is restricted to, if any
    pub fn algorithm(&self) -> Option<jwa::Algorithm> {
        self.jwk.algorithm()
    }

    /// The underlying JSON Web Key
    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }
}

impl TryFrom<Jwk> for Key {
    type Error = KeyRejected;

    fn try_from(jwk: Jwk) -> Result<Self, Self::Error> {
        let encoded = serde_json::to_value(&jwk)?;
        let kty = encoded
            .get("kty")
            .and_then(Value::as_str)
            .ok_or(KeyRejected::UnsupportedKeyType)?
            .parse()?;

        Ok(Self { kty, jwk })
    }
}

impl From<Key> for Jwk {
    fn from(key: Key) -> Self {
        key.jwk
    }
}

/// An ordered set of verification keys
///
/// Serializes as a JSON Web Key Set (`{"keys": [...]}`). When
/// deserializing, keys that cannot be used for verification are skipped
/// with a warning, as are keys that repeat the `kid` of an earlier key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeySet {
    keys: Vec<Key>,
}

impl KeySet {
    /// Constructs an empty key set
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key to the set
    ///
    /// Returns `false` and leaves the set unchanged if a key with the
    /// same `kid` is already present.
    pub fn add_key(&mut self, key: Key) -> bool {
        if let Some(kid) = key.key_id() {
            if self.get(kid).is_some() {
                return false;
            }
        }

        self.keys.push(key);
        true
    }

    /// The keys, in insertion order
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Looks up a key by its `kid`
    pub fn get(&self, kid: &KeyIdRef) -> Option<&Key> {
        self.keys.iter().find(|k| k.key_id() == Some(kid))
    }

    /// The number of keys in the set
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set has no keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl From<Jwks> for KeySet {
    fn from(jwks: Jwks) -> Self {
        let mut set = Self::new();
        for jwk in jwks.keys() {
            match Key::try_from(jwk.clone()) {
                Ok(key) => {
                    set.add_key(key);
                }
                Err(error) => {
                    let error: &dyn std::error::Error = &error;
                    tracing::warn!(error, jwk.kid = ?jwk.key_id(), "ignoring unusable JWK");
                }
            }
        }
        set
    }
}

impl Extend<Key> for KeySet {
    fn extend<T: IntoIterator<Item = Key>>(&mut self, iter: T) {
        for key in iter {
            self.add_key(key);
        }
    }
}

impl FromIterator<Key> for KeySet {
    fn from_iter<T: IntoIterator<Item = Key>>(iter: T) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl Serialize for KeySet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        #[derive(Serialize)]
        struct JwksDto<'a> {
            keys: Vec<&'a Jwk>,
        }

        JwksDto {
            keys: self.keys.iter().map(Key::jwk).collect(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for KeySet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct JwksDto {
            #[serde(deserialize_with = "deserialize_keys")]
            keys: KeySet,
        }

        Ok(JwksDto::deserialize(deserializer)?.keys)
    }
}

fn deserialize_keys<'de, D>(deserializer: D) -> Result<KeySet, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct MaybeKeysVisitor;

    impl<'de> serde::de::Visitor<'de> for MaybeKeysVisitor {
        type Value = KeySet;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a list of JWK objects")
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::SeqAccess<'de>,
        {
            let mut set = KeySet::new();
            let mut index = 0_usize;

            while let Some(value) = seq.next_element::<Value>()? {
                // `oct` key material only deserializes from borrowed strings
                match Jwk::deserialize(&value) {
                    Ok(jwk) => match Key::try_from(jwk) {
                        Ok(key) => {
                            let kid = key.key_id().map(KeyIdRef::to_owned);
                            if !set.add_key(key) {
                                tracing::warn!(
                                    jwks.idx = index,
                                    jwk.kid = ?kid,
                                    "ignoring JWK with duplicate kid"
                                );
                            }
                        }
                        Err(error) => {
                            let error: &dyn std::error::Error = &error;
                            tracing::warn!(error, jwks.idx = index, "ignoring unusable JWK");
                        }
                    },
                    Err(error) => {
                        let error: &dyn std::error::Error = &error;
                        tracing::warn!(
                            error,
                            jwks.idx = index,
                            jwk.kid = ?value.get("kid"),
                            jwk.kty = ?value.get("kty"),
                            jwk.alg = ?value.get("alg"),
                            "ignoring unsupported JWK"
                        );
                    }
                }
                index += 1;
            }

            Ok(set)
        }
    }

    deserializer.deserialize_seq(MaybeKeysVisitor)
}

/// Selects the keys that could have signed a token with the given header
///
/// When the header names a `kid`, only the key with that `kid` is
/// returned, and only if its type matches the header's algorithm;
/// keys without a matching `kid` are never considered, even if their
/// type matches. Without a `kid`, every key whose type matches the
/// algorithm is returned, in key set order. An unrecognized algorithm
/// yields no candidates.
pub fn select_candidates<'a>(header: &DecodedHeader, keys: &'a KeySet) -> Vec<&'a Key> {
    let kty = match KeyType::for_algorithm(header.alg()) {
        Some(kty) => kty,
        None => return Vec::new(),
    };

    let matches_type = |key: &&Key| key.key_type() == kty;

    match header.kid() {
        Some(kid) => keys.get(kid).into_iter().filter(matches_type).collect(),
        None => keys.keys().iter().filter(matches_type).collect(),
    }
}
