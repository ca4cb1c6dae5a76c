//! Orchestration of the introspection strategies

use std::{fmt, sync::Arc};

use aliri::jwa;
use aliri_clock::{Clock, System};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{ConfigurationError, IntrospectionError},
    jwks::{KeySource, KeyStrategy},
    keys::KeySet,
    local::LocalVerifier,
    remote::RemoteIntrospector,
};

/// The strategy that established a token as active
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VerificationMethod {
    /// Verified against the statically configured key set
    StaticKeys,
    /// Verified against a key fetched from the remote JWKS
    RemoteJwks,
    /// Reported active by the introspection endpoint
    RemoteEndpoint,
}

/// The claims of an active token
///
/// For locally verified tokens, these are the token's payload with
/// `active` set to `true`. For remotely introspected tokens, these are
/// the members of the endpoint's response.
///
/// Serializes as the flat claims object.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IntrospectionResult {
    #[serde(flatten)]
    claims: Map<String, Value>,
    #[serde(skip)]
    method: VerificationMethod,
}

impl IntrospectionResult {
    pub(crate) fn new(claims: Map<String, Value>, method: VerificationMethod) -> Self {
        Self { claims, method }
    }

    pub(crate) fn verified(mut payload: Map<String, Value>, method: VerificationMethod) -> Self {
        payload.insert("active".to_owned(), Value::Bool(true));
        Self::new(payload, method)
    }

    /// All claims
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// A single claim
    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.claims.get(claim)
    }

    /// The strategy that established the token as active
    pub fn method(&self) -> VerificationMethod {
        self.method
    }

    /// Deserializes the claims into a custom type
    pub fn deserialize_claims<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(Value::Object(self.claims.clone()))
    }

    /// Consumes the result, returning the claims
    pub fn into_claims(self) -> Map<String, Value> {
        self.claims
    }
}

pub(crate) fn default_allowed_algorithms() -> Vec<jwa::Algorithm> {
    #[cfg(feature = "rsa")]
    let algorithms = vec![jwa::Algorithm::RS256];
    #[cfg(not(feature = "rsa"))]
    let algorithms = Vec::new();

    algorithms
}

#[derive(Debug)]
struct Inner<C> {
    static_keys: Option<KeySet>,
    key_source: Option<Arc<dyn KeySource>>,
    remote: Option<RemoteIntrospector>,
    verifier: LocalVerifier<C>,
}

/// Determines whether tokens are active
///
/// The configured strategies are tried in order: the static key set,
/// then the remote JWKS, then the introspection endpoint. The first
/// strategy to establish the token as active wins. A token found to be
/// expired or not yet valid by a local strategy is rejected without
/// consulting any later strategy. Other local failures fall through to
/// the next strategy. Without an introspection endpoint, a token that no
/// local strategy accepted is [not active][IntrospectionError::TokenNotActive].
///
/// Cloning is cheap; clones share keys, caches, and HTTP clients.
pub struct Introspector<C = System> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for Introspector<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for Introspector<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Introspector")
            .field("static_keys", &self.inner.static_keys)
            .field("key_source", &self.inner.key_source)
            .field("remote", &self.inner.remote)
            .field("verifier", &self.inner.verifier)
            .finish()
    }
}

impl Introspector {
    /// Starts building an introspector
    pub fn builder() -> IntrospectorBuilder {
        IntrospectorBuilder::new()
    }
}

impl<C: Clock> Introspector<C> {
    /// Determines whether `token` is active
    ///
    /// `token_type_hint` is forwarded to the introspection endpoint. Local
    /// verification only handles access tokens, so any other hint skips
    /// straight to the endpoint.
    #[tracing::instrument(skip(self, token))]
    pub async fn introspect(
        &self,
        token: &str,
        token_type_hint: Option<&str>,
    ) -> Result<IntrospectionResult, IntrospectionError> {
        let inner = &*self.inner;

        if let Some(keys) = &inner.static_keys {
            tracing::debug!("verifying token with static JWKS");
            let outcome = inner
                .verifier
                .introspect(token, token_type_hint, KeyStrategy::Static(keys))
                .await;
            if let Some(outcome) = settle(outcome) {
                return outcome;
            }
        }

        if let Some(source) = &inner.key_source {
            tracing::debug!("verifying token with remote JWKS");
            let outcome = inner
                .verifier
                .introspect(token, token_type_hint, KeyStrategy::ByKeyId(source.as_ref()))
                .await;
            if let Some(outcome) = settle(outcome) {
                return outcome;
            }
        }

        if let Some(remote) = &inner.remote {
            tracing::debug!("introspecting token remotely");
            return remote.introspect(token, token_type_hint).await;
        }

        tracing::debug!("no strategy established the token as active");
        Err(IntrospectionError::TokenNotActive)
    }
}

/// Ends the strategy chain on success or a fatal error
fn settle(
    outcome: Result<IntrospectionResult, IntrospectionError>,
) -> Option<Result<IntrospectionResult, IntrospectionError>> {
    match outcome {
        Ok(result) => Some(Ok(result)),
        Err(err) if err.is_fatal() => {
            tracing::debug!(kind = %err.kind(), "token rejected");
            Some(Err(err))
        }
        Err(err) => {
            let error: &dyn std::error::Error = &err;
            tracing::debug!(error, kind = %err.kind(), "could not locally verify token");
            None
        }
    }
}

/// Configures and validates an [`Introspector`]
#[must_use]
pub struct IntrospectorBuilder<C = System> {
    static_keys: Option<KeySet>,
    key_source: Option<Arc<dyn KeySource>>,
    remote: Option<RemoteIntrospector>,
    allowed_algorithms: Vec<jwa::Algorithm>,
    leeway: u64,
    clock: C,
}

impl<C: fmt::Debug> fmt::Debug for IntrospectorBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IntrospectorBuilder")
            .field("static_keys", &self.static_keys)
            .field("key_source", &self.key_source)
            .field("remote", &self.remote)
            .field("allowed_algorithms", &self.allowed_algorithms)
            .field("leeway", &self.leeway)
            .field("clock", &self.clock)
            .finish()
    }
}

impl IntrospectorBuilder {
    /// A builder with no strategies, allowing the default algorithms
    /// (`RS256` when the `rsa` feature is enabled)
    pub fn new() -> Self {
        Self {
            static_keys: None,
            key_source: None,
            remote: None,
            allowed_algorithms: default_allowed_algorithms(),
            leeway: 0,
            clock: System,
        }
    }
}

impl Default for IntrospectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> IntrospectorBuilder<C> {
    /// Verifies tokens locally against a static key set
    pub fn with_static_keys(self, keys: KeySet) -> Self {
        Self {
            static_keys: Some(keys),
            ..self
        }
    }

    /// Verifies tokens locally against keys fetched by `kid`
    pub fn with_key_source(self, source: impl KeySource + 'static) -> Self {
        self.with_shared_key_source(Arc::new(source))
    }

    /// Verifies tokens locally against keys fetched by `kid` from a
    /// shared source
    pub fn with_shared_key_source(self, source: Arc<dyn KeySource>) -> Self {
        Self {
            key_source: Some(source),
            ..self
        }
    }

    /// Falls back to an introspection endpoint
    pub fn with_remote(self, remote: RemoteIntrospector) -> Self {
        Self {
            remote: Some(remote),
            ..self
        }
    }

    /// Replaces the algorithms accepted by local verification
    pub fn with_allowed_algorithms(
        self,
        algorithms: impl IntoIterator<Item = jwa::Algorithm>,
    ) -> Self {
        Self {
            allowed_algorithms: algorithms.into_iter().collect(),
            ..self
        }
    }

    /// Adds an algorithm accepted by local verification
    pub fn add_allowed_algorithm(mut self, algorithm: jwa::Algorithm) -> Self {
        if !self.allowed_algorithms.contains(&algorithm) {
            self.allowed_algorithms.push(algorithm);
        }
        self
    }

    /// Tolerates clock skew of `leeway` seconds around `exp` and `nbf`
    pub fn with_leeway_secs(self, leeway: u64) -> Self {
        Self { leeway, ..self }
    }

    /// Uses `clock` to decide whether tokens are inside their validity window
    pub fn with_clock<D>(self, clock: D) -> IntrospectorBuilder<D> {
        IntrospectorBuilder {
            static_keys: self.static_keys,
            key_source: self.key_source,
            remote: self.remote,
            allowed_algorithms: self.allowed_algorithms,
            leeway: self.leeway,
            clock,
        }
    }

    /// Validates the configuration and constructs the introspector
    ///
    /// # Errors
    ///
    /// * No strategy was configured
    /// * A local strategy was configured without any allowed algorithm
    pub fn build(self) -> Result<Introspector<C>, ConfigurationError> {
        let verifies_locally = self.static_keys.is_some() || self.key_source.is_some();

        if !verifies_locally && self.remote.is_none() {
            return Err(ConfigurationError::NoStrategy);
        }

        if verifies_locally && self.allowed_algorithms.is_empty() {
            return Err(ConfigurationError::NoAllowedAlgorithms);
        }

        let verifier = LocalVerifier::new(self.allowed_algorithms)
            .with_leeway_secs(self.leeway)
            .with_clock(self.clock);

        Ok(Introspector {
            inner: Arc::new(Inner {
                static_keys: self.static_keys,
                key_source: self.key_source,
                remote: self.remote,
                verifier,
            }),
        })
    }
}
