//! Local verification of JWT access tokens

use aliri::{
    error::{ClaimsRejected, JwtVerifyError},
    jwa,
    jwt::{BasicHeaders, CoreValidator},
    Jwk, JwtRef,
};
use aliri_clock::{Clock, System};

use crate::{
    claims::{Claims, ValidityWindow},
    error::{IntrospectionError, KeySourceError},
    introspector::{IntrospectionResult, VerificationMethod},
    jwks::KeyStrategy,
    keys::select_candidates,
    token::DecodedHeader,
};

const ACCESS_TOKEN_HINT: &str = "access_token";

/// Verifies signed JWTs against locally available or fetched keys
///
/// A token is accepted when one candidate key verifies its signature
/// under an allowed algorithm and the token is inside its validity
/// window. An expired or not-yet-valid token is rejected as soon as it
/// is found; any other failure moves on to the next candidate key.
#[derive(Clone, Debug)]
pub struct LocalVerifier<C = System> {
    allowed_algorithms: Vec<jwa::Algorithm>,
    leeway: u64,
    validator: CoreValidator,
    clock: C,
}

impl LocalVerifier {
    /// Constructs a verifier accepting the given algorithms
    pub fn new(allowed_algorithms: impl IntoIterator<Item = jwa::Algorithm>) -> Self {
        let allowed_algorithms: Vec<_> = allowed_algorithms.into_iter().collect();
        let validator = CoreValidator::default()
            .ignore_expiration()
            .ignore_not_before()
            .extend_approved_algorithms(allowed_algorithms.iter().copied());

        Self {
            allowed_algorithms,
            leeway: 0,
            validator,
            clock: System,
        }
    }
}

impl<C> LocalVerifier<C> {
    /// Tolerates clock skew of `leeway` seconds around `exp` and `nbf`
    pub fn with_leeway_secs(self, leeway: u64) -> Self {
        Self { leeway, ..self }
    }

    /// Uses `clock` to decide whether a token is inside its validity window
    pub fn with_clock<D>(self, clock: D) -> LocalVerifier<D> {
        LocalVerifier {
            allowed_algorithms: self.allowed_algorithms,
            leeway: self.leeway,
            validator: self.validator,
            clock,
        }
    }

    /// The algorithms accepted by this verifier
    pub fn allowed_algorithms(&self) -> &[jwa::Algorithm] {
        &self.allowed_algorithms
    }

    /// The clock skew tolerance, in seconds
    pub fn leeway_secs(&self) -> u64 {
        self.leeway
    }
}

impl<C: Clock> LocalVerifier<C> {
    /// Verifies `token` using keys obtained through `keys`
    ///
    /// A present `token_type_hint` other than `access_token` is rejected
    /// before the token is inspected. With [`KeyStrategy::ByKeyId`], the
    /// token must carry a `kid`, and failure to obtain that key is
    /// reported as [`IntrospectionError::KeyNotFound`].
    pub async fn introspect(
        &self,
        token: &str,
        token_type_hint: Option<&str>,
        keys: KeyStrategy<'_>,
    ) -> Result<IntrospectionResult, IntrospectionError> {
        if let Some(hint) = token_type_hint {
            if hint != ACCESS_TOKEN_HINT {
                return Err(IntrospectionError::UnsupportedTokenType {
                    hint: hint.to_owned(),
                });
            }
        }

        let header = DecodedHeader::decode(token).ok_or(IntrospectionError::MalformedToken)?;

        if !self.is_allowed(header.alg()) {
            tracing::debug!(alg = header.alg(), "token algorithm is not allowed");
            return Err(IntrospectionError::NoMatchingKey);
        }

        let jwt = JwtRef::from_str(token);

        match keys {
            KeyStrategy::Static(keys) => {
                let candidates = select_candidates(&header, keys);
                tracing::trace!(
                    alg = header.alg(),
                    candidates = candidates.len(),
                    "selected candidate keys"
                );
                self.verify_with_candidates(
                    jwt,
                    candidates.into_iter().map(|k| k.jwk()),
                    VerificationMethod::StaticKeys,
                )
            }
            KeyStrategy::ByKeyId(source) => {
                let kid = header
                    .kid()
                    .ok_or(IntrospectionError::KeyNotFound(KeySourceError::MissingKeyId))?;
                let key = source
                    .signing_key(kid)
                    .await
                    .map_err(IntrospectionError::KeyNotFound)?;
                self.verify_with_candidates(
                    jwt,
                    std::iter::once(key.jwk()),
                    VerificationMethod::RemoteJwks,
                )
            }
        }
    }

    fn is_allowed(&self, alg: &str) -> bool {
        alg.parse::<jwa::Algorithm>()
            .map(|alg| self.allowed_algorithms.contains(&alg))
            .unwrap_or(false)
    }

    fn verify_with_candidates<'k>(
        &self,
        jwt: &JwtRef,
        candidates: impl IntoIterator<Item = &'k Jwk>,
        method: VerificationMethod,
    ) -> Result<IntrospectionResult, IntrospectionError> {
        let window = ValidityWindow {
            clock: &self.clock,
            leeway: self.leeway,
        };

        for (idx, jwk) in candidates.into_iter().enumerate() {
            let result =
                jwt.verify_with_custom::<Claims, BasicHeaders, _, _>(jwk, &self.validator, &window);

            match result {
                Ok(validated) => {
                    let (_, claims) = validated.extract();
                    return Ok(IntrospectionResult::verified(
                        claims.into_payload(),
                        method,
                    ));
                }
                Err(JwtVerifyError::ClaimsRejected(ClaimsRejected::TokenExpired)) => {
                    return Err(IntrospectionError::TokenExpired)
                }
                Err(JwtVerifyError::ClaimsRejected(ClaimsRejected::TokenNotYetValid)) => {
                    return Err(IntrospectionError::TokenNotYetValid)
                }
                Err(err) => {
                    let error: &dyn std::error::Error = &err;
                    tracing::trace!(error, candidate = idx, jwk.kid = ?jwk.key_id(), "candidate key rejected token");
                }
            }
        }

        Err(IntrospectionError::NoMatchingKey)
    }
}
