//! Errors produced while configuring an introspector or introspecting a token

use std::{error::Error as StdError, fmt};

use aliri::jwk::KeyId;
use thiserror::Error;

/// The closed classification of introspection failures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The introspector was constructed without a usable strategy
    Configuration,
    /// The token is not a three-segment JWT with a decodable header
    MalformedToken,
    /// Local verification was asked to verify something other than an access token
    UnsupportedTokenType,
    /// No candidate key verified the token
    NoMatchingKey,
    /// The remote key source could not produce the signing key
    KeyNotFound,
    /// The token's `exp` has passed
    TokenExpired,
    /// The token's `nbf` is still in the future
    TokenNotYetValid,
    /// The request to the introspection endpoint failed in transit
    IntrospectionRequestFailed,
    /// The introspection endpoint answered with an unusable response
    IntrospectionServerError,
    /// The token was not shown to be active
    TokenNotActive,
}

impl ErrorKind {
    /// Whether this failure ends the strategy chain instead of falling
    /// through to the next configured strategy
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::Configuration | Self::TokenExpired | Self::TokenNotYetValid
        )
    }

    /// Whether this failure means the token is not active, as opposed to
    /// the introspection itself having failed
    pub fn is_not_active(self) -> bool {
        matches!(
            self,
            Self::TokenNotActive | Self::TokenExpired | Self::TokenNotYetValid
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::MalformedToken => "malformed_token",
            Self::UnsupportedTokenType => "unsupported_token_type",
            Self::NoMatchingKey => "no_matching_key",
            Self::KeyNotFound => "key_not_found",
            Self::TokenExpired => "token_expired",
            Self::TokenNotYetValid => "token_not_yet_valid",
            Self::IntrospectionRequestFailed => "introspection_request_failed",
            Self::IntrospectionServerError => "introspection_server_error",
            Self::TokenNotActive => "token_not_active",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The introspector cannot be constructed from the provided options
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// None of a static JWKS, a JWKS URI, or an introspection endpoint was provided
    #[error("one of a static JWKS, a JWKS URI, or an introspection endpoint must be configured")]
    NoStrategy,
    /// Local verification was configured without any allowed algorithm
    #[error("at least one algorithm must be allowed when verifying tokens locally")]
    NoAllowedAlgorithms,
    /// A remote strategy was configured but no HTTP client is available
    #[error("an HTTP client is required to use the configured {0}")]
    MissingHttpClient(&'static str),
    /// The HTTP client could not be constructed
    #[error("unable to construct HTTP client")]
    HttpClient(#[source] Box<dyn StdError + Send + Sync + 'static>),
}

/// An outbound HTTP request did not produce a response
#[derive(Debug, Error)]
#[error("HTTP request failed")]
pub struct TransportError {
    #[source]
    source: Box<dyn StdError + Send + Sync + 'static>,
}

impl TransportError {
    /// Wraps the underlying failure of an HTTP client
    pub fn new(source: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// A JWK could not be used as a verification key
#[derive(Debug, Error)]
pub enum KeyRejected {
    /// The JWK does not carry a supported `kty`
    #[error("JWK key type is not supported")]
    UnsupportedKeyType,
    /// The JWK could not be re-encoded to determine its key type
    #[error("JWK could not be encoded")]
    Encoding(#[from] serde_json::Error),
}

/// A key source could not provide the requested key
#[derive(Debug, Error)]
pub enum KeySourceError {
    /// The token header does not name a key
    #[error("token header does not specify a kid")]
    MissingKeyId,
    /// The request for the JWKS failed in transit
    #[error("JWKS request failed")]
    Request(#[from] TransportError),
    /// The JWKS endpoint answered with a non-success status
    #[error("JWKS endpoint responded with unexpected status {status}")]
    UnexpectedStatus {
        /// The HTTP status code
        status: u16,
    },
    /// The JWKS response body was not a key set
    #[error("JWKS response could not be decoded")]
    Decode(#[from] serde_json::Error),
    /// The JWKS request ceiling was reached
    #[error("JWKS request rate limit exceeded")]
    RateLimited,
    /// The key set does not contain the requested key
    #[error("no signing key with kid `{kid}` was found")]
    UnknownKeyId {
        /// The requested key ID
        kid: KeyId,
    },
}

/// Introspection did not produce an active token
#[derive(Debug, Error)]
pub enum IntrospectionError {
    /// The introspector is misconfigured
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The token is not a well-formed JWT
    #[error("token is not a well-formed JWT")]
    MalformedToken,
    /// Local verification only verifies access tokens
    #[error("token type hint `{hint}` is not supported; only access tokens can be verified locally")]
    UnsupportedTokenType {
        /// The rejected hint
        hint: String,
    },
    /// No candidate key verified the token
    #[error("no key was able to verify the token")]
    NoMatchingKey,
    /// The signing key could not be obtained from the remote key source
    #[error("signing key not found")]
    KeyNotFound(#[source] KeySourceError),
    /// The token has expired
    #[error("token has expired")]
    TokenExpired,
    /// The token is not valid yet
    #[error("token is not yet valid")]
    TokenNotYetValid,
    /// The request to the introspection endpoint failed in transit
    #[error("introspection request failed")]
    IntrospectionRequestFailed(#[source] TransportError),
    /// The introspection endpoint answered with an unusable response
    #[error("introspection endpoint responded with status {status}: {body}")]
    IntrospectionServerError {
        /// The HTTP status code
        status: u16,
        /// The response body, decoded lossily as UTF-8
        body: String,
    },
    /// The token is not active
    #[error("token is not active")]
    TokenNotActive,
}

impl IntrospectionError {
    /// The classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::MalformedToken => ErrorKind::MalformedToken,
            Self::UnsupportedTokenType { .. } => ErrorKind::UnsupportedTokenType,
            Self::NoMatchingKey => ErrorKind::NoMatchingKey,
            Self::KeyNotFound(_) => ErrorKind::KeyNotFound,
            Self::TokenExpired => ErrorKind::TokenExpired,
            Self::TokenNotYetValid => ErrorKind::TokenNotYetValid,
            Self::IntrospectionRequestFailed(_) => ErrorKind::IntrospectionRequestFailed,
            Self::IntrospectionServerError { .. } => ErrorKind::IntrospectionServerError,
            Self::TokenNotActive => ErrorKind::TokenNotActive,
        }
    }

    /// Whether this error ends the strategy chain
    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }

    /// Whether this error means the token is not active
    pub fn is_not_active(&self) -> bool {
        self.kind().is_not_active()
    }
}
