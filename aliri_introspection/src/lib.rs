//! OAuth2 access token introspection
//!
//! An [`Introspector`] decides whether a token is active, trying up to
//! three strategies in order:
//!
//! 1. Verifying the token as a JWT against a static key set
//! 2. Verifying the token as a JWT against a key fetched by `kid` from a
//!    remote JSON Web Key Set
//! 3. Asking an [RFC 7662] token introspection endpoint
//!
//! A token that a local strategy finds to be expired or not yet valid is
//! rejected immediately; it is never sent to the introspection endpoint.
//! Any other local failure falls through to the next strategy.
//!
//! ```
//! use aliri::jwa;
//! use aliri_introspection::{Introspector, KeySet};
//!
//! let keys: KeySet = serde_json::from_str(
//!     r#"{"keys":[{"kty":"oct","kid":"k1","k":"c2VjcmV0"}]}"#,
//! )?;
//!
//! let introspector = Introspector::builder()
//!     .with_static_keys(keys)
//!     .with_allowed_algorithms([jwa::Algorithm::HS256])
//!     .build()?;
//! # drop(introspector);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Tokens can also be decoded without any verification using [`peek`]:
//!
//! ```
//! let peeked = aliri_introspection::peek("eyJhbGciOiJIUzI1NiJ9.eyJzdWIiOiJhbGljZSJ9.c2ln")
//!     .ok_or("not a JWT")?;
//!
//! assert_eq!(peeked.header["alg"], "HS256");
//! assert_eq!(peeked.payload["sub"], "alice");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Feature flags
//!
//! The `rsa`, `hmac`, and `ec` features enable the corresponding key
//! types in [`aliri`]. Only algorithms from enabled families can verify
//! tokens locally.
//!
//! With the `reqwest` feature, [`Introspector::from_config`] builds its
//! own HTTP client. This crate does not automatically enable TLS support
//! in `reqwest` itself. If your application already uses `reqwest` with
//! some TLS settings (native/OpenSSL/rustls), then this crate will use
//! those settings automatically. However, if the only reason you are
//! using `reqwest` is transitively through this crate, you may need to
//! enable the `default-tls` or `rustls-tls` feature to enable support for
//! calling out to an HTTPS endpoint. Without the `reqwest` feature, supply
//! an implementation of [`HttpClient`][http::HttpClient] instead.
//!
//!   [RFC 7662]: https://datatracker.ietf.org/doc/html/rfc7662

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
mod claims;
mod config;
pub mod error;
pub mod http;
mod introspector;
pub mod jwks;
pub mod keys;
mod local;
mod remote;
pub mod token;


pub use braids::*;
pub use config::IntrospectionConfig;
pub use error::{ConfigurationError, ErrorKind, IntrospectionError};
pub use introspector::{
    IntrospectionResult, Introspector, IntrospectorBuilder, VerificationMethod,
};
pub use jwks::{JwksCacheConfig, JwksKeySource, KeySource, KeyStrategy};
pub use keys::{select_candidates, Key, KeySet, KeyType};
pub use local::LocalVerifier;
pub use remote::{ClientAuthentication, RemoteIntrospector};
pub use token::{peek, DecodedHeader, Peeked};
