//! The outbound HTTP seam used for JWKS retrieval and remote introspection
//!
//! Implement [`HttpClient`] to route requests through an existing HTTP
//! stack. With the `reqwest` feature enabled, [`ReqwestClient`] provides
//! an implementation backed by [`reqwest`].

use std::fmt;

use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;

#[cfg(feature = "reqwest")]
mod reqwest_client;

#[cfg(feature = "reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
pub use reqwest_client::ReqwestClient;

/// A form-encoded POST request
///
/// The transport is responsible for sending the body with the
/// `application/x-www-form-urlencoded` content type.
#[derive(Clone, PartialEq, Eq)]
pub struct FormRequest {
    /// The target URL
    pub url: Url,
    /// The value of the `Authorization` header
    pub authorization: String,
    /// The already-encoded form body
    pub body: String,
}

impl fmt::Debug for FormRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FormRequest")
            .field("url", &self.url.as_str())
            .field("authorization", &"***")
            .field("body", &"***")
            .finish()
    }
}

/// A fully-read HTTP response
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    /// The HTTP status code
    pub status: u16,
    /// The response body
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Constructs a response from a status and body
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body, decoded lossily as UTF-8
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// An HTTP client able to make the requests needed for introspection
#[async_trait]
pub trait HttpClient: fmt::Debug + Send + Sync {
    /// Performs a `GET` request
    async fn get(&self, url: &Url) -> Result<HttpResponse, TransportError>;

    /// Performs a form-encoded `POST` request
    async fn post_form(&self, request: &FormRequest) -> Result<HttpResponse, TransportError>;
}
