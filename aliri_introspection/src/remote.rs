//! Introspection against an RFC 7662 token introspection endpoint

use std::sync::Arc;

use aliri_base64::Base64;
use serde_json::{Map, Value};
use url::{form_urlencoded, Url};

use crate::{
    braids::{AccessToken, ClientId, ClientSecret},
    error::IntrospectionError,
    http::{FormRequest, HttpClient},
    introspector::{IntrospectionResult, VerificationMethod},
};

/// How the introspector authenticates to the introspection endpoint
#[derive(Clone, Debug)]
pub enum ClientAuthentication {
    /// HTTP Basic authentication with client credentials
    Basic {
        /// The client ID
        client_id: ClientId,
        /// The client secret
        client_secret: ClientSecret,
    },
    /// A bearer token
    Bearer(AccessToken),
}

impl ClientAuthentication {
    /// Authenticates with HTTP Basic client credentials
    pub fn basic(client_id: ClientId, client_secret: ClientSecret) -> Self {
        Self::Basic {
            client_id,
            client_secret,
        }
    }

    /// Authenticates with a bearer token
    pub fn bearer(access_token: AccessToken) -> Self {
        Self::Bearer(access_token)
    }

    fn header_value(&self) -> String {
        match self {
            Self::Basic {
                client_id,
                client_secret,
            } => {
                let credentials = format!("{}:{}", client_id.as_str(), client_secret.as_str());
                format!("Basic {}", Base64::from_raw(credentials))
            }
            Self::Bearer(token) => format!("Bearer {}", token.as_str()),
        }
    }
}

/// Asks an introspection endpoint whether a token is active
#[derive(Clone, Debug)]
pub struct RemoteIntrospector {
    endpoint: Url,
    authentication: ClientAuthentication,
    client: Arc<dyn HttpClient>,
}

impl RemoteIntrospector {
    /// Constructs an introspector for `endpoint`
    pub fn new(
        endpoint: Url,
        authentication: ClientAuthentication,
        client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            endpoint,
            authentication,
            client,
        }
    }

    /// The introspection endpoint
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Introspects `token`, passing `token_type_hint` through when present
    ///
    /// The token is active when the response's `active` member is `true`
    /// or the string `"true"`; the full response body is then returned as
    /// the claims. Non-2xx responses are reported with their status and
    /// body.
    #[tracing::instrument(skip(self, token), fields(introspection.endpoint = %self.endpoint))]
    pub async fn introspect(
        &self,
        token: &str,
        token_type_hint: Option<&str>,
    ) -> Result<IntrospectionResult, IntrospectionError> {
        let request = self.request(token, token_type_hint);

        let response = match self.client.post_form(&request).await {
            Ok(response) => response,
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "introspection request failed");
                return Err(IntrospectionError::IntrospectionRequestFailed(err));
            }
        };

        if !response.is_success() {
            tracing::warn!(
                http.status_code = response.status,
                "introspection request failed; unexpected response status",
            );
            return Err(IntrospectionError::IntrospectionServerError {
                status: response.status,
                body: response.body_text(),
            });
        }

        let claims = match serde_json::from_slice::<Value>(&response.body) {
            Ok(Value::Object(claims)) => claims,
            Ok(_) => {
                tracing::debug!("introspection response is not a JSON object");
                return Err(IntrospectionError::TokenNotActive);
            }
            Err(err) => {
                let error: &dyn std::error::Error = &err;
                tracing::warn!(error, "unable to deserialize introspection response");
                return Err(IntrospectionError::IntrospectionServerError {
                    status: response.status,
                    body: response.body_text(),
                });
            }
        };

        if is_active(&claims) {
            tracing::debug!("token is active");
            Ok(IntrospectionResult::new(
                claims,
                VerificationMethod::RemoteEndpoint,
            ))
        } else {
            tracing::debug!("token is not active");
            Err(IntrospectionError::TokenNotActive)
        }
    }

    fn request(&self, token: &str, token_type_hint: Option<&str>) -> FormRequest {
        let mut body = form_urlencoded::Serializer::new(String::new());
        body.append_pair("token", token);
        if let Some(hint) = token_type_hint {
            body.append_pair("token_type_hint", hint);
        }

        FormRequest {
            url: self.endpoint.clone(),
            authorization: self.authentication.header_value(),
            body: body.finish(),
        }
    }
}

fn is_active(claims: &Map<String, Value>) -> bool {
    match claims.get("active") {
        Some(Value::Bool(active)) => *active,
        Some(Value::String(active)) => active == "true",
        _ => false,
    }
}
