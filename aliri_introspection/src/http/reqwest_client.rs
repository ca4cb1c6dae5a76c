use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    Client, Proxy, Response,
};
use url::Url;

use super::{FormRequest, HttpClient, HttpResponse};
use crate::error::TransportError;

/// An [`HttpClient`] backed by a [`reqwest::Client`]
#[derive(Clone, Debug)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    /// Wraps an existing `reqwest` client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client with the given user agent, optional proxy, and
    /// optional per-request timeout
    pub fn from_settings(
        user_agent: &str,
        proxy: Option<&Url>,
        timeout: Option<Duration>,
    ) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder().user_agent(user_agent);

        if let Some(proxy) = proxy {
            builder = builder.proxy(Proxy::all(proxy.as_str())?);
        }

        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self::new(builder.build()?))
    }
}

impl From<Client> for ReqwestClient {
    fn from(client: Client) -> Self {
        Self::new(client)
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(TransportError::new)?;

        read_response(response).await
    }

    async fn post_form(&self, request: &FormRequest) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .post(request.url.clone())
            .header(AUTHORIZATION, &request.authorization)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(request.body.clone())
            .send()
            .await
            .map_err(TransportError::new)?;

        read_response(response).await
    }
}

async fn read_response(response: Response) -> Result<HttpResponse, TransportError> {
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(TransportError::new)?;

    Ok(HttpResponse::new(status, body.to_vec()))
}
