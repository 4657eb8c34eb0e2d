use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};

use super::GoogleServiceAccount;
use super::jwt::sign_assertion;
use super::object::{GenericClass, GenericObject};

pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_API_BASE: &str = "https://walletobjects.googleapis.com/walletobjects/v1";
pub const DEFAULT_REST_TIMEOUT: Duration = Duration::from_secs(10);
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// A failed call to Google's token or Wallet Objects endpoints.
///
/// Never fatal to a pass request: the save link works without them.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} returned {status}: {body}")]
    Status {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("invalid endpoint `{url}`: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("could not sign token assertion: {0}")]
    Assertion(String),
}

/// Where tokens and Wallet Objects live; overridable for tests and proxies.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct GoogleEndpoints {
    pub token_url: String,
    pub api_base: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            token_url: DEFAULT_TOKEN_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Thin client for the OAuth token exchange and the generic class/object resources.
#[derive(Clone)]
pub struct WalletRestClient {
    http: reqwest::Client,
    endpoints: GoogleEndpoints,
}

impl WalletRestClient {
    pub fn new(endpoints: GoogleEndpoints, timeout: Duration) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, endpoints })
    }

    pub fn with_client(http: reqwest::Client, endpoints: GoogleEndpoints) -> Self {
        Self { http, endpoints }
    }

    pub fn endpoints(&self) -> &GoogleEndpoints {
        &self.endpoints
    }

    /// Exchanges a signed assertion for a bearer token.
    pub async fn access_token(
        &self,
        account: &GoogleServiceAccount,
        now: OffsetDateTime,
    ) -> Result<String, UpstreamError> {
        let assertion = sign_assertion(account, &self.endpoints.token_url, now)
            .map_err(|err| UpstreamError::Assertion(err.to_string()))?;
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let token: TokenResponse = Self::handle_response("token exchange", response)
            .await?
            .json()
            .await?;
        debug!("obtained wallet access token");
        Ok(token.access_token)
    }

    /// Creates or replaces the class so the card row layout is current.
    pub async fn put_class(&self, token: &str, class: &GenericClass) -> Result<(), UpstreamError> {
        let url = self.resource_url("genericClass", &class.id)?;
        let response = self
            .http
            .put(url)
            .bearer_auth(token)
            .json(class)
            .send()
            .await?;
        Self::handle_response("class update", response).await?;
        info!(class_id = %class.id, "generic class updated");
        Ok(())
    }

    /// Pushes fresh runner data onto an already saved object.
    pub async fn patch_object(&self, token: &str, object: &GenericObject) -> Result<(), UpstreamError> {
        let url = self.resource_url("genericObject", &object.id)?;
        let response = self
            .http
            .patch(url)
            .bearer_auth(token)
            .json(object)
            .send()
            .await?;
        Self::handle_response("object patch", response).await?;
        info!(object_id = %object.id, "generic object patched");
        Ok(())
    }

    /// `<api_base>/<collection>/<id>`, with `id` percent-encoded as one segment.
    fn resource_url(&self, collection: &str, id: &str) -> Result<Url, UpstreamError> {
        let invalid = |reason: String| UpstreamError::InvalidEndpoint {
            url: self.endpoints.api_base.clone(),
            reason,
        };
        let mut url = Url::parse(&self.endpoints.api_base).map_err(|err| invalid(err.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("cannot be a base url".into()))?
            .pop_if_empty()
            .push(collection)
            .push(id);
        Ok(url)
    }

    async fn handle_response(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, UpstreamError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(UpstreamError::Status {
            operation,
            status,
            body,
        })
    }
}
