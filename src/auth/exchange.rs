//! Two-step credential exchange: device secret -> custom token -> ID token

use super::token::{AuthError, AuthStage, AuthToken, TokenSource};
use async_trait::async_trait;
use gharswitch_shared::now_ms;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CustomTokenRequest<'a> {
    device_id: &'a str,
    device_secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct CustomTokenResponse {
    token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest<'a> {
    token: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: Option<String>,
}

/// Mints ID tokens over HTTPS
pub struct CustomTokenExchange {
    http: Client,
    token_url: String,
    identity_url: String,
    api_key: String,
    device_id: String,
    device_secret: String,
}

impl CustomTokenExchange {
    pub fn new(
        token_url: impl Into<String>,
        identity_url: impl Into<String>,
        api_key: impl Into<String>,
        device_id: impl Into<String>,
        device_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            token_url: token_url.into(),
            identity_url: identity_url.into(),
            api_key: api_key.into(),
            device_id: device_id.into(),
            device_secret: device_secret.into(),
        })
    }

    async fn custom_token(&self) -> Result<String, AuthError> {
        let stage = AuthStage::CustomToken;
        let response = self
            .http
            .post(&self.token_url)
            .json(&CustomTokenRequest {
                device_id: &self.device_id,
                device_secret: &self.device_secret,
            })
            .send()
            .await
            .map_err(|e| request_error(stage, e))?;

        let body: CustomTokenResponse = read_success(stage, response).await?;
        body.token.ok_or(AuthError::MissingField {
            stage,
            field: "token",
        })
    }

    async fn id_token(&self, custom_token: &str) -> Result<String, AuthError> {
        let stage = AuthStage::IdToken;
        let response = self
            .http
            .post(&self.identity_url)
            .query(&[("key", self.api_key.as_str())])
            .json(&SignInRequest {
                token: custom_token,
                return_secure_token: true,
            })
            .send()
            .await
            .map_err(|e| request_error(stage, e))?;

        let body: SignInResponse = read_success(stage, response).await?;
        body.id_token.ok_or(AuthError::MissingField {
            stage,
            field: "idToken",
        })
    }
}

fn request_error(stage: AuthStage, e: reqwest::Error) -> AuthError {
    AuthError::Request {
        stage,
        message: e.to_string(),
    }
}

async fn read_success<T: for<'de> Deserialize<'de>>(
    stage: AuthStage,
    response: reqwest::Response,
) -> Result<T, AuthError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::Rejected {
            stage,
            status: status.as_u16(),
            body,
        });
    }
    response.json::<T>().await.map_err(|e| request_error(stage, e))
}

#[async_trait]
impl TokenSource for CustomTokenExchange {
    async fn obtain_token(&self) -> Result<AuthToken, AuthError> {
        debug!("[AUTH] Requesting custom token for {}", self.device_id);
        let custom = self.custom_token().await?;

        debug!("[AUTH] Exchanging custom token");
        let value = self.id_token(&custom).await?;

        Ok(AuthToken {
            value,
            obtained_at: now_ms(),
        })
    }
}
