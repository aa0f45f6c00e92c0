//! REST implementation of the remote store

use crate::store::traits::{EventStream, RemoteStore, TimestampMode, TransportError};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

/// Store client speaking the `{path}.json?auth=TOKEN` REST dialect
pub struct RestStoreClient {
    http: Client,
    base_url: String,
    request_timeout: Duration,
    timestamps: TimestampMode,
}

impl RestStoreClient {
    /// Create a client for the database rooted at `base_url`
    ///
    /// `request_timeout` bounds single calls; subscriptions are only bounded
    /// while connecting, their reads are timed by the caller.
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        timestamps: TimestampMode,
    ) -> Result<Self, TransportError> {
        let http = Client::builder()
            .connect_timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
            timestamps,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }

    fn request(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder
            .query(&[("auth", token)])
            .timeout(self.request_timeout)
    }
}

/// Map non-success statuses to errors, keeping the body for diagnostics
async fn check(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(TransportError::Unauthorized);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(TransportError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

#[async_trait]
impl RemoteStore for RestStoreClient {
    async fn get(&self, path: &str, token: &str) -> Result<Value, TransportError> {
        let response = self
            .request(self.http.get(self.url(path)), token)
            .send()
            .await?;
        let value = check(response).await?.json::<Value>().await?;
        Ok(value)
    }

    async fn put(&self, path: &str, body: &Value, token: &str) -> Result<(), TransportError> {
        let response = self
            .request(self.http.put(self.url(path)), token)
            .json(body)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn patch(&self, path: &str, body: &Value, token: &str) -> Result<(), TransportError> {
        let response = self
            .request(self.http.patch(self.url(path)), token)
            .json(body)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete(&self, path: &str, token: &str) -> Result<(), TransportError> {
        let response = self
            .request(self.http.delete(self.url(path)), token)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn subscribe(&self, path: &str, token: &str) -> Result<EventStream, TransportError> {
        let url = self.url(path);
        debug!("[STREAM] GET {}", url);

        let response = tokio::time::timeout(
            self.request_timeout,
            self.http
                .get(&url)
                .query(&[("auth", token)])
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .send(),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        let response = check(response).await?;
        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(TransportError::from)),
        ))
    }

    fn timestamp_mode(&self) -> TimestampMode {
        self.timestamps
    }
}
