//! HTTP implementation of the control API, speaking to a Clash-compatible external
//! controller.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::{Error, Result};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use switchyard_api::{ControlApi, DelayProbe, GroupRecord, ProxiesResponse, RoutingMode};
use tracing::debug;
use url::Url;

/// Default timeout applied to every request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for the external controller.
#[derive(Clone, Debug)]
pub struct HttpControlApiConfig {
    /// Base URL of the controller, e.g. `http://127.0.0.1:9090`.
    pub base_url: Url,

    /// Secret sent as a bearer token, if the controller requires one.
    pub secret: Option<String>,

    /// Timeout applied to every request.
    pub request_timeout: Duration,
}

impl HttpControlApiConfig {
    /// Creates a config for `base_url` with no secret and the default timeout.
    #[must_use]
    pub const fn new(base_url: Url) -> Self {
        Self {
            base_url,
            secret: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize, Serialize)]
struct ModeBody {
    mode: RoutingMode,
}

#[derive(Serialize)]
struct SelectBody<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct DelayBody {
    delay: u64,
}

/// Control API client over HTTP.
#[derive(Clone, Debug)]
pub struct HttpControlApi {
    client: Client,
    config: HttpControlApiConfig,
}

impl HttpControlApi {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL cannot carry a path or the HTTP client cannot be
    /// built.
    pub fn new(config: HttpControlApiConfig) -> Result<Self> {
        if config.base_url.cannot_be_a_base() {
            return Err(Error::BaseUrl(config.base_url.to_string()));
        }

        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self { client, config })
    }

    /// Builds the URL for `segments` below the base URL, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.config.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| Error::BaseUrl(self.config.base_url.to_string()))?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.secret {
            Some(secret) if !secret.is_empty() => request.bearer_auth(secret),
            _ => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authorize(request).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or(body);

        Err(Error::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ControlApi for HttpControlApi {
    type Error = Error;

    async fn fetch_groups(&self) -> Result<HashMap<String, GroupRecord>> {
        let url = self.endpoint(&["proxies"])?;
        let response = self.send(self.client.get(url)).await?;
        let json = response.text().await?;
        let body: ProxiesResponse = serde_json::from_str(&json)?;

        debug!("engine reported {} proxies", body.proxies.len());

        Ok(body.into_records())
    }

    async fn set_group_selection(&self, group: &str, proxy: &str) -> Result<()> {
        let url = self.endpoint(&["proxies", group])?;
        self.send(self.client.put(url).json(&SelectBody { name: proxy }))
            .await?;

        Ok(())
    }

    async fn fetch_mode(&self) -> Result<RoutingMode> {
        let url = self.endpoint(&["configs"])?;
        let response = self.send(self.client.get(url)).await?;
        let json = response.text().await?;
        let body: ModeBody = serde_json::from_str(&json)?;

        Ok(body.mode)
    }

    async fn set_mode(&self, mode: RoutingMode) -> Result<()> {
        let url = self.endpoint(&["configs"])?;
        self.send(self.client.patch(url).json(&ModeBody { mode }))
            .await?;

        Ok(())
    }

    async fn measure_delay(&self, proxy: &str, probe: &DelayProbe) -> Result<Duration> {
        let mut url = self.endpoint(&["proxies", proxy, "delay"])?;
        url.query_pairs_mut()
            .append_pair("timeout", &probe.timeout.as_millis().to_string())
            .append_pair("url", probe.url.as_str());

        // The engine enforces the probe timeout itself, leave it some slack on our side.
        let request = self
            .client
            .get(url)
            .timeout(probe.timeout + self.config.request_timeout);
        let response = self.send(request).await?;
        let json = response.text().await?;
        let body: DelayBody = serde_json::from_str(&json)?;

        Ok(Duration::from_millis(body.delay))
    }
}

#[cfg(test)]
mod tests {
    use switchyard_api::{ControlApiError, ControlApiErrorKind};

    use super::*;

    fn api(base: &str) -> HttpControlApi {
        HttpControlApi::new(HttpControlApiConfig::new(Url::parse(base).unwrap())).unwrap()
    }

    #[test]
    fn test_endpoint_encodes_group_names() {
        let api = api("http://127.0.0.1:9090");
        let url = api.endpoint(&["proxies", "Proxy Group/A"]).unwrap();

        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:9090/proxies/Proxy%20Group%2FA"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let api = api("http://localhost:9090/api/");
        let url = api.endpoint(&["configs"]).unwrap();

        assert_eq!(url.as_str(), "http://localhost:9090/api/configs");
    }

    #[test]
    fn test_rejects_non_base_url() {
        let config = HttpControlApiConfig::new(Url::parse("mailto:ops@example.com").unwrap());

        assert!(matches!(
            HttpControlApi::new(config),
            Err(Error::BaseUrl(_))
        ));
    }

    #[test]
    fn test_status_error_kinds() {
        let rejected = Error::Status {
            status: 400,
            message: "Selector update error: proxy not exist".to_string(),
        };
        let timed_out = Error::Status {
            status: 408,
            message: "Timeout".to_string(),
        };

        assert_eq!(rejected.kind(), ControlApiErrorKind::Rejected);
        assert_eq!(timed_out.kind(), ControlApiErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_unreachable_controller() {
        // Port 9 (discard) is almost never served on loopback.
        let api = api("http://127.0.0.1:9");
        let err = api.fetch_groups().await.unwrap_err();

        assert_ne!(err.kind(), ControlApiErrorKind::Rejected);
    }
}
