pub mod reference;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use url::Url;

use crate::config::{Credential, RemoteConfig};
use crate::error::{Error, Result};

pub use reference::extract_display_value;

const QUERY_PARAM: &str = "sysparm_query";
const JSON: &str = "application/json";
/// Longest response body kept in a `Remote` error.
const ERROR_BODY_LIMIT: usize = 2048;

/// Source of raw incident listings.
#[async_trait]
pub trait IncidentSource: Send + Sync {
    /// Issue the listing request for an encoded query and return the raw
    /// response body.
    async fn fetch_incidents(&self, query: &str) -> Result<String>;
}

/// HTTP client for the remote incident table API.
pub struct ServiceNowClient {
    http: reqwest::Client,
    incidents_url: Url,
    credential: Credential,
}

impl ServiceNowClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let incidents_url = Url::parse(&config.incidents_url)
            .map_err(|e| Error::Config(format!("invalid incidents URL: {e}")))?;
        let credential = config.credential()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            incidents_url,
            credential,
        })
    }

    /// The endpoint URL with `sysparm_query` set, replacing any value already
    /// present in the configured URL.
    pub fn request_url(&self, query: &str) -> Url {
        let mut url = self.incidents_url.clone();
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != QUERY_PARAM)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(QUERY_PARAM, query);
        url
    }
}

#[async_trait]
impl IncidentSource for ServiceNowClient {
    async fn fetch_incidents(&self, query: &str) -> Result<String> {
        let url = self.request_url(query);
        log::debug!("GET {url}");

        let request = self
            .http
            .get(url)
            .header(ACCEPT, JSON)
            .header(CONTENT_TYPE, JSON);
        let request = match &self.credential {
            Credential::Header(value) => request.header(AUTHORIZATION, value),
            Credential::Basic { username, password } => request.basic_auth(username, Some(password)),
        };

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::Remote {
                status: status.as_u16(),
                body: truncate(body, ERROR_BODY_LIMIT),
            });
        }
        Ok(body)
    }
}

/// Unwrap the `{"result": [...]}` envelope of a listing response.
pub fn parse_envelope(body: &str) -> Result<Vec<Value>> {
    let mut envelope: Value = serde_json::from_str(body)
        .map_err(|e| Error::MalformedResponse(format!("body is not JSON: {e}")))?;
    match envelope.get_mut("result").map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(Error::MalformedResponse("`result` is not an array".into())),
        None => Err(Error::MalformedResponse("missing `result`".into())),
    }
}

fn truncate(mut s: String, limit: usize) -> String {
    if s.len() > limit {
        let mut cut = limit;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("...");
    }
    s
}
