use super::{MAX_LOOKUP_IDS, Result, Upstream, UpstreamError};
use crate::model::Message;
use crate::payload::{DecodedBatch, decode_batch, decode_statuses};
use chrono::NaiveDate;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.twitter.com/1.1";

/// Live adapter for the platform's v1.1 REST endpoints.
///
/// Calls are blocking: each request is driven to completion on a private
/// current-thread runtime.
pub struct HttpUpstream {
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
    base_url: String,
    token: String,
}

impl HttpUpstream {
    /// Build an adapter authenticating with an app-only bearer token.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client or runtime cannot be created.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("twcs/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| UpstreamError::Network(e.to_string()))?;

        Ok(Self {
            client,
            runtime,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(endpoint, "GET");

        self.runtime.block_on(async {
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .query(query)
                .send()
                .await?;

            let status = resp.status();
            if status.as_u16() == 429 {
                let reset = resp
                    .headers()
                    .get("x-rate-limit-reset")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                return Err(UpstreamError::RateLimited { reset });
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(UpstreamError::Api {
                    status: status.as_u16(),
                    message: body,
                });
            }

            let body = resp.text().await?;
            Ok(serde_json::from_str(&body)?)
        })
    }
}

fn into_statuses(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(UpstreamError::Parse(format!(
            "expected an array of statuses, got {}",
            kind_of(&other)
        ))),
    }
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Upstream for HttpUpstream {
    fn search(&self, query: &str, since: Option<NaiveDate>, limit: usize) -> Result<Vec<Message>> {
        let mut params = vec![
            ("q", query.to_string()),
            ("count", limit.to_string()),
            ("result_type", "recent".to_string()),
            ("tweet_mode", "extended".to_string()),
        ];
        if let Some(since) = since {
            params.push(("since", since.format("%Y-%m-%d").to_string()));
        }

        let mut body = self.get("search/tweets.json", &params)?;
        let statuses = into_statuses(body["statuses"].take())?;
        Ok(decode_statuses(statuses))
    }

    fn user_timeline(
        &self,
        screen_name: &str,
        since_id: Option<&str>,
        limit: usize,
        include_replies: bool,
    ) -> Result<Vec<Message>> {
        let mut params = vec![
            ("screen_name", screen_name.to_string()),
            ("count", limit.to_string()),
            ("exclude_replies", (!include_replies).to_string()),
            ("tweet_mode", "extended".to_string()),
        ];
        if let Some(since_id) = since_id {
            params.push(("since_id", since_id.to_string()));
        }

        let body = self.get("statuses/user_timeline.json", &params)?;
        Ok(decode_statuses(into_statuses(body)?))
    }

    fn lookup(&self, ids: &[String]) -> Result<DecodedBatch> {
        let mut batch = DecodedBatch::default();
        for chunk in ids.chunks(MAX_LOOKUP_IDS) {
            let params = [
                ("id", chunk.join(",")),
                ("tweet_mode", "extended".to_string()),
            ];
            let body = self.get("statuses/lookup.json", &params)?;
            batch.extend(decode_batch(into_statuses(body)?));
        }
        Ok(batch)
    }
}
