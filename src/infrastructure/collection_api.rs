//! Remote collection API access
//!
//! [`CatalogSource`] is the seam the ingestion engine talks to;
//! [`CollectionApiClient`] implements it over HTTP with reqwest:
//! - `GET /objects` lists every object id
//! - `GET /objects?metadataDate=YYYY-MM-DD` lists ids changed since a date
//! - `GET /objects/{id}` returns one object body

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::domain::{ObjectId, RecordPayload};
use crate::error::{IngestError, IngestResult};
use crate::infrastructure::config::IngestConfig;

#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Lists all object ids, or only those changed since `since`.
    async fn list_object_ids(&self, since: Option<NaiveDate>) -> IngestResult<Vec<ObjectId>>;

    /// Fetches one object body.
    async fn fetch_object(&self, id: ObjectId) -> IngestResult<RecordPayload>;
}

/// Configuration for HTTP client behavior
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Idle keep-alive connections kept per host
    pub max_idle_per_host: usize,
    /// User agent string
    pub user_agent: String,
}

impl HttpClientConfig {
    pub fn from_ingest_config(config: &IngestConfig) -> Self {
        Self {
            timeout_seconds: config.request_timeout_seconds,
            max_idle_per_host: config.fetch_concurrency,
            ..Self::default()
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_idle_per_host: 70,
            user_agent: concat!("collection-sync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Shape of both listing endpoints. `objectIDs` is `null` when nothing matched.
#[derive(Debug, Deserialize)]
struct ObjectIdListing {
    #[serde(default)]
    total: Option<u64>,
    #[serde(rename = "objectIDs", default)]
    object_ids: Option<Vec<ObjectId>>,
}

#[derive(Clone)]
pub struct CollectionApiClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl CollectionApiClient {
    pub fn new(base_url: &str, config: &HttpClientConfig) -> IngestResult<Self> {
        Url::parse(base_url)
            .map_err(|e| IngestError::Configuration(format!("Invalid API base URL '{}': {}", base_url, e)))?;

        let timeout = Duration::from_secs(config.timeout_seconds);
        let client = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(&config.user_agent)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .gzip(true)
            .build()
            .map_err(|e| IngestError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn from_ingest_config(config: &IngestConfig) -> IngestResult<Self> {
        Self::new(&config.api_base_url, &HttpClientConfig::from_ingest_config(config))
    }

    fn listing_url(&self, since: Option<NaiveDate>) -> IngestResult<Url> {
        let mut url = Url::parse(&format!("{}/objects", self.base_url))
            .map_err(|e| IngestError::Configuration(e.to_string()))?;
        if let Some(date) = since {
            url.query_pairs_mut()
                .append_pair("metadataDate", &date.format("%Y-%m-%d").to_string());
        }
        Ok(url)
    }

    fn object_url(&self, id: ObjectId) -> String {
        format!("{}/objects/{}", self.base_url, id)
    }

    fn transport_error(&self, id: ObjectId, e: &reqwest::Error) -> IngestError {
        if e.is_timeout() {
            IngestError::Timeout {
                id,
                timeout: self.timeout,
            }
        } else {
            IngestError::Transport {
                id,
                message: e.to_string(),
            }
        }
    }

    fn decode_listing(body: &str) -> Result<Vec<ObjectId>, serde_json::Error> {
        let listing: ObjectIdListing = serde_json::from_str(body)?;
        let ids = listing.object_ids.unwrap_or_default();
        debug!("Listing reported total={:?}, ids={}", listing.total, ids.len());
        Ok(ids)
    }

    fn decode_object(id: ObjectId, body: &str) -> IngestResult<RecordPayload> {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(IngestError::Decode {
                id,
                message: format!("expected a JSON object, got {}", json_kind(&other)),
            }),
            Err(e) => Err(IngestError::Decode {
                id,
                message: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl CatalogSource for CollectionApiClient {
    async fn list_object_ids(&self, since: Option<NaiveDate>) -> IngestResult<Vec<ObjectId>> {
        let url = self.listing_url(since)?;
        let endpoint = url.to_string();
        let listing_err = |message: String| IngestError::Listing {
            endpoint: endpoint.clone(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| listing_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(listing_err(format!("HTTP {}", status)));
        }

        let body = response.text().await.map_err(|e| listing_err(e.to_string()))?;
        let ids = Self::decode_listing(&body).map_err(|e| listing_err(e.to_string()))?;

        info!("📋 {} listed {} object ids", endpoint, ids.len());
        Ok(ids)
    }

    async fn fetch_object(&self, id: ObjectId) -> IngestResult<RecordPayload> {
        let response = self
            .client
            .get(self.object_url(id))
            .send()
            .await
            .map_err(|e| self.transport_error(id, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Http {
                id,
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| self.transport_error(id, &e))?;
        Self::decode_object(id, &body)
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> CollectionApiClient {
        CollectionApiClient::new(
            "https://collectionapi.metmuseum.org/public/collection/v1/",
            &HttpClientConfig::default(),
        )
        .expect("client")
    }

    #[test]
    fn builds_listing_and_object_urls() {
        let client = client();

        assert_eq!(
            client.listing_url(None).expect("url").as_str(),
            "https://collectionapi.metmuseum.org/public/collection/v1/objects"
        );
        let since = NaiveDate::from_ymd_opt(2024, 5, 1).expect("date");
        assert_eq!(
            client.listing_url(Some(since)).expect("url").as_str(),
            "https://collectionapi.metmuseum.org/public/collection/v1/objects?metadataDate=2024-05-01"
        );
        assert_eq!(
            client.object_url(436_535),
            "https://collectionapi.metmuseum.org/public/collection/v1/objects/436535"
        );
    }

    #[test]
    fn listing_with_null_ids_is_empty() {
        let ids = CollectionApiClient::decode_listing(r#"{"total":0,"objectIDs":null}"#).expect("decode");
        assert!(ids.is_empty());

        let ids = CollectionApiClient::decode_listing(r#"{"total":3,"objectIDs":[1,5,9]}"#).expect("decode");
        assert_eq!(ids, vec![1, 5, 9]);

        assert!(CollectionApiClient::decode_listing("<html>").is_err());
    }

    #[test]
    fn object_body_must_be_a_json_object() {
        let body = CollectionApiClient::decode_object(7, r#"{"objectID":7,"title":"Jar"}"#).expect("decode");
        assert_eq!(body["title"], "Jar");

        assert!(matches!(
            CollectionApiClient::decode_object(7, "[1,2]"),
            Err(IngestError::Decode { id: 7, .. })
        ));
        assert!(matches!(
            CollectionApiClient::decode_object(7, "not json"),
            Err(IngestError::Decode { id: 7, .. })
        ));
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(CollectionApiClient::new("not a url", &HttpClientConfig::default()).is_err());
    }
}
