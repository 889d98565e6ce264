//! DocumentStore adapter over the Elasticsearch REST API.
//!
//! Each record is a document whose id is the raw key. Writes use
//! `refresh=wait_for`, so a following read or search observes them.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, Url};
use serde::Deserialize;
use serde_json::{json, Value};

use storecheck_core::{Adapter, BackendConfig, BackendKind, CheckError, Result};

use crate::http::{self, HttpFailure};

#[derive(Debug, Deserialize)]
struct Document {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source")]
    source: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: Document,
}

#[derive(Debug, Deserialize)]
struct ClusterInfo {
    version: ClusterVersion,
}

#[derive(Debug, Deserialize)]
struct ClusterVersion {
    number: String,
}

/// Session against one Elasticsearch cluster.
pub struct ElasticsearchAdapter {
    client: reqwest::Client,
    base: Url,
    endpoint: String,
    index: String,
    username: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for ElasticsearchAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchAdapter")
            .field("base", &self.base.as_str())
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl ElasticsearchAdapter {
    pub fn new(config: &BackendConfig, client: reqwest::Client) -> Result<Self> {
        let base = Url::parse(&http::base_url(config))
            .map_err(|e| CheckError::Config(format!("{}: invalid URL: {}", config.endpoint(), e)))?;
        Ok(Self {
            client,
            base,
            endpoint: config.endpoint(),
            index: config.table_name().to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let request = self.client.request(method, url);
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_ref()),
            None => request,
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        endpoint_url(&self.base, segments)
    }
}

/// Appends path segments to `base`, percent-encoding each one.
pub fn endpoint_url(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| CheckError::Config(format!("{} cannot carry a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Index mapping created with the namespace.
pub fn index_mapping() -> Value {
    json!({
        "mappings": {
            "properties": {
                "key": { "type": "keyword" },
                "value": { "type": "text" },
                "timestamp": { "type": "date" }
            }
        }
    })
}

/// Range query over `[start, end)` on `key`, ascending.
pub fn range_query(start: &str, end: &str, limit: usize) -> Value {
    json!({
        "query": { "range": { "key": { "gte": start, "lt": end } } },
        "sort": [ { "key": "asc" } ],
        "size": limit
    })
}

fn parse_get(body: &str) -> std::result::Result<Option<String>, String> {
    let response: GetResponse =
        serde_json::from_str(body).map_err(|e| format!("unexpected document response: {}", e))?;
    if !response.found {
        return Ok(None);
    }
    Ok(response.source.map(|doc| doc.value))
}

fn parse_search(body: &str) -> std::result::Result<Vec<(String, String)>, String> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| format!("unexpected search response: {}", e))?;
    Ok(response
        .hits
        .hits
        .into_iter()
        .map(|hit| (hit.source.key, hit.source.value))
        .collect())
}

fn already_exists(body: &str) -> bool {
    body.contains("resource_already_exists_exception")
}

#[async_trait]
impl Adapter for ElasticsearchAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Elasticsearch
    }

    async fn ensure_namespace(&self) -> Result<()> {
        let url = self.url(&[&self.index])?;
        match http::send(self.request(Method::HEAD, url.clone())).await {
            Ok(_) => {
                tracing::info!(endpoint = %self.endpoint, index = %self.index, "index exists");
                return Ok(());
            }
            Err(HttpFailure::Status { status: 404, .. }) => {}
            Err(e) => return Err(e.into_error(&self.endpoint, CheckError::Namespace)),
        }

        match http::send(self.request(Method::PUT, url).json(&index_mapping())).await {
            Ok(_) => {
                tracing::info!(endpoint = %self.endpoint, index = %self.index, "index created");
                Ok(())
            }
            Err(HttpFailure::Status { body, .. }) if already_exists(&body) => Ok(()),
            Err(e) => Err(e.into_error(&self.endpoint, CheckError::Namespace)),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut url = self.url(&[&self.index, "_doc", key])?;
        url.query_pairs_mut().append_pair("refresh", "wait_for");
        let document = json!({
            "key": key,
            "value": value,
            "timestamp": Utc::now().to_rfc3339(),
        });
        http::send(self.request(Method::PUT, url).json(&document))
            .await
            .map(|_| ())
            .map_err(|e| e.into_error(&self.endpoint, CheckError::Write))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let url = self.url(&[&self.index, "_doc", key])?;
        match http::send(self.request(Method::GET, url)).await {
            Ok(body) => parse_get(&body).map_err(CheckError::Read),
            Err(HttpFailure::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e.into_error(&self.endpoint, CheckError::Read)),
        }
    }

    async fn scan(&self, start: &str, end: &str, limit: usize) -> Result<Vec<(String, String)>> {
        let url = self.url(&[&self.index, "_search"])?;
        let body = http::send(self.request(Method::POST, url).json(&range_query(start, end, limit)))
            .await
            .map_err(|e| e.into_error(&self.endpoint, CheckError::Read))?;
        parse_search(&body).map_err(CheckError::Read)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut url = self.url(&[&self.index, "_doc", key])?;
        url.query_pairs_mut().append_pair("refresh", "wait_for");
        match http::send(self.request(Method::DELETE, url)).await {
            Ok(_) | Err(HttpFailure::Status { status: 404, .. }) => Ok(()),
            Err(e) => Err(e.into_error(&self.endpoint, CheckError::Delete)),
        }
    }

    async fn ping(&self) -> Result<()> {
        let body = http::send(self.request(Method::GET, self.base.clone()))
            .await
            .map_err(|e| e.classify(&self.endpoint))?;
        match serde_json::from_str::<ClusterInfo>(&body) {
            Ok(info) => tracing::info!(
                endpoint = %self.endpoint,
                "✓ Connected to Elasticsearch {}",
                info.version.number
            ),
            Err(e) => tracing::warn!(endpoint = %self.endpoint, "unrecognised cluster info: {}", e),
        }
        Ok(())
    }

    async fn close(self: Box<Self>) {
        tracing::debug!(endpoint = %self.endpoint, "elasticsearch session released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_url_encodes_key() {
        let base = Url::parse("http://es-0:9200").unwrap();
        let url = endpoint_url(&base, &["test-1", "_doc", "devops:test_key_1"]).unwrap();
        assert_eq!(url.as_str(), "http://es-0:9200/test-1/_doc/devops:test_key_1");

        let url = endpoint_url(&base, &["test-1", "_doc", "a/b c"]).unwrap();
        assert_eq!(url.as_str(), "http://es-0:9200/test-1/_doc/a%2Fb%20c");
    }

    #[test]
    fn test_range_query_shape() {
        let query = range_query("devops:test_key_", "devops:test_key_z", 100);
        assert_eq!(query["query"]["range"]["key"]["gte"], "devops:test_key_");
        assert_eq!(query["query"]["range"]["key"]["lt"], "devops:test_key_z");
        assert_eq!(query["sort"][0]["key"], "asc");
        assert_eq!(query["size"], 100);
    }

    #[test]
    fn test_mapping_types() {
        let mapping = index_mapping();
        assert_eq!(mapping["mappings"]["properties"]["key"]["type"], "keyword");
        assert_eq!(mapping["mappings"]["properties"]["timestamp"]["type"], "date");
    }

    #[test]
    fn test_parse_get_found_and_missing() {
        let found = r#"{"_index":"test-1","_id":"devops:a","found":true,"_source":{"key":"devops:a","value":"1","timestamp":"2024-01-01T00:00:00Z"}}"#;
        assert_eq!(parse_get(found).unwrap(), Some("1".to_string()));

        let missing = r#"{"_index":"test-1","_id":"devops:a","found":false}"#;
        assert_eq!(parse_get(missing).unwrap(), None);
    }

    #[test]
    fn test_parse_search_hits() {
        let body = r#"{"took":1,"hits":{"total":{"value":2},"hits":[
            {"_id":"devops:a","_source":{"key":"devops:a","value":"1"}},
            {"_id":"devops:b","_source":{"key":"devops:b","value":"2"}}
        ]}}"#;
        let pairs = parse_search(body).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("devops:a".to_string(), "1".to_string()),
                ("devops:b".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn test_already_exists_detection() {
        let body = r#"{"error":{"type":"resource_already_exists_exception"},"status":400}"#;
        assert!(already_exists(body));
        assert!(!already_exists(r#"{"error":{"type":"illegal_argument_exception"}}"#));
    }
}
