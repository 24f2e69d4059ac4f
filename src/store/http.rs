//! Document store behind a REST API.
//!
//! Issues `POST {base}/collections/{collection}:query` with the
//! [`StoreQuery`] as the JSON body. The response is either a bare array of
//! documents or an object with a `documents` array.

use async_trait::async_trait;
use serde_json::Value;

use super::{ReadingStore, StoreQuery};
use crate::error::StoreError;
use crate::models::RawReading;

// ---

#[derive(Debug, Clone)]
pub struct HttpReadingStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpReadingStore {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn query_url(&self, collection: &str) -> String {
        format!("{}/collections/{}:query", self.base_url, collection)
    }
}

/// Pull documents out of either accepted response shape.
fn extract_documents(response: Value) -> Result<Vec<RawReading>, StoreError> {
    // ---
    let items = match response {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("documents") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(StoreError::Decode(format!(
                    "'documents' is not an array: {other}"
                )))
            }
            None => return Err(StoreError::Decode("response missing 'documents'".into())),
        },
        other => return Err(StoreError::Decode(format!("unexpected response: {other}"))),
    };

    let mut documents = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        match item {
            Value::Object(map) => documents.push(RawReading::from(map)),
            other => {
                tracing::debug!("Skipping non-object document {}: {}", i, other);
            }
        }
    }
    Ok(documents)
}

#[async_trait]
impl ReadingStore for HttpReadingStore {
    async fn query(&self, collection: &str, query: &StoreQuery) -> Result<Vec<RawReading>, StoreError> {
        // ---
        let url = self.query_url(collection);
        tracing::debug!("Querying document store: {}", url);

        let mut request = self.client.post(&url).json(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let documents = extract_documents(response.json().await?)?;
        tracing::debug!("Document store returned {} documents", documents.len());
        Ok(documents)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_url() {
        // ---
        let store = HttpReadingStore::new("https://store.example.com/v1/", None);
        assert_eq!(
            store.query_url("sensor_readings"),
            "https://store.example.com/v1/collections/sensor_readings:query"
        );
    }

    #[test]
    fn test_extract_both_response_shapes() {
        // ---
        let bare = json!([{ "pH": 7.0 }, { "pH": 7.1 }]);
        let wrapped = json!({ "documents": [{ "pH": 7.0 }], "next_cursor": null });

        assert_eq!(extract_documents(bare).unwrap().len(), 2);
        assert_eq!(extract_documents(wrapped).unwrap().len(), 1);
    }

    #[test]
    fn test_extract_skips_non_objects_and_rejects_garbage() {
        // ---
        let mixed = json!([{ "pH": 7.0 }, 42, "x"]);
        assert_eq!(extract_documents(mixed).unwrap().len(), 1);

        assert!(matches!(extract_documents(json!({ "rows": [] })), Err(StoreError::Decode(_))));
        assert!(matches!(extract_documents(json!("nope")), Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_query_body_shape() {
        // ---
        use chrono::{TimeZone, Utc};
        let query = StoreQuery::between(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
        )
        .limit(50);
        let body = serde_json::to_value(&query).unwrap();

        assert_eq!(body["order_by"], "timestamp");
        assert_eq!(body["order_direction"], "asc");
        assert_eq!(body["limit"], 50);
        assert_eq!(body["range_start"], "2025-01-01T00:00:00Z");
        assert!(body.get("end_exclusive").is_none());

        let half_open = StoreQuery::half_open(query.range_start, query.range_end);
        let body = serde_json::to_value(&half_open).unwrap();
        assert_eq!(body["end_exclusive"], true);
    }
}
