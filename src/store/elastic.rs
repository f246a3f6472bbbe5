//! Remote document-search backend over HTTP.
//!
//! Speaks the document-store dialect of the search engine the original
//! deployment used: index-with-refresh upserts, get-by-id, match-all and
//! bool/match searches, delete-by-id and delete-by-query. Indices are
//! refreshed before reads so a freshly written record is visible to the
//! next search. Backend failures surface as [`StoreError::Backend`], never
//! as protocol errors.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Model, ModelStore, StoreError};

pub struct ElasticStore<M> {
    client: reqwest::Client,
    base_url: String,
    index: String,
    _model: PhantomData<fn() -> M>,
}

impl<M> ElasticStore<M> {
    pub fn new(base_url: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            index: index.into(),
            _model: PhantomData,
        }
    }

    fn doc_url(&self, id: &str) -> String {
        format!("{}/{}/_doc/{}", self.base_url, self.index, id)
    }

    fn index_url(&self, suffix: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.index, suffix)
    }

    async fn refresh(&self) -> Result<(), StoreError> {
        let response = self.client.post(self.index_url("_refresh")).send().await?;
        ensure_success(response).await.map(|_| ())
    }

    /// Translate a flat field-equality filter into a bool query. A `null`
    /// value matches documents where the field is null or absent.
    fn bool_query(filter: &Value) -> Value {
        let mut must = Vec::new();
        let mut must_not = Vec::new();
        if let Some(fields) = filter.as_object() {
            for (field, expected) in fields {
                if expected.is_null() {
                    must_not.push(json!({ "exists": { "field": field } }));
                } else {
                    must.push(json!({ "match": { field: expected } }));
                }
            }
        }
        let mut clause = serde_json::Map::new();
        if !must.is_empty() {
            clause.insert("must".into(), Value::Array(must));
        }
        if !must_not.is_empty() {
            clause.insert("must_not".into(), Value::Array(must_not));
        }
        json!({ "bool": clause })
    }
}

impl<M: Model> ElasticStore<M> {
    /// Raw structured query escape hatch for filters the flat `find_by`
    /// predicate cannot express (reconciliation sweeps, billing readers).
    pub async fn query(&self, query: &Value) -> Result<Vec<M>, StoreError> {
        self.refresh().await?;
        let response = self
            .client
            .post(self.index_url("_search"))
            .json(&json!({ "query": query, "size": 10_000 }))
            .send()
            .await?;
        let body = ensure_success(response).await?;
        hits(&body)
    }

    /// Delete every document matching a raw structured query; returns the
    /// number of documents removed.
    pub async fn delete_by_query(&self, query: &Value) -> Result<u64, StoreError> {
        let response = self
            .client
            .post(format!("{}?refresh=true", self.index_url("_delete_by_query")))
            .json(&json!({ "query": query }))
            .send()
            .await?;
        let body = ensure_success(response).await?;
        Ok(body.get("deleted").and_then(Value::as_u64).unwrap_or(0))
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<Value, StoreError> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        return Err(StoreError::Backend(format!("backend answered {status}: {body}")));
    }
    Ok(body)
}

fn hits<M: Model>(body: &Value) -> Result<Vec<M>, StoreError> {
    body.pointer("/hits/hits")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| hit.get("_source"))
                .map(|source| serde_json::from_value(source.clone()).map_err(StoreError::from))
                .collect()
        })
        .unwrap_or_else(|| Err(StoreError::Backend("malformed search response".into())))
}

#[async_trait]
impl<M: Model> ModelStore<M> for ElasticStore<M> {
    async fn create(&self, obj: &M) -> Result<(), StoreError> {
        let url = format!("{}?refresh=true", self.doc_url(obj.reg_id()));
        let response = self.client.put(url).json(obj).send().await?;
        let body = ensure_success(response).await?;
        match body.get("result").and_then(Value::as_str) {
            Some("created") | Some("updated") => Ok(()),
            other => Err(StoreError::Backend(format!(
                "index refused the document: {}",
                other.unwrap_or("<no result>")
            ))),
        }
    }

    async fn retrieve(&self, id: &str) -> Result<M, StoreError> {
        self.refresh().await?;
        let response = self.client.get(self.doc_url(id)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let body = ensure_success(response).await?;
        if body.get("found").and_then(Value::as_bool) != Some(true) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let source = body
            .get("_source")
            .ok_or_else(|| StoreError::Backend("document without _source".into()))?;
        Ok(serde_json::from_value(source.clone())?)
    }

    async fn retrieve_all(&self) -> Result<Vec<M>, StoreError> {
        self.query(&json!({ "match_all": {} })).await
    }

    async fn update(&self, obj: &M) -> Result<(), StoreError> {
        self.create(obj).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let url = format!("{}?refresh=true", self.doc_url(id));
        let response = self.client.delete(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(id.to_string()));
        }
        ensure_success(response).await.map(|_| ())
    }

    async fn find_by(&self, filter: &Value) -> Result<Vec<M>, StoreError> {
        self.query(&Self::bool_query(filter)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChargingStation;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_station() -> ChargingStation {
        let mut cs = ChargingStation::new("10.0.0.5", 50001);
        cs.serial_number = Some("SN1".into());
        cs.upsert_connector(1, Some("Available"), None, None, None);
        cs
    }

    async fn mock_refresh(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/stations/_refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn create_indexes_the_document_with_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/stations/_doc/10.0.0.5:50001"))
            .and(query_param("refresh", "true"))
            .and(body_partial_json(serde_json::json!({ "serial_number": "SN1" })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({ "result": "created" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store: ElasticStore<ChargingStation> = ElasticStore::new(server.uri(), "stations");
        store.create(&sample_station()).await.unwrap();
    }

    #[tokio::test]
    async fn retrieve_deserializes_the_source_document() {
        let server = MockServer::start().await;
        mock_refresh(&server).await;
        let source = serde_json::to_value(sample_station()).unwrap();
        Mock::given(method("GET"))
            .and(path("/stations/_doc/SN1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "found": true,
                "_source": source
            })))
            .mount(&server)
            .await;

        let store: ElasticStore<ChargingStation> = ElasticStore::new(server.uri(), "stations");
        let cs = store.retrieve("SN1").await.unwrap();
        assert_eq!(cs.serial_number.as_deref(), Some("SN1"));
        assert_eq!(cs.connectors.len(), 1);
        assert!(cs.pending_requests.is_empty());
    }

    #[tokio::test]
    async fn retrieve_maps_missing_documents_to_not_found() {
        let server = MockServer::start().await;
        mock_refresh(&server).await;
        Mock::given(method("GET"))
            .and(path("/stations/_doc/ghost"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({ "found": false })))
            .mount(&server)
            .await;

        let store: ElasticStore<ChargingStation> = ElasticStore::new(server.uri(), "stations");
        assert!(matches!(
            store.retrieve("ghost").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn find_by_sends_a_bool_query_with_null_as_must_not_exists() {
        let server = MockServer::start().await;
        mock_refresh(&server).await;
        Mock::given(method("POST"))
            .and(path("/stations/_search"))
            .and(body_partial_json(serde_json::json!({
                "query": { "bool": {
                    "must": [{ "match": { "host": "10.0.0.5" } }],
                    "must_not": [{ "exists": { "field": "serial_number" } }]
                } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "hits": { "hits": [] }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store: ElasticStore<ChargingStation> = ElasticStore::new(server.uri(), "stations");
        let found = store
            .find_by(&serde_json::json!({ "host": "10.0.0.5", "serial_number": null }))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn backend_rejections_surface_as_store_errors() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/stations/_doc/10.0.0.5:50001"))
            .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
                "error": "index is read-only"
            })))
            .mount(&server)
            .await;

        let store: ElasticStore<ChargingStation> = ElasticStore::new(server.uri(), "stations");
        assert!(matches!(
            store.create(&sample_station()).await,
            Err(StoreError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn delete_by_query_reports_the_removed_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/stations/_delete_by_query"))
            .and(query_param("refresh", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "deleted": 2 })))
            .mount(&server)
            .await;

        let store: ElasticStore<ChargingStation> = ElasticStore::new(server.uri(), "stations");
        let deleted = store
            .delete_by_query(&serde_json::json!({ "match_all": {} }))
            .await
            .unwrap();
        assert_eq!(deleted, 2);
    }
}
