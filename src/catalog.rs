//! Parts catalog search.

use crate::api::{ApiClient, EnvelopeError, ListEnvelope, Page};
use crate::errors::ApiError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, instrument};

const SEARCH_PATH: &str = "/products/search";

pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: Value,
    #[serde(default, alias = "title")]
    pub name: Option<String>,
    #[serde(default, alias = "sku", skip_serializing_if = "Option::is_none")]
    pub part_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    #[serde(rename = "q")]
    pub text: String,
    pub page: u32,
    pub limit: u32,
}

impl SearchQuery {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.max(1);
        self
    }
}

/// Searches the catalog. The list shape is decoded strictly; an unknown shape
/// is an error rather than an empty page.
/// # Errors
/// Returns the transport failure or the decoding failure.
#[instrument(skip(api))]
pub async fn search_parts(api: &ApiClient, query: &SearchQuery) -> Result<Page<Part>, CatalogError> {
    let value: Value = api.get_json_with_query(SEARCH_PATH, query).await?;
    let page = ListEnvelope::<Part>::decode(value)?.into_page();
    debug!("search returned {} of {} parts", page.items.len(), page.total);
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::TokenInterceptor, config::ClientConfig, storage::MemoryStore};
    use anyhow::{anyhow, Result};
    use serde_json::json;
    use std::{net::TcpListener, sync::Arc};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    fn client(uri: &str) -> Result<ApiClient> {
        let interceptor = Arc::new(TokenInterceptor::new(Arc::new(MemoryStore::new())));
        Ok(ApiClient::new(&ClientConfig::new(uri), interceptor)?)
    }

    #[tokio::test]
    async fn search_sends_query_and_decodes_results() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/products/search"))
            .and(query_param("q", "brake pad"))
            .and(query_param("page", "2"))
            .and(query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"id": 1, "title": "Front brake pad", "sku": "BP-100", "price": 199.0, "oem": true}
                ],
                "count": 31
            })))
            .mount(&server)
            .await;

        let api = client(&server.uri())?;
        let page = search_parts(&api, &SearchQuery::new("brake pad").with_page(2).with_limit(5)).await?;

        assert_eq!(page.total, 31);
        let part = page.items.first().ok_or_else(|| anyhow!("no parts"))?;
        assert_eq!(part.name.as_deref(), Some("Front brake pad"));
        assert_eq!(part.part_number.as_deref(), Some("BP-100"));
        assert_eq!(part.extra.get("oem"), Some(&json!(true)));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_shape_is_reported() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/products/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"products": []})))
            .mount(&server)
            .await;

        let api = client(&server.uri())?;
        let err = search_parts(&api, &SearchQuery::new("x"))
            .await
            .err()
            .ok_or_else(|| anyhow!("expected error"))?;
        assert!(matches!(
            err,
            CatalogError::Envelope(EnvelopeError::UnrecognizedShape(_))
        ));
        Ok(())
    }

    #[test]
    fn page_and_limit_are_at_least_one() {
        let query = SearchQuery::new("filter").with_page(0).with_limit(0);
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, 1);
    }
}
