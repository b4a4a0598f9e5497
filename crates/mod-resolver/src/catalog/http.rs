//! HTTP client for the mod catalog service
//!
//! Endpoints, relative to the configured catalog URL:
//! - `GET /api/mod?id=<id>&id=<id>` returns published file details
//! - `GET /api/mod/config?id=<id>&id=<id>` returns `[{id, code}]`
//! - `GET /api/mod/search?text=<text>` returns published file details

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::catalog::ModCatalog;
use crate::config::ResolverConfig;
use crate::core::{ModConfigScript, ModId, ModMetadata, ResolveError, Result};

const METADATA_PATH: &str = "api/mod";
const CONFIG_PATH: &str = "api/mod/config";
const SEARCH_PATH: &str = "api/mod/search";

/// Catalog client over `reqwest`
#[derive(Debug, Clone)]
pub struct HttpModCatalog {
    base_url: Url,
    client: Client,
    timeout_secs: u64,
}

impl HttpModCatalog {
    pub fn new(config: &ResolverConfig) -> Result<Self> {
        // A trailing slash makes `join` append instead of replacing the last segment
        let mut base = config.catalog_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ResolveError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
                field: None,
                suggestion: None,
            })?;

        Ok(Self {
            base_url,
            client,
            timeout_secs: config.request_timeout.as_secs(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn request_by_ids(&self, path: &str, ids: &[ModId]) -> Result<RequestBuilder> {
        let url = self.base_url.join(path)?;
        let query: Vec<(&str, &str)> = ids.iter().map(|id| ("id", id.as_str())).collect();
        Ok(self.client.get(url).query(&query))
    }

    /// Execute request and decode a JSON body
    async fn execute_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        debug!("Catalog request: {:?}", request);
        let response = request.send().await.map_err(|e| self.classify(e))?;
        debug!("Catalog response: {:?}", response);

        let url = response.url().to_string();
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::HttpStatus {
                url,
                status: status.as_u16(),
            });
        }

        let response_text = response.text().await.map_err(|e| self.classify(e))?;
        serde_json::from_str(&response_text).map_err(|e| ResolveError::Decode {
            url,
            message: e.to_string(),
        })
    }

    fn classify(&self, error: reqwest::Error) -> ResolveError {
        match ResolveError::from(error) {
            ResolveError::NetworkTimeout { url, .. } => ResolveError::NetworkTimeout {
                url,
                duration_secs: self.timeout_secs,
            },
            other => other,
        }
    }
}

#[async_trait]
impl ModCatalog for HttpModCatalog {
    async fn fetch_metadata(&self, ids: &[ModId]) -> Result<Vec<ModMetadata>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let request = self.request_by_ids(METADATA_PATH, ids)?;
        let metadata: Vec<ModMetadata> = self.execute_json(request).await?;
        debug!("Catalog returned metadata for {}/{} mods", metadata.len(), ids.len());
        Ok(metadata)
    }

    async fn fetch_config_scripts(&self, ids: &[ModId]) -> Result<Vec<ModConfigScript>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let request = self.request_by_ids(CONFIG_PATH, ids)?;
        let scripts: Vec<ModConfigScript> = self.execute_json(request).await?;
        debug!("Catalog returned scripts for {}/{} mods", scripts.len(), ids.len());
        Ok(scripts)
    }

    async fn search(&self, text: &str) -> Result<Vec<ModMetadata>> {
        let url = self.base_url.join(SEARCH_PATH)?;
        let request = self.client.get(url).query(&[("text", text)]);
        self.execute_json(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolverConfigBuilder;
    use serde_json::json;
    use std::time::Duration;
    use tokio_test::assert_err;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn id(raw: &str) -> ModId {
        ModId::parse(raw).unwrap()
    }

    fn catalog_for(server: &MockServer) -> HttpModCatalog {
        let config = ResolverConfigBuilder::new()
            .catalog_url(server.uri())
            .request_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        HttpModCatalog::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_metadata_sends_ids() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/mod"))
            .and(query_param("id", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "publishedfileid": "1",
                    "title": "Global Positions",
                    "preview_url": "https://img/1.png"
                }
            ])))
            .expect(1)
            .mount(&mock_server)
            .await;

        let catalog = catalog_for(&mock_server);
        let metadata = catalog.fetch_metadata(&[id("1"), id("2")]).await.unwrap();

        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0].id, id("1"));
        assert_eq!(metadata[0].preview_url.as_deref(), Some("https://img/1.png"));
    }

    #[tokio::test]
    async fn test_fetch_config_scripts_numeric_ids() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/mod/config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 100, "code": "configuration_options = {}"}
            ])))
            .mount(&mock_server)
            .await;

        let catalog = catalog_for(&mock_server);
        let scripts = catalog.fetch_config_scripts(&[id("100")]).await.unwrap();

        assert_eq!(scripts, vec![ModConfigScript::new(id("100"), "configuration_options = {}")]);
    }

    #[tokio::test]
    async fn test_empty_ids_skip_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&mock_server)
            .await;

        let catalog = catalog_for(&mock_server);
        assert!(catalog.fetch_metadata(&[]).await.unwrap().is_empty());
        assert!(catalog.fetch_config_scripts(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_transport_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/mod"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&mock_server)
            .await;

        let catalog = catalog_for(&mock_server);
        let err = catalog.fetch_metadata(&[id("1")]).await.unwrap_err();

        match &err {
            ResolveError::HttpStatus { status, .. } => assert_eq!(*status, 502),
            other => panic!("Expected HttpStatus, got {:?}", other),
        }
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/mod/config"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&mock_server)
            .await;

        let catalog = catalog_for(&mock_server);
        let result = catalog.fetch_config_scripts(&[id("1")]).await;
        let err = assert_err!(result);
        assert_eq!(err.category(), "decode");
    }

    #[tokio::test]
    async fn test_search_passes_text() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/mod/search"))
            .and(query_param("text", "minimap"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"publishedfileid": "345692228", "title": "Minimap HUD"}
            ])))
            .mount(&mock_server)
            .await;

        let catalog = catalog_for(&mock_server);
        let found = catalog.search("minimap").await.unwrap();
        assert_eq!(found[0].title, "Minimap HUD");
    }

    #[tokio::test]
    async fn test_base_url_with_path_prefix() {
        let config = ResolverConfigBuilder::new()
            .catalog_url("http://127.0.0.1:9/dashboard")
            .build()
            .unwrap();
        let catalog = HttpModCatalog::new(&config).unwrap();
        assert_eq!(
            catalog.base_url().join(METADATA_PATH).unwrap().as_str(),
            "http://127.0.0.1:9/dashboard/api/mod"
        );
    }
}
