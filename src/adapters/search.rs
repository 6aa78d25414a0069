//! HTTP search adapter.
//!
//! Posts the search request as JSON to a configured gateway endpoint that
//! fronts the actual search engines and answers in `SearchResponse` shape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ProviderError, SearchProvider, SearchRequest, SearchResponse};

/// Configuration for the HTTP search adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchGatewayConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

pub struct HttpSearchProvider {
    config: SearchGatewayConfig,
    client: reqwest::Client,
}

impl HttpSearchProvider {
    pub fn new(config: SearchGatewayConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    fn name(&self) -> &str {
        "search-gateway"
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, ProviderError> {
        let mut builder = self
            .client
            .post(&self.config.endpoint)
            .timeout(request.timeout)
            .json(request);

        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(self.name(), &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(
                self.name(),
                status.as_u16(),
                format!("search gateway returned {}: {}", status, body.trim()),
            ));
        }

        let mut parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(self.name(), &e))?;

        if parsed.provider.is_empty() {
            parsed.provider = self.name().to_string();
        }
        parsed.results.truncate(request.max_results);

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_skips_timeout() {
        let request = SearchRequest::new("moon landing hoax", 5);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["query"], "moon landing hoax");
        assert_eq!(json["max_results"], 5);
        assert!(json.get("timeout").is_none());
    }

    #[test]
    fn test_response_parsing_with_fatal_error() {
        let parsed: SearchResponse = serde_json::from_str(
            r#"{"provider":"serp","results":[{"url":"https://a.org"}],
                "provider_errors":[{"provider":"serp","status":429,"message":"quota","fatal":true}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.fatal_error().unwrap().status, Some(429));
    }
}
