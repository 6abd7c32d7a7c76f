//! Remote configuration store (SONAR API)
//!
//! The store is keyed by environment and tenant. Both operations are
//! idempotent: configure is an upsert, and deleting a tenant that does not
//! exist succeeds.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use sonar_common::Error;
use sonar_config::ServiceHierarchyConfiguration;

/// Header carrying the SONAR API key
pub const API_KEY_HEADER: &str = "ApiKey";

/// Longest response body excerpt kept in an error message
const ERROR_BODY_LIMIT: usize = 512;

/// Trait abstracting the remote configuration store
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceConfigStore: Send + Sync {
    /// Create or replace a tenant's service hierarchy
    async fn configure_services(
        &self,
        tenant: &str,
        config: &ServiceHierarchyConfiguration,
    ) -> Result<(), Error>;

    /// Delete a tenant's service hierarchy
    async fn delete_services(&self, tenant: &str) -> Result<(), Error>;
}

/// Connection settings for the SONAR API
#[derive(Clone, Debug)]
pub struct SonarApiConfig {
    /// Base URL, e.g. `https://sonar.example.com`
    pub base_url: String,
    /// Environment this agent reports for
    pub environment: String,
    /// API key, if the API requires one
    pub api_key: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

/// HTTP implementation of [`ServiceConfigStore`]
pub struct SonarApiClient {
    http: reqwest::Client,
    base_url: Url,
    environment: String,
    api_key: Option<String>,
}

impl SonarApiClient {
    /// Create a client for the given API settings
    pub fn new(config: &SonarApiConfig) -> Result<Self, Error> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::validation("api_url", e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::validation("api_url", "must be an absolute http(s) URL"));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::internal_with_context("sonar-api", e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            environment: config.environment.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// URL of a tenant's configuration resource
    pub fn tenant_url(&self, tenant: &str) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in new(), so segments are available
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([
                "api",
                "v2",
                "config",
                self.environment.as_str(),
                "tenants",
                tenant,
            ]);
        }
        url
    }

    async fn send(
        &self,
        method: Method,
        tenant: &str,
        operation: &str,
        body: Option<&ServiceHierarchyConfiguration>,
    ) -> Result<StatusCode, Error> {
        let url = self.tenant_url(tenant);
        debug!(method = %method, url = %url, "Calling SONAR API");

        let mut request = self.http.request(method, url);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::remote_transport(tenant, operation, e.to_string()))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(status);
        }

        let body = response.text().await.unwrap_or_default();
        Err(Error::remote_status(
            tenant,
            operation,
            status.as_u16(),
            excerpt(&body),
        ))
    }
}

#[async_trait]
impl ServiceConfigStore for SonarApiClient {
    async fn configure_services(
        &self,
        tenant: &str,
        config: &ServiceHierarchyConfiguration,
    ) -> Result<(), Error> {
        let status = self
            .send(Method::PUT, tenant, "configure", Some(config))
            .await?;
        if status != StatusCode::NOT_FOUND {
            return Ok(());
        }

        // First configuration for this tenant
        let status = self
            .send(Method::POST, tenant, "configure", Some(config))
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Err(Error::remote_status(
                tenant,
                "configure",
                status.as_u16(),
                "environment not found",
            ));
        }
        Ok(())
    }

    async fn delete_services(&self, tenant: &str) -> Result<(), Error> {
        // 404 means already gone
        self.send(Method::DELETE, tenant, "delete", None).await?;
        Ok(())
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= ERROR_BODY_LIMIT {
        return trimmed.to_string();
    }
    let mut end = ERROR_BODY_LIMIT;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TENANT_PATH: &str = "/api/v2/config/prod/tenants/alpha";

    fn client(base: &str) -> SonarApiClient {
        SonarApiClient::new(&SonarApiConfig {
            base_url: base.to_string(),
            environment: "prod".to_string(),
            api_key: Some("secret".to_string()),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_tenant_url_layout() {
        let c = client("https://sonar.example.com");
        assert_eq!(
            c.tenant_url("alpha").as_str(),
            "https://sonar.example.com/api/v2/config/prod/tenants/alpha"
        );
    }

    #[test]
    fn test_tenant_url_respects_base_path() {
        let c = client("https://example.com/sonar/");
        assert_eq!(
            c.tenant_url("alpha").as_str(),
            "https://example.com/sonar/api/v2/config/prod/tenants/alpha"
        );
    }

    #[test]
    fn test_tenant_url_escapes_segments() {
        let c = client("https://sonar.example.com");
        let url = c.tenant_url("team a/b");
        assert!(url.as_str().ends_with("/tenants/team%20a%2Fb"));
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let err = SonarApiClient::new(&SonarApiConfig {
            base_url: "not a url".to_string(),
            environment: "prod".to_string(),
            api_key: None,
            timeout: Duration::from_secs(5),
        })
        .err()
        .unwrap();
        assert!(matches!(err, Error::Validation { ref field, .. } if field == "api_url"));

        let err = SonarApiClient::new(&SonarApiConfig {
            base_url: "mailto:ops@example.com".to_string(),
            environment: "prod".to_string(),
            api_key: None,
            timeout: Duration::from_secs(5),
        })
        .err()
        .unwrap();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_a_retryable_transport_error() {
        // Reserve a free port, then release it so nothing is listening there
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let c = client(&format!("http://{addr}"));
        let err = c.delete_services("alpha").await.unwrap_err();
        assert!(matches!(err, Error::RemoteStore { status: None, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_excerpt_truncates_long_bodies() {
        let long = "x".repeat(ERROR_BODY_LIMIT + 10);
        let short = excerpt(&long);
        assert!(short.ends_with("..."));
        assert_eq!(short.len(), ERROR_BODY_LIMIT + 3);
        assert_eq!(excerpt("  boom \n"), "boom");
    }

    fn config() -> ServiceHierarchyConfiguration {
        ServiceHierarchyConfiguration::default()
    }

    #[tokio::test]
    async fn test_configure_updates_existing_tenant() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(TENANT_PATH))
            .and(header(API_KEY_HEADER, "secret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        client(&server.uri())
            .configure_services("alpha", &config())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_configure_creates_unknown_tenant() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(TENANT_PATH))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(TENANT_PATH))
            .and(header(API_KEY_HEADER, "secret"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client(&server.uri())
            .configure_services("alpha", &config())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_configure_unknown_environment_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(path(TENANT_PATH))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .configure_services("alpha", &config())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RemoteStore { status: Some(404), ref tenant, .. } if tenant == "alpha"
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_delete_of_missing_tenant_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(TENANT_PATH))
            .and(header(API_KEY_HEADER, "secret"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        client(&server.uri()).delete_services("alpha").await.unwrap();
    }

    #[tokio::test]
    async fn test_server_errors_are_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .configure_services("alpha", &config())
            .await
            .unwrap_err();
        match &err {
            Error::RemoteStore {
                status, message, ..
            } => {
                assert_eq!(*status, Some(503));
                assert_eq!(message, "maintenance");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_client_errors_are_permanent_except_throttling() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let c = client(&server.uri());
        let err = c.delete_services("alpha").await.unwrap_err();
        assert!(matches!(err, Error::RemoteStore { status: Some(403), .. }));
        assert!(!err.is_retryable());

        let err = c.configure_services("alpha", &config()).await.unwrap_err();
        assert!(matches!(err, Error::RemoteStore { status: Some(429), .. }));
        assert!(err.is_retryable());
    }
}
