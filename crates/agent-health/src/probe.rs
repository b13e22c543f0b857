//! Pluggable liveness probes

use async_trait::async_trait;

use agent_comms::Result;
use agent_registry::ServiceDescriptor;

/// Checks whether a service is alive
///
/// The monitor measures latency and applies the probe timeout; an
/// implementation only reports success or the failure reason.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;

    async fn probe(&self, service: &ServiceDescriptor) -> Result<()>;
}

/// Probe that reports every service healthy
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    fn name(&self) -> &str {
        "always_healthy"
    }

    async fn probe(&self, _service: &ServiceDescriptor) -> Result<()> {
        Ok(())
    }
}

#[cfg(feature = "http")]
pub use http::HttpProbe;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use agent_comms::ProtocolError;
    use reqwest::Client;

    /// Probe that issues `GET {endpoint}{path}` and expects a 2xx
    pub struct HttpProbe {
        client: Client,
        path: String,
    }

    impl HttpProbe {
        pub fn new(path: impl Into<String>) -> Self {
            Self {
                client: Client::new(),
                path: path.into(),
            }
        }

        pub fn with_client(client: Client, path: impl Into<String>) -> Self {
            Self {
                client,
                path: path.into(),
            }
        }

        fn health_url(&self, service: &ServiceDescriptor) -> String {
            format!("{}{}", service.endpoint.trim_end_matches('/'), self.path)
        }
    }

    impl Default for HttpProbe {
        fn default() -> Self {
            Self::new("/health")
        }
    }

    #[async_trait]
    impl HealthProbe for HttpProbe {
        fn name(&self) -> &str {
            "http"
        }

        async fn probe(&self, service: &ServiceDescriptor) -> Result<()> {
            let url = self.health_url(service);
            self.client
                .get(&url)
                .send()
                .await
                .and_then(|response| response.error_for_status())
                .map_err(|e| ProtocolError::internal(format!("GET {} failed: {}", url, e)))?;
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_health_url() {
            let probe = HttpProbe::default();
            let service = ServiceDescriptor::new("a", vec!["x"], "http://localhost:8080/");
            assert_eq!(probe.health_url(&service), "http://localhost:8080/health");
        }
    }
}
