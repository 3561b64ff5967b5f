//! HTTP availability probing with bounded retries

use crate::config::Config;
use crate::errors::{JanuscopeError, Result};
use crate::models::{Service, UptimeCheckResult};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, redirect};
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Header identifying probe traffic to the monitored endpoints
pub const MONITOR_HEADER: &str = "x-monitor";

/// Executes one bounded-retry HTTP check against one endpoint
#[derive(Debug, Clone)]
pub struct AvailabilityProber {
    client: Client,
    user_agent: String,
}

impl AvailabilityProber {
    /// Create a prober sharing one HTTP client
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(redirect::Policy::limited(10))
            .build()
            .map_err(JanuscopeError::Http)?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
        })
    }

    /// Probe a service, retrying failed attempts up to `max_retries` times in
    /// total. The returned result is the final attempt's outcome.
    pub async fn probe(&self, service: &Service) -> UptimeCheckResult {
        let headers = match self.build_headers(service) {
            Ok(headers) => headers,
            Err(e) => return UptimeCheckResult::down(service.id, e.to_string()),
        };

        if let Err(e) = url::Url::parse(&service.url) {
            return UptimeCheckResult::down(service.id, format!("Invalid URL: {}", e));
        }

        let attempts = service.max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self.attempt(service, headers.clone()).await;

            if result.is_up() {
                debug!(
                    "Service {} is UP (attempt {}, {:?}ms)",
                    service.name, attempt, result.response_time_ms
                );
                return result;
            }

            if attempt >= attempts {
                warn!(
                    "Service {} is DOWN after {} attempts: {}",
                    service.name,
                    attempt,
                    result.error_message.as_deref().unwrap_or("unknown error")
                );
                return result;
            }

            debug!(
                "Probe of {} failed (attempt {}/{}), retrying in {:?}: {}",
                service.name,
                attempt,
                attempts,
                service.retry_delay,
                result.error_message.as_deref().unwrap_or("unknown error")
            );
            sleep(service.retry_delay).await;
        }
    }

    /// Single GET attempt. The response is dropped before returning, which
    /// releases its connection on every path.
    async fn attempt(&self, service: &Service, headers: HeaderMap) -> UptimeCheckResult {
        let start = Instant::now();

        let response = self
            .client
            .get(&service.url)
            .headers(headers)
            .timeout(service.timeout)
            .send()
            .await;

        let elapsed_ms = start.elapsed().as_millis() as u64;

        match response {
            Ok(response) => {
                let code = response.status().as_u16();
                drop(response);

                if is_up_status(code) {
                    UptimeCheckResult::up(service.id, code, elapsed_ms)
                } else {
                    UptimeCheckResult::down(service.id, format!("HTTP {}", code))
                        .with_http_code(code)
                        .with_response_time(elapsed_ms)
                }
            }
            Err(e) if e.is_timeout() => UptimeCheckResult::down(
                service.id,
                format!("Timed out after {}ms", service.timeout.as_millis()),
            ),
            Err(e) if e.is_connect() => {
                UptimeCheckResult::down(service.id, format!("Connection failed: {}", e))
            }
            Err(e) => UptimeCheckResult::down(service.id, format!("Request failed: {}", e)),
        }
    }

    fn build_headers(&self, service: &Service) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        for (key, value) in &service.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| JanuscopeError::Config(format!("invalid header name {}: {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| JanuscopeError::Config(format!("invalid value for header {}: {}", key, e)))?;
            headers.insert(name, value);
        }

        let marker = HeaderValue::from_str(&self.user_agent)
            .unwrap_or_else(|_| HeaderValue::from_static("Januscope"));
        headers.insert(HeaderName::from_static(MONITOR_HEADER), marker);

        Ok(headers)
    }
}

/// Any status in [200, 399] counts as available
pub fn is_up_status(code: u16) -> bool {
    (200..=399).contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceStatus;
    use std::time::Duration;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prober() -> AvailabilityProber {
        AvailabilityProber::new(&Config::default()).unwrap()
    }

    fn service_for(url: String, retries: u32) -> Service {
        Service::new(1, "api", url)
            .with_timeout(Duration::from_millis(500))
            .with_retries(retries, Duration::from_millis(10))
    }

    #[test]
    fn test_status_classification() {
        assert!(is_up_status(200));
        assert!(is_up_status(204));
        assert!(is_up_status(301));
        assert!(is_up_status(399));
        assert!(!is_up_status(199));
        assert!(!is_up_status(400));
        assert!(!is_up_status(503));
    }

    #[tokio::test]
    async fn test_always_failing_target_gets_exactly_n_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let service = service_for(format!("{}/health", server.uri()), 3);
        let result = prober().probe(&service).await;

        assert_eq!(result.status, ServiceStatus::Down);
        assert_eq!(result.http_code, Some(503));
        assert_eq!(result.error_message.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test]
    async fn test_up_returns_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let service = service_for(server.uri(), 5);
        let result = prober().probe(&service).await;

        assert!(result.is_up());
        assert_eq!(result.http_code, Some(200));
        assert!(result.response_time_ms.is_some());
        assert!(result.error_message.is_none());
    }

    #[tokio::test]
    async fn test_redirect_status_counts_as_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let result = prober().probe(&service_for(server.uri(), 1)).await;
        assert!(result.is_up());
        assert_eq!(result.http_code, Some(304));
    }

    #[tokio::test]
    async fn test_redirect_is_followed_to_target() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let result = prober().probe(&service_for(format!("{}/old", server.uri()), 1)).await;
        assert!(result.is_up());
        assert_eq!(result.http_code, Some(200));
    }

    #[tokio::test]
    async fn test_redirect_to_missing_page_is_down() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/gone"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = prober().probe(&service_for(format!("{}/old", server.uri()), 1)).await;
        assert_eq!(result.status, ServiceStatus::Down);
        assert_eq!(result.http_code, Some(404));
    }

    #[tokio::test]
    async fn test_custom_and_identifying_headers_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer probe-token"))
            .and(header_exists(MONITOR_HEADER))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let service = service_for(server.uri(), 1).with_header("Authorization", "Bearer probe-token");
        assert!(prober().probe(&service).await.is_up());
    }

    #[tokio::test]
    async fn test_final_attempt_outcome_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = prober().probe(&service_for(server.uri(), 2)).await;
        assert_eq!(result.http_code, Some(404));
    }

    #[tokio::test]
    async fn test_timeout_is_a_down_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let service = Service::new(1, "slow", server.uri())
            .with_timeout(Duration::from_millis(100))
            .with_retries(1, Duration::from_millis(0));
        let result = prober().probe(&service).await;

        assert_eq!(result.status, ServiceStatus::Down);
        assert!(result.error_message.unwrap().contains("Timed out"));
    }

    #[tokio::test]
    async fn test_malformed_url_is_captured() {
        let service = service_for("not a url".to_string(), 3);
        let result = prober().probe(&service).await;

        assert_eq!(result.status, ServiceStatus::Down);
        assert!(result.error_message.unwrap().starts_with("Invalid URL"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_captured() {
        // Port 9 (discard) is essentially never listening on loopback
        let service = service_for("http://127.0.0.1:9/".to_string(), 2);
        let result = prober().probe(&service).await;

        assert_eq!(result.status, ServiceStatus::Down);
        assert!(result.http_code.is_none());
    }
}
