//! Liveness probe for proxies

use std::time::Duration;

use common::BoxFuture;
use resource_pool::HealthProbe;
use tracing::debug;

use crate::endpoint::ProxyEndpoint;

/// Healthy iff a GET of `url` through the proxy answers 200 within `timeout`.
pub struct HttpProbe {
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

impl HealthProbe<ProxyEndpoint> for HttpProbe {
    fn check<'a>(&'a self, proxy: &'a ProxyEndpoint) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match proxy
                .client()
                .get(&self.url)
                .timeout(self.timeout)
                .send()
                .await
            {
                Ok(response) => {
                    let healthy = response.status() == reqwest::StatusCode::OK;
                    debug!(proxy = proxy.label(), status = %response.status(), healthy, "proxy probe");
                    healthy
                }
                Err(e) => {
                    debug!(proxy = proxy.label(), error = %e, "proxy probe failed");
                    false
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeUpstream;

    const PROBE_URL: &str = "http://probe.invalid/ip";

    fn through(upstream: &FakeUpstream) -> ProxyEndpoint {
        ProxyEndpoint::new(&upstream.url()).unwrap()
    }

    #[tokio::test]
    async fn ok_through_the_proxy_is_healthy() {
        let upstream = FakeUpstream::start(vec![(200, r#"{"ip":"10.0.0.1"}"#.into())]).await;
        let probe = HttpProbe::new(PROBE_URL, Duration::from_secs(5));

        assert!(probe.check(&through(&upstream)).await);
        assert_eq!(upstream.hits(), 1, "probe must go through the proxy");
    }

    #[tokio::test]
    async fn non_ok_status_is_unhealthy() {
        for status in [503, 204, 407] {
            let upstream = FakeUpstream::start(vec![(status, String::new())]).await;
            let probe = HttpProbe::new(PROBE_URL, Duration::from_secs(5));

            assert!(!probe.check(&through(&upstream)).await, "status {status}");
            assert_eq!(upstream.hits(), 1);
        }
    }

    #[tokio::test]
    async fn silent_proxy_is_unhealthy_after_the_timeout() {
        let upstream = FakeUpstream::silent().await;
        let probe = HttpProbe::new(PROBE_URL, Duration::from_millis(200));

        let started = std::time::Instant::now();
        assert!(!probe.check(&through(&upstream)).await);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
        assert_eq!(upstream.hits(), 1);
    }

    #[tokio::test]
    async fn unreachable_proxy_is_unhealthy() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let proxy = ProxyEndpoint::new(&format!("http://{addr}")).unwrap();
        let probe = HttpProbe::new(PROBE_URL, Duration::from_secs(5));

        assert!(!probe.check(&proxy).await);
    }
}
