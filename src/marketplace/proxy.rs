//! Outbound proxy rotation.
//!
//! Each configured proxy gets its own `reqwest::Client` (proxies are fixed per
//! client); requests take the next route round-robin. With no proxies the pool
//! holds a single direct route.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;

use crate::config::redact_url_credentials;

const USER_AGENT: &str = concat!("marketsync/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid proxy url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("invalid marketplace base url: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
}

#[derive(Debug, Clone)]
pub struct ProxyRoute {
    /// `direct` or the proxy URL with its password masked
    pub label: String,
    pub client: reqwest::Client,
}

#[derive(Debug)]
pub struct ProxyPool {
    routes: Vec<ProxyRoute>,
    next: AtomicUsize,
}

impl ProxyPool {
    /// Pool with one route that bypasses any proxy.
    pub fn direct(timeout: Duration) -> Result<Self, ProxyError> {
        let client = base_builder(timeout).no_proxy().build()?;
        Ok(Self::from_routes(vec![ProxyRoute {
            label: "direct".to_string(),
            client,
        }]))
    }

    /// One route per proxy URL; an empty list yields a direct pool.
    pub fn from_urls(urls: &[String], timeout: Duration) -> Result<Self, ProxyError> {
        if urls.is_empty() {
            return Self::direct(timeout);
        }

        let mut routes = Vec::with_capacity(urls.len());
        for raw in urls {
            let label = redact_url_credentials(raw);
            let proxy = reqwest::Proxy::all(raw.as_str()).map_err(|source| {
                ProxyError::InvalidUrl {
                    url: label.clone(),
                    source,
                }
            })?;
            let client = base_builder(timeout).proxy(proxy).build()?;
            routes.push(ProxyRoute { label, client });
        }

        tracing::info!(proxies = routes.len(), "Marketplace proxy pool configured");
        Ok(Self::from_routes(routes))
    }

    fn from_routes(routes: Vec<ProxyRoute>) -> Self {
        Self {
            routes,
            next: AtomicUsize::new(0),
        }
    }

    /// Next route in round-robin order.
    pub fn next_route(&self) -> &ProxyRoute {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.routes.len();
        &self.routes[idx]
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn base_builder(timeout: Duration) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .user_agent(USER_AGENT)
}
