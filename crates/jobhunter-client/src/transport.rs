use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobhunter_core::error::AppError;
use jobhunter_core::request::{CrawlRequest, CrawlResponse};
use jobhunter_core::traits::Transport;
use reqwest::{Client, Method, Proxy};

const FALLBACK_USER_AGENT: &str = "jobhunter/0.1";

/// HTTP transport using reqwest.
///
/// Keeps one client per proxy address (reqwest binds proxies at build time)
/// plus one direct client for proxyless requests.
#[derive(Clone)]
pub struct ReqwestTransport {
    direct: Client,
    proxied: Arc<Mutex<HashMap<String, Client>>>,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            direct: build_client(timeout, None)?,
            proxied: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        })
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, AppError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };
        let mut clients = self.proxied.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(client) = clients.get(proxy) {
            return Ok(client.clone());
        }
        let client = build_client(self.timeout, Some(proxy))?;
        tracing::debug!(%proxy, "Built proxied HTTP client");
        clients.insert(proxy.to_string(), client.clone());
        Ok(client)
    }
}

fn build_client(timeout: Duration, proxy: Option<&str>) -> Result<Client, AppError> {
    let mut builder = Client::builder()
        .user_agent(FALLBACK_USER_AGENT)
        .timeout(timeout);
    if let Some(proxy) = proxy {
        let proxy = Proxy::all(proxy)
            .map_err(|e| AppError::ConfigError(format!("Invalid proxy '{proxy}': {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| AppError::HttpError(e.to_string()))
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: &CrawlRequest) -> Result<CrawlResponse, AppError> {
        let client = self.client_for(request.meta.proxy.as_deref())?;
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|e| {
            AppError::HttpError(format!("Invalid method '{}': {e}", request.method))
        })?;

        let mut builder = client.request(method, &request.url);
        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }

        let timeout_secs = self.timeout.as_secs();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        Ok(CrawlResponse::new(
            response.url().as_str(),
            response.status().as_u16(),
        ))
    }
}
