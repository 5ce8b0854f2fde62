//! HTTP fetcher built on `reqwest`.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{redirect, Client};
use swcache_common::HttpConfig;
use tracing::{debug, info, trace};

use crate::{CredentialsMode, Fetcher, NetError, RedirectMode, Request, Response};

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects followed in `Follow` mode.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self::from(&HttpConfig::default())
    }
}

impl From<&HttpConfig> for LoaderConfig {
    fn from(config: &HttpConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            default_timeout: Duration::from_secs(config.timeout_secs),
            max_redirects: config.max_redirects,
        }
    }
}

/// Fetches requests over HTTP.
///
/// `reqwest` fixes cookie and redirect policy per client, so one client is
/// kept per combination a request can ask for.
pub struct ResourceLoader {
    /// Cookies on, redirects followed.
    client: Client,
    /// Cookies off, redirects followed.
    anonymous: Client,
    /// Cookies on, redirects returned to the caller.
    no_redirect: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let build = |cookies: bool, policy: redirect::Policy| {
            Client::builder()
                .user_agent(&config.user_agent)
                .timeout(config.default_timeout)
                .redirect(policy)
                .cookie_store(cookies)
                .build()
                .map_err(|e| NetError::RequestFailed(e.to_string()))
        };

        let client = build(true, redirect::Policy::limited(config.max_redirects))?;
        let anonymous = build(false, redirect::Policy::limited(config.max_redirects))?;
        let no_redirect = build(true, redirect::Policy::none())?;

        info!(user_agent = %config.user_agent, "ResourceLoader initialized");

        Ok(Self {
            client,
            anonymous,
            no_redirect,
            config,
        })
    }

    fn client_for(&self, request: &Request) -> &Client {
        match (request.redirect, request.credentials) {
            (RedirectMode::Error | RedirectMode::Manual, _) => &self.no_redirect,
            (RedirectMode::Follow, CredentialsMode::Omit) => &self.anonymous,
            (RedirectMode::Follow, _) => &self.client,
        }
    }

    async fn execute(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        let mut req_builder = self
            .client_for(&request)
            .request(request.method.clone(), request.url.clone())
            .timeout(timeout);

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(timeout)
            } else {
                NetError::HttpError(e)
            }
        })?;

        let status = response.status();
        if request.redirect == RedirectMode::Error && status.is_redirection() {
            let location = response
                .headers()
                .get(http::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            return Err(NetError::RedirectRefused { location });
        }

        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response::new(url, status, headers, body))
    }
}

impl Fetcher for ResourceLoader {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        self.execute(request).boxed()
    }
}
