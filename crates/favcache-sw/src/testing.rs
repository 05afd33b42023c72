//! Scripted in-memory fetcher for worker tests and offline demos.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use favcache_net::{Fetcher, NetError, Request, Response};
use hashbrown::HashMap;
use http::{HeaderMap, StatusCode};

#[derive(Debug, Clone)]
enum Scripted {
    Respond {
        status: u16,
        headers: HeaderMap,
        body: Bytes,
    },
    Fail(String),
    Delay {
        delay: Duration,
        status: u16,
        body: Bytes,
    },
}

/// A [`Fetcher`] answering from a table of URL → scripted outcome.
///
/// Unknown URLs fail as a transport error. Scripts can be replaced while
/// the fetcher is shared.
#[derive(Debug, Default)]
pub struct StaticFetcher {
    routes: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<HashMap<String, usize>>,
    offline: AtomicBool,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(url: &str) -> String {
        url::Url::parse(url)
            .map(|u| u.as_str().to_string())
            .unwrap_or_else(|_| url.to_string())
    }

    fn script(&self, url: &str, outcome: Scripted) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(Self::normalize(url), outcome);
        }
    }

    /// Answer `url` with `status` and `body`.
    pub fn respond(&self, url: &str, status: u16, body: impl Into<Bytes>) {
        self.respond_with_headers(url, status, HeaderMap::new(), body);
    }

    /// Answer `url` with `status`, `headers` and `body`.
    pub fn respond_with_headers(
        &self,
        url: &str,
        status: u16,
        headers: HeaderMap,
        body: impl Into<Bytes>,
    ) {
        self.script(
            url,
            Scripted::Respond {
                status,
                headers,
                body: body.into(),
            },
        );
    }

    /// Fail `url` with a transport error.
    pub fn fail(&self, url: &str, reason: &str) {
        self.script(url, Scripted::Fail(reason.to_string()));
    }

    /// Answer `url` with a 200 after `delay`.
    pub fn delay(&self, url: &str, delay: Duration, body: impl Into<Bytes>) {
        self.script(
            url,
            Scripted::Delay {
                delay,
                status: 200,
                body: body.into(),
            },
        );
    }

    /// Fail every request regardless of script.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of fetches seen for `url`.
    pub fn calls(&self, url: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(&Self::normalize(url)).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn response(
        request: &Request,
        status: u16,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response, NetError> {
        let status =
            StatusCode::from_u16(status).map_err(|e| NetError::RequestFailed(e.to_string()))?;
        let mut response = Response::new(request.url.clone(), status, headers, body);
        response.request_id = Some(request.id);
        Ok(response)
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        let url = request.url.as_str().to_string();
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(url.clone()).or_insert(0) += 1;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::RequestFailed(format!("{}: offline", url)));
        }

        let outcome = self
            .routes
            .lock()
            .ok()
            .and_then(|routes| routes.get(&url).cloned());

        match outcome {
            Some(Scripted::Respond {
                status,
                headers,
                body,
            }) => Self::response(&request, status, headers, body),
            Some(Scripted::Fail(reason)) => {
                Err(NetError::RequestFailed(format!("{}: {}", url, reason)))
            }
            Some(Scripted::Delay {
                delay,
                status,
                body,
            }) => {
                tokio::time::sleep(delay).await;
                Self::response(&request, status, HeaderMap::new(), body)
            }
            None => Err(NetError::RequestFailed(format!("{}: no route", url))),
        }
    }
}
