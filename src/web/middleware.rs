//! Request logging middleware
//!
//! Logs every request with the resolved client address, response status and latency.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Request},
    response::Response,
};
use futures::future::BoxFuture;
use std::{net::SocketAddr, task::{Context, Poll}, time::Instant};
use tower::{Layer, Service};

/// Client address as seen behind a reverse proxy.
/// Priority: X-Real-IP > first X-Forwarded-For hop > socket peer
pub fn get_real_ip(headers: &HeaderMap, peer: Option<&str>) -> Option<String> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let real_ip = header("x-real-ip");
    let first_hop = header("x-forwarded-for").and_then(|chain| chain.split(',').next());

    real_ip
        .into_iter()
        .chain(first_hop)
        .chain(peer)
        .map(str::trim)
        .find(|ip| !ip.is_empty())
        .map(str::to_string)
}

/// Layer for HTTP request logging
#[derive(Clone, Default)]
pub struct RequestLoggingLayer;

impl RequestLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestLoggingLayer {
    type Service = RequestLoggingMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLoggingMiddleware { inner }
    }
}

/// Middleware service for HTTP request logging
#[derive(Clone)]
pub struct RequestLoggingMiddleware<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RequestLoggingMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        // Take the service that was polled ready, leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let method = request.method().clone();
            let path = request.uri().path().to_string();

            let peer = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string());
            let ip = get_real_ip(request.headers(), peer.as_deref())
                .unwrap_or_else(|| "unknown".to_string());

            let started = Instant::now();
            let response = inner.call(request).await?;

            tracing::info!(
                ip = %ip,
                status = response.status().as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "HTTP {} {}",
                method,
                path
            );
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn real_ip_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.9"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.1"));
        assert_eq!(get_real_ip(&headers, Some("10.0.0.1")).as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn first_forwarded_hop_is_used() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" 198.51.100.1, 10.0.0.2"));
        assert_eq!(get_real_ip(&headers, Some("10.0.0.1")).as_deref(), Some("198.51.100.1"));
    }

    #[test]
    fn falls_back_to_peer() {
        let headers = HeaderMap::new();
        assert_eq!(get_real_ip(&headers, Some("10.0.0.1")).as_deref(), Some("10.0.0.1"));
        assert_eq!(get_real_ip(&headers, None), None);
    }
}
