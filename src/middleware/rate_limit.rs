// Sliding-window rate limiting for login and webhook routes
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::HttpError;

/// Past this many tracked clients every check also drops idle ones.
const SWEEP_THRESHOLD: usize = 1024;

// In-memory, so limits are per process
#[derive(Debug, Clone)]
pub struct RateLimiter {
    requests: Arc<Mutex<HashMap<String, Vec<Instant>>>>,
    max_requests: usize,
    window: Duration,
    trust_proxy: bool,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration, trust_proxy: bool) -> Self {
        Self {
            requests: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window,
            trust_proxy,
        }
    }

    pub fn is_allowed(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut requests = self
            .requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let window = self.window;
        if requests.len() >= SWEEP_THRESHOLD {
            requests.retain(|_, hits| {
                hits.retain(|&timestamp| now.duration_since(timestamp) < window);
                !hits.is_empty()
            });
        }

        let entry = requests.entry(key.to_string()).or_default();

        // drop requests outside the window
        entry.retain(|&timestamp| now.duration_since(timestamp) < window);

        if entry.len() < self.max_requests {
            entry.push(now);
            true
        } else {
            false
        }
    }

    /// The peer address, or the first forwarded address when the service sits
    /// behind a trusted proxy.
    fn client_key(&self, request: &Request) -> String {
        if self.trust_proxy {
            let forwarded = request
                .headers()
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').next())
                .map(str::trim)
                .filter(|s| !s.is_empty());
            if let Some(address) = forwarded {
                return address.to_string();
            }
        }

        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let client_id = limiter.client_key(&request);

    if !limiter.is_allowed(&client_id) {
        tracing::warn!("Rate limit exceeded for {} on {}", client_id, request.uri().path());
        return Err(HttpError::too_many_requests(
            "Too many requests, please slow down",
        ));
    }

    Ok(next.run(request).await)
}

pub fn login_rate_limiter(trust_proxy: bool) -> RateLimiter {
    RateLimiter::new(5, Duration::from_secs(60), trust_proxy) // 5 attempts per minute
}

pub fn webhook_rate_limiter(trust_proxy: bool) -> RateLimiter {
    RateLimiter::new(100, Duration::from_secs(60), trust_proxy)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_from(peer: &str, forwarded_for: Option<&str>) -> Request {
        let mut builder = Request::builder();
        if let Some(forwarded) = forwarded_for {
            builder = builder.header("x-forwarded-for", forwarded);
        }
        let mut request = builder.body(axum::body::Body::empty()).unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[test]
    fn test_limit_within_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60), false);
        let now = Instant::now();

        assert!(limiter.check_at("1.2.3.4", now));
        assert!(limiter.check_at("1.2.3.4", now));
        assert!(!limiter.check_at("1.2.3.4", now));
        // other clients are counted separately
        assert!(limiter.check_at("5.6.7.8", now));
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60), false);
        let start = Instant::now();

        assert!(limiter.check_at("client", start));
        assert!(!limiter.check_at("client", start + Duration::from_secs(30)));
        assert!(limiter.check_at("client", start + Duration::from_secs(61)));
    }

    #[test]
    fn test_direct_clients_get_their_own_bucket() {
        let limiter = login_rate_limiter(false);
        let now = Instant::now();
        let first = limiter.client_key(&request_from("203.0.113.7:50000", None));
        let second = limiter.client_key(&request_from("198.51.100.9:50001", None));
        assert_ne!(first, second);

        for _ in 0..5 {
            assert!(limiter.check_at(&first, now));
        }
        assert!(!limiter.check_at(&first, now));
        assert!(limiter.check_at(&second, now));
    }

    #[test]
    fn test_forwarded_header_only_trusted_behind_proxy() {
        let request = request_from("10.0.0.2:443", Some("198.51.100.1, 172.16.0.1"));

        let direct = RateLimiter::new(5, Duration::from_secs(60), false);
        assert_eq!(direct.client_key(&request), "10.0.0.2");

        let proxied = RateLimiter::new(5, Duration::from_secs(60), true);
        assert_eq!(proxied.client_key(&request), "198.51.100.1");

        let bare = Request::builder()
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(proxied.client_key(&bare), "unknown");
    }

    #[test]
    fn test_idle_clients_are_forgotten() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60), false);
        let start = Instant::now();

        for i in 0..SWEEP_THRESHOLD {
            assert!(limiter.check_at(&format!("client-{}", i), start));
        }
        assert!(limiter.check_at("late", start + Duration::from_secs(61)));

        let tracked = limiter.requests.lock().unwrap().len();
        assert_eq!(tracked, 1);
    }
}
