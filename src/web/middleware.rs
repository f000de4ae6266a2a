use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::http::header::{REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::AppState;
use crate::error::AppError;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);

// Bound on tracked clients before stale entries get swept.
const MAX_TRACKED_CLIENTS: usize = 1024;

/// Per-client request budget for the generate endpoint.
#[derive(Clone, Copy, Debug)]
pub struct RateLimit {
    /// Requests allowed per client per minute.
    pub per_minute: u32,
    /// Requests allowed per client per hour.
    pub per_hour: u32,
}

#[derive(Default)]
struct ClientHistory {
    minute: VecDeque<Instant>,
    hour: VecDeque<Instant>,
}

fn prune(history: &mut ClientHistory, now: Instant) {
    while history
        .minute
        .front()
        .is_some_and(|at| now.duration_since(*at) > MINUTE)
    {
        history.minute.pop_front();
    }
    while history
        .hour
        .front()
        .is_some_and(|at| now.duration_since(*at) > HOUR)
    {
        history.hour.pop_front();
    }
}

/// In-memory sliding-window limiter. `None` settings disable it entirely.
pub(crate) struct RateLimiter {
    settings: Option<RateLimit>,
    clients: Mutex<HashMap<String, ClientHistory>>,
}

impl RateLimiter {
    pub(crate) fn new(settings: Option<RateLimit>) -> Self {
        Self {
            settings,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn check(&self, client: &str) -> Result<(), AppError> {
        let Some(settings) = self.settings else {
            return Ok(());
        };
        let now = Instant::now();
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if clients.len() > MAX_TRACKED_CLIENTS {
            clients.retain(|_, history| {
                prune(history, now);
                !history.hour.is_empty()
            });
        }

        let history = clients.entry(client.to_string()).or_default();
        prune(history, now);

        if history.minute.len() >= settings.per_minute as usize {
            return Err(AppError::RateLimited(
                "Too many requests per minute".to_string(),
            ));
        }
        if history.hour.len() >= settings.per_hour as usize {
            return Err(AppError::RateLimited(
                "Too many requests per hour".to_string(),
            ));
        }

        history.minute.push_back(now);
        history.hour.push_back(now);
        Ok(())
    }
}

// Proxied requests carry the client in X-Forwarded-For; direct connections
// fall back to the peer address.
fn client_id(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
    {
        return forwarded.trim().to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Applies the request budget before letting a generate request through.
pub(crate) async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_id(&request);
    if let Err(err) = state.limiter.check(&client) {
        return err.into_response();
    }
    next.run(request).await
}

/// Adds the standard security headers to every response.
pub(crate) async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_limiter_never_rejects() {
        let limiter = RateLimiter::new(None);
        for _ in 0..1000 {
            limiter.check("10.0.0.1").expect("no limit");
        }
    }

    #[test]
    fn minute_budget_is_enforced_per_client() {
        let limiter = RateLimiter::new(Some(RateLimit {
            per_minute: 2,
            per_hour: 100,
        }));
        limiter.check("10.0.0.1").expect("first");
        limiter.check("10.0.0.1").expect("second");
        assert!(matches!(
            limiter.check("10.0.0.1"),
            Err(AppError::RateLimited(_))
        ));
        // A different client still has budget.
        limiter.check("10.0.0.2").expect("other client");
    }

    #[test]
    fn client_identity_prefers_forwarded_header_then_peer_address() {
        let request = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(axum::body::Body::empty())
            .expect("build request");
        assert_eq!(client_id(&request), "203.0.113.9");

        let mut request = axum::http::Request::builder()
            .body(axum::body::Body::empty())
            .expect("build request");
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 7], 4242))));
        assert_eq!(client_id(&request), "198.51.100.7");
    }

    #[test]
    fn hour_budget_is_enforced() {
        let limiter = RateLimiter::new(Some(RateLimit {
            per_minute: 100,
            per_hour: 3,
        }));
        for _ in 0..3 {
            limiter.check("10.0.0.1").expect("within budget");
        }
        assert!(matches!(
            limiter.check("10.0.0.1"),
            Err(AppError::RateLimited(message)) if message.contains("hour")
        ));
    }
}
