//! HTTP server for the metrics endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sshwatch_collector::{ExecutorFactory, FleetCollector};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::config::HttpAuth;
use crate::render::{CONTENT_TYPE, render};

/// Realm announced in `WWW-Authenticate`.
pub const AUTH_REALM: &str = "SSH Exporter";

/// Application state shared across handlers.
struct AppState<F: ExecutorFactory> {
    collector: Arc<FleetCollector<F>>,
    metrics_path: String,
}

impl<F: ExecutorFactory> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            collector: Arc::clone(&self.collector),
            metrics_path: self.metrics_path.clone(),
        }
    }
}

/// Create the HTTP router.
fn create_router<F: ExecutorFactory>(
    collector: Arc<FleetCollector<F>>,
    metrics_path: &str,
    auth: Option<HttpAuth>,
) -> Router {
    let state = AppState {
        collector,
        metrics_path: metrics_path.to_string(),
    };

    let protected = Router::new()
        .route("/", get(index_handler::<F>))
        .route(metrics_path, get(metrics_handler::<F>));
    let protected = match auth {
        Some(auth) => protected.route_layer(middleware::from_fn_with_state(
            Arc::new(auth),
            basic_auth_middleware,
        )),
        None => protected,
    };

    Router::new()
        .merge(protected)
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run a fresh scrape and render it.
async fn metrics_handler<F: ExecutorFactory>(State(state): State<AppState<F>>) -> Response {
    let snapshot = state.collector.scrape().await;
    let body = render(&snapshot, state.collector.registry());

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        body,
    )
        .into_response()
}

async fn index_handler<F: ExecutorFactory>(State(state): State<AppState<F>>) -> Response {
    let page = format!(
        "<html>\n\
         <head><title>SSH Exporter</title></head>\n\
         <body>\n\
         <h1>SSH Exporter</h1>\n\
         <p>Monitoring {} hosts</p>\n\
         <p><a href=\"{}\">Metrics</a></p>\n\
         </body>\n\
         </html>\n",
        state.collector.hosts().len(),
        state.metrics_path
    );
    Html(page).into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(
            header::WWW_AUTHENTICATE,
            format!("Basic realm=\"{}\"", AUTH_REALM),
        )],
        Body::from("Unauthorized\n"),
    )
        .into_response()
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Decode `Authorization: Basic ...` into user and password.
fn decode_basic(value: &str) -> Option<(String, String)> {
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

async fn basic_auth_middleware(
    State(auth): State<Arc<HttpAuth>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_owned();

    let credentials = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(decode_basic);

    let Some((user, pass)) = credentials else {
        warn!(path = %path, "auth failed: missing or malformed credentials");
        return unauthorized();
    };

    let user_ok = constant_time_eq(user.as_bytes(), auth.username.as_bytes());
    let pass_ok = constant_time_eq(pass.as_bytes(), auth.password.as_bytes());
    if !(user_ok & pass_ok) {
        warn!(user = %user, path = %path, "auth failed: invalid credentials");
        return unauthorized();
    }

    debug!(user = %user, path = %path, "authenticated");
    next.run(req).await
}

/// HTTP server configuration.
pub struct HttpServer<F: ExecutorFactory> {
    collector: Arc<FleetCollector<F>>,
    listen_addr: SocketAddr,
    metrics_path: String,
    auth: Option<HttpAuth>,
}

impl<F: ExecutorFactory> HttpServer<F> {
    /// Create a new HTTP server.
    pub fn new(
        collector: Arc<FleetCollector<F>>,
        listen_addr: SocketAddr,
        metrics_path: String,
        auth: Option<HttpAuth>,
    ) -> Self {
        Self {
            collector,
            listen_addr,
            metrics_path,
            auth,
        }
    }

    /// The router served by [`HttpServer::run`].
    pub fn router(&self) -> Router {
        create_router(
            Arc::clone(&self.collector),
            &self.metrics_path,
            self.auth.clone(),
        )
    }

    /// Bind the listen address and serve until the shutdown signal is received.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until the shutdown signal is received.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let router = self.router();
        let addr = listener.local_addr().unwrap_or(self.listen_addr);

        info!(
            addr = %addr,
            path = %self.metrics_path,
            hosts = self.collector.hosts().len(),
            auth = self.auth.is_some(),
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use sshwatch_collector::executor::{MockFactory, MockHost};
    use sshwatch_collector::{
        Credential, FleetSettings, HostTarget, MetricRegistry, MonitorSet,
    };
    use tower::ServiceExt;

    fn make_collector() -> Arc<FleetCollector<MockFactory>> {
        let hosts = vec![
            HostTarget::new(
                "web01",
                22,
                "root",
                Credential::Password("pw".into()),
                MonitorSet::default(),
            ),
            HostTarget::new(
                "web02",
                22,
                "root",
                Credential::Password("pw".into()),
                MonitorSet::default(),
            ),
        ];
        Arc::new(FleetCollector::new(
            hosts,
            Arc::new(MetricRegistry::standard()),
            MockFactory::new().host("web01", MockHost::new()),
            FleetSettings::default(),
        ))
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secrets"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_decode_basic() {
        assert_eq!(
            decode_basic(&basic("prom", "a:b")),
            Some(("prom".to_string(), "a:b".to_string()))
        );
        assert_eq!(decode_basic("Bearer abc"), None);
        assert_eq!(decode_basic("Basic !!!"), None);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let router = create_router(make_collector(), "/metrics", None);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert_eq!(content_type.to_str().unwrap(), CONTENT_TYPE);

        let body = body_text(response).await;
        assert!(body.contains("host_ssh_status{host=\"web01\"} 1"));
        assert!(body.contains("host_ssh_status{host=\"web02\"} 0"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = create_router(make_collector(), "/metrics", None);

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "healthy\n");
    }

    #[tokio::test]
    async fn test_index_page() {
        let router = create_router(make_collector(), "/probe", None);

        let response = router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        assert!(body.contains("Monitoring 2 hosts"));
        assert!(body.contains("href=\"/probe\""));
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = create_router(make_collector(), "/prometheus/metrics", None);

        let response = router
            .clone()
            .oneshot(
                Request::get("/prometheus/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_basic_auth() {
        let router = create_router(
            make_collector(),
            "/metrics",
            Some(HttpAuth::new("prom", "scrape")),
        );

        let response = router
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"SSH Exporter\""
        );

        let response = router
            .clone()
            .oneshot(
                Request::get("/")
                    .header(header::AUTHORIZATION, basic("prom", "wrong"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .clone()
            .oneshot(
                Request::get("/metrics")
                    .header(header::AUTHORIZATION, basic("prom", "scrape"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // health stays open
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
