use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service};

use super::AuthProvider;

/// Tower layer that resolves the requester before any protected handler runs.
#[derive(Clone)]
pub struct AuthLayer {
    provider: Arc<AuthProvider>,
}

impl AuthLayer {
    pub fn new(provider: Arc<AuthProvider>) -> Self {
        Self { provider }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            provider: Arc::clone(&self.provider),
        }
    }
}

/// Tower service that authenticates requests and inserts a
/// [`RequesterIdentity`](super::identity::RequesterIdentity) extension.
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    provider: Arc<AuthProvider>,
}

impl<S> Service<Request<Body>> for AuthMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let provider = Arc::clone(&self.provider);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match provider.authenticate(req.headers()) {
                Ok(identity) => {
                    req.extensions_mut().insert(identity);
                    inner.call(req).await
                }
                Err(failure) => Ok(unauthorized(failure.message())),
            }
        })
    }
}

fn unauthorized(message: &str) -> Response {
    let body = serde_json::json!({ "error": message });
    (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
}
