//! axum front end: one route per endpoint pattern, every method dispatched to its driver.

use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use http_body_util::LengthLimitError;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use crate::endpoint::{EndpointDriver, error_response};
use crate::error::{ConfigError, EndpointError};
use crate::types::{ClientRequest, ClientResponse};

impl IntoResponse for ClientResponse {
  fn into_response(self) -> Response {
    let mut response = Response::new(Body::from(self.body));
    *response.status_mut() = self.status;
    *response.headers_mut() = self.headers;
    response
  }
}

/// Route shape with parameter names erased, so `/users/:id` and `/users/:name` collide.
fn route_shape(pattern: &str) -> String {
  pattern
    .split('/')
    .map(|segment| match segment.chars().next() {
      Some(':') => ":",
      Some('*') => "*",
      _ => segment,
    })
    .collect::<Vec<_>>()
    .join("/")
}

fn check_patterns(endpoints: &[EndpointDriver]) -> Result<(), ConfigError> {
  let mut seen: HashMap<String, &str> = HashMap::new();
  for endpoint in endpoints {
    let pattern = endpoint.pattern();
    let invalid = |message: String| ConfigError::InvalidPattern {
      pattern: pattern.to_string(),
      message,
    };
    if !pattern.starts_with('/') {
      return Err(invalid("must start with '/'".into()));
    }
    if let Some(previous) = seen.insert(route_shape(pattern), pattern) {
      return Err(invalid(format!("conflicts with {previous:?}")));
    }
  }
  Ok(())
}

/// Mounts every endpoint on its pattern. Patterns use axum syntax (`/users/:id`, `/files/*path`).
#[instrument(level = "trace", skip_all, fields(endpoints = endpoints.len()))]
pub fn router(endpoints: Vec<EndpointDriver>) -> Result<Router, ConfigError> {
  check_patterns(&endpoints)?;
  let mut router = Router::new();
  for endpoint in endpoints {
    let pattern = endpoint.pattern().to_string();
    info!(%pattern, producers = endpoint.graph().specs().len(), "mounting endpoint");
    router = router.route(&pattern, any(dispatch).with_state(Arc::new(endpoint)));
  }
  Ok(
    router
      .layer(DefaultBodyLimit::disable())
      .layer(TraceLayer::new_for_http()),
  )
}

/// Buffers the client body up to the endpoint's limit and hands the request to the driver.
/// Dropping this future (client disconnect) cancels the request scope.
async fn dispatch(State(driver): State<Arc<EndpointDriver>>, request: Request) -> Response {
  let (parts, body) = request.into_parts();
  let limit = driver.options().body_limit;
  let body = match axum::body::to_bytes(body, usize::try_from(limit).unwrap_or(usize::MAX)).await {
    Ok(body) => body,
    Err(e) => {
      let too_large = std::error::Error::source(&e).is_some_and(|s| s.is::<LengthLimitError>());
      if too_large {
        warn!(pattern = %driver.pattern(), limit, "client request body exceeds limit");
        return error_response(&EndpointError::BodyLimitExceeded { limit }).into_response();
      }
      warn!(pattern = %driver.pattern(), error = %e, "reading client request body");
      return ClientResponse::new(axum::http::StatusCode::BAD_REQUEST).into_response();
    }
  };
  let request = ClientRequest::from_parts(parts.method, parts.uri, parts.headers, body);
  driver.handle(request).await.into_response()
}
