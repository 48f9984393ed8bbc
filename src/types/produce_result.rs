//! Outcome of one producer for one request.

use axum::http::StatusCode;
use std::sync::Arc;

use super::{BackendRequest, BackendResponse};
use crate::error::ProduceError;

/// Named outcome of a producer. A result may carry both a response and an error (for example an
/// unexpected status), or only an error when the call never completed.
#[derive(Debug, Clone)]
pub struct ProduceResult {
  pub name: String,
  pub request: Option<Arc<BackendRequest>>,
  pub response: Option<Arc<BackendResponse>>,
  pub error: Option<ProduceError>,
}

impl ProduceResult {
  pub fn success(
    name: impl Into<String>,
    request: Arc<BackendRequest>,
    response: Arc<BackendResponse>,
  ) -> Self {
    Self {
      name: name.into(),
      request: Some(request),
      response: Some(response),
      error: None,
    }
  }

  pub fn failed(name: impl Into<String>, error: ProduceError) -> Self {
    Self {
      name: name.into(),
      request: None,
      response: None,
      error: Some(error),
    }
  }

  pub fn with_request(mut self, request: Arc<BackendRequest>) -> Self {
    self.request = Some(request);
    self
  }

  pub fn with_error(mut self, error: ProduceError) -> Self {
    self.error = Some(error);
    self
  }

  pub fn is_ok(&self) -> bool {
    self.error.is_none()
  }

  pub fn status(&self) -> Option<StatusCode> {
    self.response.as_ref().map(|r| r.status)
  }
}
