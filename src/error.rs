//! Error taxonomy for compiling endpoints and handling requests.
//!
//! - [ProduceError]: failure of one producer while handling a request. Carried inside
//!   [crate::types::ProduceResult] so partial failures travel next to successes.
//! - [ConfigError]: rejected configuration, raised before any request is served.
//! - [EndpointError]: request-time failure of the endpoint driver.
//! - [EvalError]: failure to evaluate a dynamic expression.

use axum::http::StatusCode;
use thiserror::Error;

/// Failure of a producer while handling one request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProduceError {
  /// The backend call failed outright.
  #[error("backend {backend}: {message}")]
  Transport { backend: String, message: String },
  /// The backend answered with a status outside the accepted set. The result still carries
  /// the response.
  #[error("producer {producer}: unexpected status {status}")]
  UnexpectedStatus { producer: String, status: u16 },
  /// A dependency of `producer` failed, so `producer` never ran.
  #[error("sequence {producer}: {source}")]
  Sequence {
    producer: String,
    #[source]
    source: Box<ProduceError>,
  },
  /// The request scope was cancelled while the producer was waiting.
  #[error("request cancelled")]
  Cancelled,
  /// An attribute expression could not be evaluated.
  #[error("evaluating {attribute}: {message}")]
  Evaluation { attribute: String, message: String },
  /// The outbound request could not be built, or the producer panicked.
  #[error("request: {0}")]
  Request(String),
  /// A sequence finished without any child result.
  #[error("sequence: no result")]
  NoResult,
}

impl ProduceError {
  /// Snake-case kind name used for logs and the error response header.
  pub fn kind(&self) -> &'static str {
    match self {
      ProduceError::Transport { .. } => "backend",
      ProduceError::UnexpectedStatus { .. } => "unexpected_status",
      ProduceError::Sequence { .. } | ProduceError::NoResult => "sequence",
      ProduceError::Cancelled => "cancelled",
      ProduceError::Evaluation { .. } => "evaluation",
      ProduceError::Request(_) => "request",
    }
  }

  /// Errors that keep their identity when they cross a sequence boundary.
  pub fn is_domain(&self) -> bool {
    matches!(
      self,
      ProduceError::UnexpectedStatus { .. } | ProduceError::Sequence { .. } | ProduceError::Cancelled
    )
  }

  /// Wraps this error as the sequence failure of `producer`, unless it is a domain error.
  pub fn into_sequence(self, producer: impl Into<String>) -> ProduceError {
    if self.is_domain() {
      return self;
    }
    ProduceError::Sequence {
      producer: producer.into(),
      source: Box::new(self),
    }
  }
}

/// Failure to evaluate an expression against an evaluation context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
  #[error("unknown variable {0:?}")]
  UnknownVariable(String),
  #[error("expected {expected}, found {found}")]
  Type {
    expected: &'static str,
    found: String,
  },
  #[error("invalid header {0:?}")]
  InvalidHeader(String),
  #[error("invalid path {0:?}: query and fragment are not allowed")]
  InvalidPath(String),
}

/// Configuration rejected at compile time.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("configuration error: circular sequence reference: {0}")]
  Cycle(String),
  #[error("configuration error: producer {0:?} references its own result")]
  SelfReference(String),
  #[error("configuration error: duplicate producer name {0:?}")]
  DuplicateName(String),
  #[error(
    "configuration error: endpoint {pattern:?} has {terminals} terminal results but neither response nor redirect"
  )]
  AmbiguousResponse { pattern: String, terminals: usize },
  #[error(
    "configuration error: endpoint {0:?} requires at least one proxy, request, response or redirect"
  )]
  EmptyEndpoint(String),
  #[error("configuration error: endpoint pattern {pattern:?}: {message}")]
  InvalidPattern { pattern: String, message: String },
  #[error("configuration error: producer {producer:?}: {attribute} is only allowed on proxies")]
  ProxyOnlyAttribute {
    producer: String,
    attribute: &'static str,
  },
  #[error("configuration error: unknown backend {0:?}")]
  UnknownBackend(String),
  #[error("configuration error: backend {name:?}: {message}")]
  InvalidBackend { name: String, message: String },
  #[error("configuration error: invalid request body limit {0:?}")]
  InvalidBodyLimit(String),
  #[error("configuration error: invalid redirect status {0}")]
  InvalidRedirectStatus(u16),
  #[error("configuration error: expression {expression:?}: {message}")]
  Expression { expression: String, message: String },
  #[error("reading configuration: {0}")]
  Io(#[from] std::io::Error),
  #[error("parsing configuration: {0}")]
  Parse(#[from] serde_json::Error),
}

/// Request-time failure of an endpoint.
#[derive(Debug, Error)]
pub enum EndpointError {
  /// The configuration cannot resolve a client response for this request.
  #[error("configuration error: {0}")]
  Configuration(String),
  #[error("evaluation error: {0}")]
  Evaluation(String),
  #[error("request body exceeds limit of {limit} bytes")]
  BodyLimitExceeded { limit: u64 },
  #[error(transparent)]
  Producer(#[from] ProduceError),
}

impl EndpointError {
  pub fn kind(&self) -> &'static str {
    match self {
      EndpointError::Configuration(_) => "configuration",
      EndpointError::Evaluation(_) => "evaluation",
      EndpointError::BodyLimitExceeded { .. } => "client_request_body_size_exceeded",
      EndpointError::Producer(e) => e.kind(),
    }
  }

  /// Status of the generic error response served for this error.
  pub fn status(&self) -> StatusCode {
    match self {
      EndpointError::Configuration(_) | EndpointError::Evaluation(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
      EndpointError::BodyLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
      EndpointError::Producer(ProduceError::Evaluation { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
      EndpointError::Producer(ProduceError::Transport { message, .. })
        if message.contains("timeout") =>
      {
        StatusCode::GATEWAY_TIMEOUT
      }
      EndpointError::Producer(_) => StatusCode::BAD_GATEWAY,
    }
  }
}
