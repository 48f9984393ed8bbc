//! Tests for the error taxonomy.

use crate::error::{EndpointError, ProduceError};
use axum::http::StatusCode;

fn transport() -> ProduceError {
  ProduceError::Transport {
    backend: "origin".into(),
    message: "connection refused".into(),
  }
}

#[test]
fn into_sequence_wraps_transport_errors() {
  let wrapped = transport().into_sequence("default");
  match &wrapped {
    ProduceError::Sequence { producer, source } => {
      assert_eq!(producer, "default");
      assert_eq!(**source, transport());
    }
    other => panic!("expected sequence error, got {other:?}"),
  }
  assert_eq!(wrapped.kind(), "sequence");
  assert!(wrapped.to_string().contains("connection refused"));
}

#[test]
fn into_sequence_keeps_domain_errors() {
  let unexpected = ProduceError::UnexpectedStatus {
    producer: "r1".into(),
    status: 404,
  };
  assert_eq!(unexpected.clone().into_sequence("default"), unexpected);
  assert_eq!(
    ProduceError::Cancelled.into_sequence("default"),
    ProduceError::Cancelled
  );

  let nested = transport().into_sequence("r2");
  assert_eq!(nested.clone().into_sequence("default"), nested);
}

#[test]
fn no_result_is_wrapped() {
  let wrapped = ProduceError::NoResult.into_sequence("final");
  assert!(matches!(wrapped, ProduceError::Sequence { .. }));
}

#[test]
fn endpoint_status_mapping() {
  assert_eq!(
    EndpointError::Producer(transport()).status(),
    StatusCode::BAD_GATEWAY
  );
  assert_eq!(
    EndpointError::Producer(transport().into_sequence("x")).status(),
    StatusCode::BAD_GATEWAY
  );
  assert_eq!(
    EndpointError::Configuration("ambiguous".into()).status(),
    StatusCode::INTERNAL_SERVER_ERROR
  );
  assert_eq!(
    EndpointError::Producer(ProduceError::Evaluation {
      attribute: "url".into(),
      message: "bad".into(),
    })
    .status(),
    StatusCode::INTERNAL_SERVER_ERROR
  );
  assert_eq!(
    EndpointError::BodyLimitExceeded { limit: 10 }.status(),
    StatusCode::PAYLOAD_TOO_LARGE
  );
  assert_eq!(
    EndpointError::Producer(ProduceError::Transport {
      backend: "slow".into(),
      message: "backend timeout after 10ms".into(),
    })
    .status(),
    StatusCode::GATEWAY_TIMEOUT
  );
}

#[test]
fn endpoint_kind_delegates_to_producer() {
  let err = EndpointError::from(ProduceError::UnexpectedStatus {
    producer: "r".into(),
    status: 500,
  });
  assert_eq!(err.kind(), "unexpected_status");
  assert_eq!(EndpointError::Configuration("x".into()).kind(), "configuration");
}
