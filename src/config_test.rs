//! Tests for gateway configuration loading and compilation.

use crate::config::{BackendRef, GatewayConfig, parse_body_limit};
use crate::endpoint::DEFAULT_BODY_LIMIT;
use crate::error::ConfigError;
use crate::types::ProducerKind;
use axum::http::StatusCode;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;

fn config(value: serde_json::Value) -> GatewayConfig {
  GatewayConfig::from_json_str(&value.to_string()).unwrap()
}

#[test]
fn parses_named_and_inline_backends() {
  let parsed = config(json!({
    "backends": {"api": {"origin": "http://127.0.0.1:9000", "timeout_ms": 500}},
    "endpoints": [{
      "pattern": "/users",
      "requests": [
        {"name": "user", "backend": "api", "url": "/users"},
        {"backend": {"origin": "http://127.0.0.1:9001", "base_path": "/v2"}, "url": "/profiles"}
      ]
    }]
  }));

  assert_eq!(parsed.backends["api"].timeout_ms, 500);
  let requests = &parsed.endpoints[0].requests;
  assert!(matches!(&requests[0].backend, BackendRef::Named(n) if n == "api"));
  match &requests[1].backend {
    BackendRef::Inline(inline) => {
      assert_eq!(inline.origin, "http://127.0.0.1:9001");
      assert_eq!(inline.base_path, "/v2");
      assert_eq!(inline.timeout_ms, 60_000);
    }
    other => panic!("expected inline backend, got {other:?}"),
  }
}

#[test]
fn rejects_unknown_fields() {
  let err = GatewayConfig::from_json_str(
    r#"{"endpoints": [{"pattern": "/", "requests": [{"backend": "a", "uri": "/x"}]}]}"#,
  )
  .unwrap_err();
  assert!(matches!(err, ConfigError::Parse(_)));

  let err = GatewayConfig::from_json_str(r#"{"listen": ":8080"}"#).unwrap_err();
  assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn body_limit_units() {
  assert_eq!(parse_body_limit(None).unwrap(), DEFAULT_BODY_LIMIT);
  assert_eq!(parse_body_limit(Some("64MiB")).unwrap(), 67_108_864);
  assert_eq!(parse_body_limit(Some("1KB")).unwrap(), 1000);
  assert_eq!(parse_body_limit(Some("1kib")).unwrap(), 1024);
  assert_eq!(parse_body_limit(Some("2 M")).unwrap(), 2_000_000);
  assert_eq!(parse_body_limit(Some("1.5KiB")).unwrap(), 1536);
  assert_eq!(parse_body_limit(Some("10")).unwrap(), 10);
  assert_eq!(parse_body_limit(Some("10B")).unwrap(), 10);

  for invalid in ["", "abc", "-1", "10 XB", "5iB", "1MiBs"] {
    assert!(
      matches!(parse_body_limit(Some(invalid)), Err(ConfigError::InvalidBodyLimit(_))),
      "{invalid:?} should be rejected"
    );
  }
}

#[test]
fn builds_endpoint_with_shared_named_backend() {
  let endpoints = config(json!({
    "backends": {"api": {"origin": "http://127.0.0.1:9000"}},
    "endpoints": [{
      "pattern": "/chain",
      "request_body_limit": "1KiB",
      "requests": [
        {"name": "r1", "backend": "api", "url": "/r1"},
        {"backend": "api", "url": "/final", "json_body": "${backend_responses.r1.json_body}"}
      ]
    }]
  }))
  .build()
  .unwrap();

  assert_eq!(endpoints.len(), 1);
  let driver = &endpoints[0];
  assert_eq!(driver.pattern(), "/chain");
  assert_eq!(driver.options().body_limit, 1024);
  assert_eq!(driver.graph().describe(), "parallel[sequence[r1, default]]");

  let specs = driver.graph().specs();
  assert_eq!(specs[0].backend().name(), "api");
  assert!(Arc::ptr_eq(specs[0].backend(), specs[1].backend()));
}

#[test]
fn proxies_are_declared_before_requests() {
  let endpoints = config(json!({
    "endpoints": [{
      "pattern": "/audit",
      "requests": [{
        "name": "audit",
        "backend": {"origin": "http://127.0.0.1:9002"},
        "json_body": "${backend_responses.default.json_body}"
      }],
      "proxies": [{"backend": {"origin": "http://127.0.0.1:9001"}}],
      "response": {"json_body": "${backend_responses.audit.json_body}"}
    }]
  }))
  .build()
  .unwrap();

  let graph = endpoints[0].graph();
  let kinds: Vec<_> = graph.specs().iter().map(|s| (s.name(), s.kind())).collect();
  assert_eq!(
    kinds,
    vec![("default", ProducerKind::Proxy), ("audit", ProducerKind::Request)]
  );
  assert_eq!(graph.describe(), "parallel[sequence[default, audit]]");
  assert_eq!(graph.specs()[0].backend().name(), "/audit default");
}

#[test]
fn unknown_backend_is_rejected() {
  let err = config(json!({
    "endpoints": [{"pattern": "/", "requests": [{"backend": "missing"}]}]
  }))
  .build()
  .unwrap_err();
  assert!(matches!(err, ConfigError::UnknownBackend(ref n) if n == "missing"));
}

#[test]
fn invalid_backend_origin_is_rejected() {
  let err = config(json!({"backends": {"bad": {"origin": "ftp://example.com"}}}))
    .build()
    .unwrap_err();
  assert!(matches!(err, ConfigError::InvalidBackend { ref name, .. } if name == "bad"));
}

#[test]
fn ambiguous_endpoint_fails_to_build() {
  let err = config(json!({
    "backends": {"api": {"origin": "http://127.0.0.1:9000"}},
    "endpoints": [{
      "pattern": "/two",
      "requests": [{"name": "a", "backend": "api"}, {"name": "b", "backend": "api"}]
    }]
  }))
  .build()
  .unwrap_err();
  assert!(matches!(err, ConfigError::AmbiguousResponse { terminals: 2, .. }));
}

#[test]
fn cycle_fails_to_build() {
  let err = config(json!({
    "backends": {"api": {"origin": "http://127.0.0.1:9000"}},
    "endpoints": [{
      "pattern": "/cycle",
      "requests": [
        {"name": "a", "backend": "api", "url": "${backend_responses.b.body}"},
        {"name": "b", "backend": "api", "url": "${backend_responses.a.body}"}
      ]
    }]
  }))
  .build()
  .unwrap_err();
  assert!(matches!(err, ConfigError::Cycle(ref path) if path == "a -> b -> a"));
}

#[test]
fn redirect_status_defaults_and_validates() {
  let endpoints = config(json!({
    "endpoints": [
      {"pattern": "/old", "redirect": {"url": "/new${request.path}"}},
      {"pattern": "/tmp", "redirect": {"url": "/elsewhere", "status": 307}}
    ]
  }))
  .build()
  .unwrap();
  let status = |i: usize| endpoints[i].options().redirect.as_ref().unwrap().status();
  assert_eq!(status(0), StatusCode::MOVED_PERMANENTLY);
  assert_eq!(status(1), StatusCode::TEMPORARY_REDIRECT);

  let err = config(json!({
    "endpoints": [{"pattern": "/bad", "redirect": {"url": "/x", "status": 200}}]
  }))
  .build()
  .unwrap_err();
  assert!(matches!(err, ConfigError::InvalidRedirectStatus(200)));
}

#[test]
fn endpoint_modifiers_are_compiled() {
  let endpoints = config(json!({
    "backends": {"api": {"origin": "http://127.0.0.1:9000"}},
    "endpoints": [{
      "pattern": "/m",
      "proxies": [{"backend": "api"}],
      "set_response_headers": {"x-gateway": "1"},
      "set_response_status": 202
    }]
  }))
  .build()
  .unwrap();
  let modifiers = &endpoints[0].options().modifiers;
  assert!(!modifiers.is_empty());
  assert!(modifiers.set_response_headers.is_some());
  assert!(modifiers.remove_response_headers.is_none());
}

#[test]
fn endpoint_request_modifiers_are_compiled() {
  let endpoints = config(json!({
    "backends": {"api": {"origin": "http://127.0.0.1:9000"}},
    "endpoints": [{
      "pattern": "/r",
      "path": "/v2${request.path}",
      "set_request_headers": {"x-tenant": "acme"},
      "remove_query_params": ["debug"],
      "add_form_params": {"client_id": "gateway"},
      "proxies": [{"backend": "api", "path": "/inner", "remove_form_params": "secret"}]
    }]
  }))
  .build()
  .unwrap();
  let modifiers = &endpoints[0].options().request_modifiers;
  assert!(!modifiers.is_empty());
  assert!(modifiers.path.is_some());
  assert!(modifiers.add_form_params.is_some());
  assert!(modifiers.set_query_params.is_none());

  let attributes = endpoints[0].graph().specs()[0].attributes();
  assert!(attributes.path.is_some());
  assert!(attributes.remove_form_params.is_some());
}

#[test]
fn path_on_request_is_rejected() {
  let err = config(json!({
    "backends": {"api": {"origin": "http://127.0.0.1:9000"}},
    "endpoints": [{"pattern": "/", "requests": [{"backend": "api", "path": "/x"}]}]
  }))
  .build()
  .unwrap_err();
  assert!(matches!(
    err,
    ConfigError::ProxyOnlyAttribute { ref producer, attribute: "path" } if producer == "default"
  ));
}

#[test]
fn loads_from_file() {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  write!(
    file,
    "{}",
    json!({
      "backends": {"api": {"origin": "http://127.0.0.1:9000"}},
      "endpoints": [{"pattern": "/p", "proxies": [{"backend": "api"}]}]
    })
  )
  .unwrap();

  let loaded = GatewayConfig::load(file.path()).unwrap();
  assert_eq!(loaded.endpoints[0].pattern, "/p");
  assert_eq!(loaded.build().unwrap()[0].graph().describe(), "parallel[default]");

  let missing = GatewayConfig::load(file.path().with_extension("missing")).unwrap_err();
  assert!(matches!(missing, ConfigError::Io(_)));
}
