//! Tests for `BackendRequest` and `BackendResponse`.

use super::{BackendRequest, BackendResponse};
use axum::http::{Method, StatusCode};
use serde_json::json;

#[test]
fn path_and_query_of_relative_url() {
  let r = BackendRequest::new(Method::GET, "/users/1?expand=true&x=2");
  assert_eq!(r.path(), "/users/1");
  assert_eq!(r.query(), Some("expand=true&x=2"));
}

#[test]
fn path_and_query_of_absolute_url() {
  let r = BackendRequest::new(Method::GET, "http://origin:8080/a/b?q=1");
  assert_eq!(r.path(), "/a/b");
  assert_eq!(r.query(), Some("q=1"));

  let bare = BackendRequest::new(Method::GET, "https://origin");
  assert_eq!(bare.path(), "/");
  assert_eq!(bare.query(), None);
}

#[test]
fn json_body_parses_json_only() {
  let json = BackendResponse::new(StatusCode::OK).with_body(r#"{"id":1}"#);
  assert_eq!(json.json_body(), Some(json!({"id": 1})));

  let text = BackendResponse::new(StatusCode::OK).with_body("plain text");
  assert_eq!(text.json_body(), None);
  assert_eq!(BackendResponse::new(StatusCode::NO_CONTENT).json_body(), None);
}
