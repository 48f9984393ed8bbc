//! Tests for expression evaluation and the attribute helpers.

use crate::error::EvalError;
use crate::eval::{
  DefaultEvaluator, EvalContext, Evaluator, HeaderOps, QueryOps, form_encode, form_params_mismatch,
  replace_path, request_path, value_to_status_list,
};
use crate::types::{
  BackendRequest, BackendResponse, ClientRequest, Expression, ProduceResult, ResultMap,
};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use serde_json::{Value, json};
use std::sync::Arc;

fn client() -> ClientRequest {
  ClientRequest::new(Method::POST, Uri::from_static("/orders?id=7&id=8"))
    .with_header("x-trace", "abc")
    .with_body(r#"{"item":"book"}"#)
}

fn published(name: &str, status: u16, body: &str) -> Arc<ProduceResult> {
  Arc::new(ProduceResult::success(
    name,
    Arc::new(BackendRequest::new(Method::GET, "/items?page=2")),
    Arc::new(BackendResponse::new(StatusCode::from_u16(status).unwrap()).with_body(body.to_string())),
  ))
}

fn eval(source: Value, ctx: &EvalContext) -> Result<Value, EvalError> {
  DefaultEvaluator.evaluate(&Expression::from_json(&source).unwrap(), ctx)
}

#[test]
fn request_variables() {
  let ctx = EvalContext::build(&client(), &ResultMap::default(), None);
  assert_eq!(eval(json!("${request.method}"), &ctx).unwrap(), json!("POST"));
  assert_eq!(eval(json!("${request.path}"), &ctx).unwrap(), json!("/orders"));
  assert_eq!(
    eval(json!("${request.query.id}"), &ctx).unwrap(),
    json!(["7", "8"])
  );
  assert_eq!(
    eval(json!("${request.headers.x-trace}"), &ctx).unwrap(),
    json!("abc")
  );
  assert_eq!(
    eval(json!("${request.json_body.item}"), &ctx).unwrap(),
    json!("book")
  );
}

#[test]
fn backend_responses_keep_json_types() {
  let results = ResultMap::new(["r1", "default"]);
  results.publish(published("r1", 201, r#"{"id":1,"tags":["a"]}"#));
  let ctx = EvalContext::build(&client(), &results, None);

  assert_eq!(
    eval(json!("${backend_responses.r1.json_body}"), &ctx).unwrap(),
    json!({"id": 1, "tags": ["a"]})
  );
  assert_eq!(
    eval(json!("${backend_responses.r1.status}"), &ctx).unwrap(),
    json!(201)
  );
  assert_eq!(
    eval(json!("${backend_responses.r1.json_body.tags.0}"), &ctx).unwrap(),
    json!("a")
  );
  assert_eq!(
    eval(json!("${backend_requests.r1.query.page}"), &ctx).unwrap(),
    json!(["2"])
  );
}

#[test]
fn missing_nested_key_is_null_but_unknown_root_fails() {
  let ctx = EvalContext::build(&client(), &ResultMap::default(), None);
  assert_eq!(
    eval(json!("${backend_responses.nope.json_body}"), &ctx).unwrap(),
    Value::Null
  );
  assert_eq!(
    eval(json!("${nothing.here}"), &ctx),
    Err(EvalError::UnknownVariable("nothing".into()))
  );
}

#[test]
fn alias_prefers_current_result() {
  let results = ResultMap::new(["default", "other"]);
  results.publish(published("default", 200, r#"{"who":"default"}"#));
  let current = published("other", 202, r#"{"who":"other"}"#);

  let ctx = EvalContext::build(&client(), &results, None);
  assert_eq!(
    eval(json!("${backend_response.json_body.who}"), &ctx).unwrap(),
    json!("default")
  );

  let ctx = EvalContext::build(&client(), &results, Some(&current));
  assert_eq!(
    eval(json!("${backend_response.status}"), &ctx).unwrap(),
    json!(202)
  );
}

#[test]
fn templates_render_strings() {
  let results = ResultMap::new(["r1"]);
  results.publish(published("r1", 200, r#"{"id":42}"#));
  let ctx = EvalContext::build(&client(), &results, None);
  assert_eq!(
    eval(json!("/users/${backend_responses.r1.json_body.id}?missing=${request.query.x}"), &ctx).unwrap(),
    json!("/users/42?missing=")
  );
  assert_eq!(
    eval(json!({"a": ["${backend_responses.r1.status}", 1]}), &ctx).unwrap(),
    json!({"a": [200, 1]})
  );
}

#[test]
fn header_ops_remove_set_add() {
  let mut headers = HeaderMap::new();
  headers.insert("x-old", "1".parse().unwrap());
  headers.insert("x-keep", "1".parse().unwrap());
  headers.insert("x-set", "before".parse().unwrap());

  let remove = json!(["x-old"]);
  let set = json!({"x-set": "after"});
  let add = json!({"x-keep": ["2", "3"]});
  HeaderOps {
    remove: Some(&remove),
    set: Some(&set),
    add: Some(&add),
  }
  .apply(&mut headers)
  .unwrap();

  assert!(headers.get("x-old").is_none());
  assert_eq!(headers.get("x-set").unwrap(), "after");
  let keep: Vec<_> = headers.get_all("x-keep").iter().collect();
  assert_eq!(keep.len(), 3);
}

#[test]
fn header_ops_reject_invalid_names() {
  let set = json!({"bad header": "x"});
  let err = HeaderOps {
    set: Some(&set),
    ..Default::default()
  }
  .apply(&mut HeaderMap::new())
  .unwrap_err();
  assert!(matches!(err, EvalError::InvalidHeader(_)));
}

#[test]
fn query_ops_rewrite_url() {
  let remove = json!("drop");
  let set = json!({"a": "9"});
  let add = json!({"b": ["x y"]});
  let url = QueryOps {
    remove: Some(&remove),
    set: Some(&set),
    add: Some(&add),
  }
  .apply("/path?a=1&drop=2&c=3#frag")
  .unwrap();
  assert_eq!(url, "/path?a=9&c=3&b=x+y#frag");
}

#[test]
fn query_ops_without_ops_keep_url() {
  assert_eq!(QueryOps::default().apply("/p?q=%2F").unwrap(), "/p?q=%2F");
}

#[test]
fn form_ops_rewrite_body() {
  let remove = json!(["csrf"]);
  let set = json!({"user": "ada"});
  let add = json!({"tag": ["a", "b c"]});
  let body = QueryOps {
    remove: Some(&remove),
    set: Some(&set),
    add: Some(&add),
  }
  .apply_form(b"user=bob&csrf=x&keep=1")
  .unwrap();
  assert_eq!(body, "user=ada&keep=1&tag=a&tag=b+c");
}

#[test]
fn form_params_need_urlencoded_post() {
  let mut headers = HeaderMap::new();
  headers.insert(
    "content-type",
    "application/x-www-form-urlencoded; charset=utf-8".parse().unwrap(),
  );
  assert_eq!(form_params_mismatch(&Method::POST, &headers), None);
  assert!(
    form_params_mismatch(&Method::PUT, &headers)
      .unwrap()
      .starts_with("method mismatch")
  );

  headers.insert("content-type", "application/json".parse().unwrap());
  assert!(
    form_params_mismatch(&Method::POST, &headers)
      .unwrap()
      .starts_with("content-type mismatch")
  );
}

#[test]
fn request_paths() {
  assert_eq!(request_path(&json!("/a/b")).unwrap(), Some("/a/b".to_string()));
  assert_eq!(request_path(&json!("a")).unwrap(), Some("/a".to_string()));
  assert_eq!(request_path(&json!("")).unwrap(), None);
  assert_eq!(request_path(&Value::Null).unwrap(), None);
  for invalid in ["/a?b=1", "/a#top"] {
    assert!(
      matches!(request_path(&json!(invalid)), Err(EvalError::InvalidPath(ref p)) if p == invalid),
      "{invalid:?} should be rejected"
    );
  }

  assert_eq!(replace_path("/old?x=1", "/new"), "/new?x=1");
  assert_eq!(replace_path("/old", "/new"), "/new");
}

#[test]
fn status_lists() {
  assert_eq!(value_to_status_list(&json!([200, "204"])).unwrap(), vec![200, 204]);
  assert_eq!(value_to_status_list(&json!(404)).unwrap(), vec![404]);
  assert!(value_to_status_list(&Value::Null).unwrap().is_empty());
  assert!(value_to_status_list(&json!(["ok"])).is_err());
}

#[test]
fn form_encoding() {
  assert_eq!(
    form_encode(&json!({"a": "1", "b": ["2", "3 4"]})).unwrap(),
    "a=1&b=2&b=3+4"
  );
}
