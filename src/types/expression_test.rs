//! Tests for `Expression` parsing.

use super::{Expression, TemplatePart, Traversal};
use serde_json::json;

#[test]
fn plain_string_is_literal() {
  let e = Expression::parse("/api/v1").unwrap();
  assert_eq!(e, Expression::literal("/api/v1"));
  assert!(e.traversals().is_empty());
}

#[test]
fn single_interpolation_is_reference() {
  let e = Expression::parse("${backend_responses.r1.json_body}").unwrap();
  match &e {
    Expression::Reference(t) => {
      assert_eq!(t.root(), "backend_responses");
      assert_eq!(t.referenced_producer(), Some("r1"));
      assert_eq!(t.to_string(), "backend_responses.r1.json_body");
    }
    other => panic!("expected reference, got {other:?}"),
  }
}

#[test]
fn mixed_string_is_template() {
  let e = Expression::parse("/users/${request.query.id}/profile").unwrap();
  match e {
    Expression::Template(parts) => {
      assert_eq!(parts.len(), 3);
      assert_eq!(parts[0], TemplatePart::Text("/users/".into()));
      assert!(matches!(&parts[1], TemplatePart::Reference(t) if t.root() == "request"));
      assert_eq!(parts[2], TemplatePart::Text("/profile".into()));
    }
    other => panic!("expected template, got {other:?}"),
  }
}

#[test]
fn nested_json_collects_traversals_in_order() {
  let e = Expression::from_json(&json!([
    "${backend_responses.a.json_body}",
    {"x": "id=${backend_responses.b.status}", "n": 3}
  ]))
  .unwrap();
  let names: Vec<_> = e
    .traversals()
    .into_iter()
    .filter_map(Traversal::referenced_producer)
    .collect();
  assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn non_string_values_are_literals() {
  assert_eq!(
    Expression::from_json(&json!(200)).unwrap(),
    Expression::literal(200)
  );
  assert_eq!(
    Expression::from_json(&json!(true)).unwrap(),
    Expression::literal(true)
  );
}

#[test]
fn singular_alias_references_no_producer() {
  let e = Expression::parse("${backend_response.status}").unwrap();
  let t = e.traversals()[0];
  assert!(t.is_alias());
  assert_eq!(t.referenced_producer(), None);
}

#[test]
fn request_variables_reference_no_producer() {
  let e = Expression::parse("${request.headers.x-id}").unwrap();
  assert_eq!(e.traversals()[0].referenced_producer(), None);
}

#[test]
fn invalid_paths_are_rejected() {
  assert!(Expression::parse("${}").is_err());
  assert!(Expression::parse("x ${a..b}").is_err());
}
