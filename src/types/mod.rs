//! Gateway data model.
//!
//! Producer specifications and their attribute [Expression]s are built once per endpoint
//! configuration. Exchanges, [ProduceResult]s and the [ResultMap] live for one inbound request.

mod backend_exchange;
#[cfg(test)]
mod backend_exchange_test;
mod client_exchange;
mod expression;
#[cfg(test)]
mod expression_test;
mod produce_result;
mod producer_spec;
mod result_map;

pub use backend_exchange::{BackendRequest, BackendResponse};
pub use client_exchange::{ClientRequest, ClientResponse};
pub use expression::{
  BACKEND_REQUEST, BACKEND_REQUESTS, BACKEND_RESPONSE, BACKEND_RESPONSES, Expression, REQUEST,
  TemplatePart, Traversal,
};
pub use produce_result::ProduceResult;
pub use producer_spec::{Attributes, ProducerKind, ProducerSpec, SpecId};
pub use result_map::ResultMap;

/// Name given to a request or proxy declared without a label.
pub const DEFAULT_PRODUCER_NAME: &str = "default";
