//! # streamweave-gateway
//!
//! Endpoint execution engine for an API gateway.
//!
//! ## Architecture
//!
//! An endpoint declares a list of backend calls (requests and proxies) whose attributes are
//! dynamic [types::Expression]s. Calls may read each other's results through
//! `backend_responses.<name>` references.
//!
//! - [compiler::GraphBuilder] scans those references once per endpoint configuration and
//!   compiles the calls into a tree of [nodes::Producer]s: leaves for the calls, sequences for
//!   dependency chains and parallels for independent work. Shared dependencies compile to one
//!   node instance referenced by every consumer.
//! - [endpoint::EndpointDriver] runs the compiled tree once per inbound request against a fresh
//!   [nodes::RequestScope], then assembles the client response (explicit response, redirect or
//!   single pass-through).
//!
//! The [config] module loads a JSON gateway configuration and [server] mounts the compiled
//! endpoints on an axum router.

pub mod backend;
pub mod compiler;
pub mod config;
#[cfg(test)]
mod config_test;
pub mod endpoint;
pub mod error;
#[cfg(test)]
mod error_test;
pub mod eval;
#[cfg(test)]
mod eval_test;
pub mod nodes;
pub mod server;
#[cfg(test)]
mod test_support;
pub mod types;

pub use backend::{Backend, BackendConfig, HttpBackend};
pub use compiler::{CompiledGraph, GraphBuilder};
pub use config::GatewayConfig;
pub use endpoint::{
  EndpointDriver, EndpointOptions, RedirectSpec, RequestModifiers, ResponseModifiers, ResponseSpec,
};
pub use error::{ConfigError, EndpointError, EvalError, ProduceError};
pub use eval::{DefaultEvaluator, EvalContext, Evaluator};
pub use nodes::{Producer, RequestScope};
pub use types::{
  Attributes, ClientRequest, ClientResponse, Expression, ProduceResult, ProducerKind, ProducerSpec,
  ResultMap, SpecId,
};
