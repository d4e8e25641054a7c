//! Gatehouse - access-control policy decision engine
//!
//! This library provides the decision engine (model compiler, policy store,
//! role graph, matcher evaluation and the enforcer façade) together with the
//! HTTP enforcement middleware and management API built on it.

pub mod authz;
pub mod middleware;
pub mod settings;
pub mod web;
