//! Access-control decision engine.
//!
//! A model ([`model`]) says what a request and a rule look like and how they
//! are matched; the store ([`store`]) holds rules and role assignments; the
//! [`Enforcer`] evaluates requests against both.

pub mod adapter;
pub mod enforcer;
pub mod engine;
pub mod errors;
pub mod functions;
pub mod matcher;
pub mod model;
pub mod roles;
pub mod store;
pub mod web;

pub use adapter::{Adapter, FileAdapter, MemoryAdapter, PolicyLine};
pub use enforcer::{Enforcer, EnforcerBuilder};
pub use engine::Decision;
pub use errors::{AuthzError, ErrorKind};
pub use functions::{MatchOptions, PatternMode};
pub use model::{CompiledModel, Effect};
