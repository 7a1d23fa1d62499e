//! Stratus Core
//!
//! Plugin framework shared by Stratus cloud providers: the resource and
//! state model, attribute schemas, change detection and the generic
//! state-change waiter used to await asynchronous cloud operations.

pub mod differ;
pub mod duration;
pub mod logging;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod waiter;
