//! nodebridge gateway: pairing registry, bridge sessions, invocation router
//! and the RPC/REST surface in front of them.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod nodes;
pub mod state;
