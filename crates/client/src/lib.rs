//! Client side of a staged transformation service.
//!
//! Submits one input per job over HTTP, follows the job's server-sent
//! progress stream, and reconciles the two channels into a single
//! sequence of stage updates ending in one outcome.
//!
//! * [`stream`] / [`session`] / [`transport`] - progress stream client and
//!   its disconnect-aware state machine.
//! * [`api`] - result-bearing request and discovery endpoints.
//! * [`coordinator`] - runs a job end to end.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod session;
pub mod stream;
pub mod transport;
