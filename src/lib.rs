//! HAIP - Human-Agent Interaction Protocol engine
//!
//! This library implements the server and client engine of HAIP v1.1.2: a
//! session-oriented, channel-multiplexed, credit-flow-controlled protocol
//! for streaming structured messages between a user-facing client and an
//! agent backend across three interchangeable transports.
//!
//! # Architecture
//!
//! - `envelope`: the wire message type, channel/event-type enums, codec
//! - `sequence`: outbound sequencing and inbound gap/duplicate tracking
//! - `replay`: the outbound replay window used for gap recovery and resume
//! - `flow`: per-channel credit pools and pause/resume flow control
//! - `run`: run lifecycle state machine
//! - `tool`: tool-call lifecycle state machine and registry
//! - `session`: session identity, handshake, and the session table
//! - `auth`: the credential validation contract
//! - `transport`: the three wire transport adapters
//! - `engine`: the protocol engine wiring transport, session, and components
//! - `server`: the axum-based server façade
//! - `client`: the client façade
//! - `config`: configuration loading and validation
//! - `error`: the error taxonomy and result alias
//! - `cli`: command-line interface definition

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod flow;
pub mod replay;
pub mod run;
pub mod sequence;
pub mod server;
pub mod session;
pub mod tool;
pub mod transport;

pub use config::Config;
pub use error::{HaipError, Result};
