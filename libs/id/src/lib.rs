//! # qsched-id
//!
//! Typed identifiers for the qscheduler gateway.
//!
//! ## Two Kinds of Identifier
//!
//! - **Keys** are chosen by callers (scheduler pools, bots, task requests).
//!   The gateway never interprets them; it only checks that they are
//!   well-formed and keeps them from being mixed up with each other.
//! - **Generated IDs** are minted by the gateway itself, currently only
//!   `CallId`, which tags every RPC in the logs. They use the `{prefix}_{ulid}`
//!   format so they sort by creation time.
//!
//! Examples:
//! - `SchedulerId`: `pool-linux-x86`
//! - `RequestId`: `4e2a9c81f0d3b710`
//! - `CallId`: `call_01HV4Z2WQXKJNM8GPQY6VBKC3D`

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
