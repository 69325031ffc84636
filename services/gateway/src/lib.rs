//! qscheduler gateway library.
//!
//! The crate ships the `qscheduler-gateway` binary, and exposes the gateway
//! as a library so it can be embedded with other collaborators and tested
//! end to end.
//!
//! Request flow for mutations:
//!
//! ```text
//! gRPC ─► Gateway ─► AdmissionLimiter ─► SchedulerRegistry ─► BatchActor
//!                                                                  │
//!                                                                  ▼
//!                                                      NodeStore / Scheduler
//! ```
//!
//! Reads go from the [`Gateway`](gateway::Gateway) to the
//! [`ReadPath`](read::ReadPath), which loads a snapshot of its own.

pub mod admission;
pub mod batch;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod gateway;
pub mod grpc;
pub mod model;
pub mod read;
pub mod registry;
