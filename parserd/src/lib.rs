//! Coordination core of the rteval submission-queue parser daemon.
//!
//! A single producer drains the Postgres submission queue, hands each claimed
//! submission to a bounded in-memory job queue, and a fixed pool of worker
//! threads transforms the submitted XML payloads into persisted reports plus
//! structured database rows. The library is built around a few injectable
//! seams: the database gateway ([`gateway::DbGateway`]) and the report
//! transformation ([`transform::ReportTransform`]) are capabilities provided
//! at construction, which keeps the coordination logic testable without a
//! database or a stylesheet engine.
//!
//! Concurrency model: plain OS threads. The producer runs on the caller's
//! thread; workers are spawned threads, each exclusively owning its database
//! session. All suspension happens in OS primitives (condition variables,
//! socket reads, sleeps), and cooperative shutdown flows from a single
//! monotonic flag ([`shutdown`]).

pub mod arbiter;
pub mod error;
pub mod gateway;
pub mod pipeline;
pub mod producer;
pub mod queue;
pub mod shutdown;
pub mod test_utils;
pub mod transform;
pub mod types;
pub mod workers;
