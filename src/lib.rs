//! Client-side sync layer for the Tally list service.
//!
//! Tally keeps a local mirror of server state and reconciles it with the
//! service over HTTP. The pieces:
//!
//! - [`cache`]: an in-memory store of query results addressed by
//!   hierarchical [`cache::QueryKey`]s, with staleness tracking and a
//!   revision channel for change notification.
//! - [`api`]: the [`api::Remote`] trait describing every server operation,
//!   and the HTTP implementation behind it. Failures surface as the closed
//!   [`error::ApiError`] taxonomy, never as raw status codes.
//! - [`sync`]: [`sync::ReadBinding`] (stale-while-revalidate reads with
//!   retry and fetch deduplication) and [`sync::Mutator`] (writes that
//!   reconcile or optimistically pre-apply and roll back).
//! - [`client`]: [`TallyClient`], the facade that wires it all together.
//!
//! Reads never block on the network when a cached value exists: bindings
//! serve what the store has and revalidate behind it. Writes go through the
//! mutator so collection and detail entries stay coherent.

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod sync;

pub use client::TallyClient;
pub use config::Config;
pub use error::ApiError;
