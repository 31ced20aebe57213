//! Typed client for the incident-management directory REST API.
//!
//! This crate wraps the service's HTTP+JSON API (v2 semantics, bearer-token
//! authenticated) behind the [`DirectoryApi`] trait: users, teams, schedules,
//! escalation policies, on-calls, and incidents. It is pure request/response —
//! orchestration lives in the `lifecycle` crate.
//!
//! # Usage
//!
//! ```no_run
//! use directory::{DirectoryClient, DirectoryConfig, DirectoryApi};
//!
//! # async fn example() -> Result<(), directory::DirectoryError> {
//! let client = DirectoryClient::new("api-token", DirectoryConfig::default())?;
//!
//! if let Some(user) = client.get_user_by_email("alice@example.com").await? {
//!     let incidents = client.list_open_incidents_for_user(&user.id).await?;
//!     println!("{} open incidents", incidents.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Error handling
//!
//! Every call surfaces a machine-readable [`DirectoryError`] kind carrying the
//! HTTP status. Transient failures (`429`, `5xx`, timeouts) are retried with
//! exponential backoff per [`RetryConfig`]; auth failures are never retried.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod client;
pub mod error;
pub mod models;
pub mod retry;

pub use api::DirectoryApi;
pub use client::{DirectoryClient, DirectoryConfig};
pub use error::{DirectoryError, DirectoryResult};
pub use models::{
    Assignment, EscalationPolicy, EscalationRule, Incident, IncidentStatus, LayerUser, Oncall,
    Reference, Schedule, ScheduleLayer, Service, Team, User, UserRole,
};
pub use retry::RetryConfig;
