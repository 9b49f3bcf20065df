//! # lockbox-sync
//!
//! Publishes cycle artifacts to a remote git repository.
//!
//! Build a [`Reconciler`] over a [`GitCli`] store and call
//! [`Reconciler::publish_cycle`] once per finished cycle. Failures never
//! escape as errors; they come back classified inside the
//! [`PublishResult`](lockbox_core::PublishResult).

pub mod error;
pub mod git;
pub mod message;
pub mod reconciler;

pub use error::SyncError;
pub use git::{authenticated_url, redact_credentials, GitCli, RemoteStore};
pub use message::{CommitMessage, MessageContext};
pub use reconciler::{is_configuration_failure, Publisher, Reconciler};
