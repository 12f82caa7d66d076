//! Cloud provider capability for the nodepool reconciler.
//!
//! This crate provides the [`CloudProvider`] trait the reconciler drives and
//! the [`HcloudClient`] implementation for the Hetzner Cloud API. It covers:
//!
//! - Instance creation and deletion, each returning a [`PendingAction`]
//! - Label-filtered instance listing
//! - Instance-type catalog lookups
//! - Action watching as a stream of [`ActionEvent`]s
//!
//! # Testing
//!
//! Enable the `test-utils` feature to use the in-memory mock:
//!
//! ```ignore
//! use nodepool_provider::{CloudProvider, MockBehavior, MockProvider};
//!
//! let provider = MockProvider::new()
//!     .with_instance_type(MockProvider::instance_type("cx22", 2, 4.0, &["fsn1"]));
//! provider.script_creates([MockBehavior::FailAction]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod config;
pub mod error;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use client::{CloudProvider, HcloudClient, ACTION_EVENT_BUFFER};
pub use config::HcloudConfig;
pub use error::{ProviderError, Result};
pub use types::{
    ActionError, ActionEvent, Architecture, CreateInstanceRequest, CreatedInstance, Instance,
    InstanceStatus, InstanceTypeSpec, PendingAction, Pricing, POOL_LABEL,
};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockBehavior, MockProvider, ProviderCall};
