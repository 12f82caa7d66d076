//! Core types for the nodepool reconciler.
//!
//! This crate provides the identifiers shared by the provider and scaler
//! crates:
//!
//! - **Identifiers**: [`PoolId`] for node pools and [`InstanceId`] for
//!   provider instances
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use nodepool_core::{InstanceId, PoolId};
//!
//! let pool = PoolId::new("workers").unwrap();
//! assert_eq!(pool.as_str(), "workers");
//!
//! let id = InstanceId::from_provider_id("hcloud://42").unwrap();
//! assert_eq!(id.provider_id(), "hcloud://42");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;

pub use error::{CoreError, Result};
pub use ids::{IdError, InstanceId, PoolId, PROVIDER_ID_PREFIX};
