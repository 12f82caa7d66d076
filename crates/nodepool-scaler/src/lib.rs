//! Node-pool scaling reconciler for Hetzner Cloud.
//!
//! This crate keeps groups of cloud instances ("node pools") at the size a
//! cluster autoscaler asks for. It handles:
//!
//! - Growing a pool with parallel instance creations
//! - Shrinking a pool with parallel deletions of named nodes
//! - Correcting each pool's target size after partial failures
//! - Building the simulated node a new pool instance would become
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Autoscaler / HTTP callers                        │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         PoolScaler                               │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────────┐   │
//! │  │    Grow     │ │   Shrink    │ │   DecreaseTargetSize    │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────────────┘   │
//! │         │               │                                       │
//! │   ┌─────┴──────┬────────┴────────┬──────────────┐              │
//! │   ▼            ▼                 ▼              ▼              │
//! │ ┌──────────┐ ┌──────────────┐ ┌────────────┐ ┌──────────┐     │
//! │ │  Pool    │ │  Instance    │ │  Action    │ │ Template │     │
//! │ │ Registry │ │  Directory   │ │  Waiter    │ │          │     │
//! │ └──────────┘ └──────────────┘ └────────────┘ └──────────┘     │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 CloudProvider (Hetzner Cloud API)                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use nodepool_core::PoolId;
//! use nodepool_provider::{HcloudClient, HcloudConfig};
//! use nodepool_scaler::{ClusterConfig, PoolScaler, ScalerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HcloudClient::new(HcloudConfig::from_env()?)?;
//! let cluster = ClusterConfig::from_pool_list("1:10:cx22:fsn1:workers")?;
//! let scaler = PoolScaler::new(Arc::new(client), cluster, ScalerConfig::default())?;
//! scaler.refresh_target_sizes().await?;
//!
//! let pool = PoolId::new("workers")?;
//! scaler.grow(&pool, 2).await?;
//! println!("workers: {}", scaler.current_size(&pool)?);
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! Enable the `test-utils` feature to drive the scaler with the in-memory
//! `MockProvider` from `nodepool-provider`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bootstrap;
pub mod cache;
pub mod error;
pub mod registry;
pub mod scaler;
pub mod template;
pub mod types;
pub mod waiter;

pub use bootstrap::{KubeEnv, MetadataItem};
pub use cache::InstanceDirectory;
pub use error::{Result, ScalerError};
pub use registry::{Pool, PoolRegistry};
pub use scaler::PoolScaler;
pub use types::{ClusterConfig, InstanceInfo, LockScope, NodeRef, PoolSpec, ScalerConfig};
pub use waiter::ActionOutcome;
