//! # pgq-pool
//!
//! Generic async resource pool with explicit lifecycle hooks.
//!
//! The pool knows nothing about databases: a [`ResourceFactory`] creates,
//! validates and destroys resources, and the pool decides when to call it.
//! Query executors talk to pools through the [`ResourcePool`] trait, so any
//! pool with the same capabilities can be swapped in.
//!
//! ## Features
//!
//! - Bounded capacity with a fair (FIFO) wait queue
//! - Validation of idle resources before reuse
//! - Idle timeout reaping and a background-maintained minimum size
//! - Acquire timeout (zero means wait forever)
//! - Pending-creation count for orderly shutdown
//! - Separate `drain` (wait for borrowers) and `clear` (destroy idle) steps
//!
//! ## Example
//!
//! ```rust,ignore
//! use pgq_pool::{Pool, PoolConfig};
//!
//! let config = PoolConfig::new()
//!     .min_resources(1)
//!     .max_resources(20)
//!     .idle_timeout(Duration::from_secs(300));
//!
//! let pool = Pool::new(config, factory)?;
//! let resource = pool.get(None).await?;
//! // Use resource...
//! // Resource automatically returned to pool on drop
//!
//! pool.drain().await?;
//! pool.clear().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;

pub use config::PoolConfig;
pub use error::PoolError;
pub use lifecycle::{ResourceFactory, ResourceMetadata, ResourceState};
pub use pool::{Pool, PoolStatus, Pooled, ResourcePool};
