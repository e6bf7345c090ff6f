//! Resource lifecycle management.
//!
//! This module defines the factory trait the pool uses to create, validate
//! and destroy resources, plus the bookkeeping the pool keeps per resource.

use std::time::Duration;

use tokio::time::Instant;

/// Lifecycle hooks the pool calls for the resources it manages.
///
/// The pool never inspects a resource itself; it only moves it between the
/// idle queue and its borrowers and calls back into the factory at each
/// lifecycle edge.
///
/// `#[async_trait]` keeps the returned futures `Send`, so pool operations can
/// run inside spawned Tokio tasks.
#[async_trait::async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    /// The pooled resource.
    type Resource: Send + Sync + 'static;

    /// Error reported by `create` and `destroy`.
    type Error: std::fmt::Display + Send + Sync + 'static;

    /// Create a new resource.
    async fn create(&self) -> Result<Self::Resource, Self::Error>;

    /// Check that an idle resource is still usable.
    ///
    /// Returning `false` makes the pool destroy the resource and try the
    /// next one. This is not an error condition.
    async fn validate(&self, resource: &mut Self::Resource) -> bool;

    /// Tear a resource down.
    async fn destroy(&self, resource: Self::Resource) -> Result<(), Self::Error>;
}

/// State of a resource tracked by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Resource is idle and available for use.
    Idle,
    /// Resource is lent out.
    InUse,
}

impl ResourceState {
    /// Check if the resource is available for checkout.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Metadata about a pooled resource.
#[derive(Debug, Clone)]
pub struct ResourceMetadata {
    /// Unique identifier for this resource within its pool.
    pub id: u64,
    /// When the resource was created.
    pub created_at: Instant,
    /// When the resource was last checked out or returned.
    pub last_used_at: Instant,
    /// Number of times the resource has been checked out.
    pub checkout_count: u64,
    /// Current state of the resource.
    pub state: ResourceState,
}

impl ResourceMetadata {
    /// Create metadata for a new resource.
    pub fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            checkout_count: 0,
            state: ResourceState::Idle,
        }
    }

    /// Check if the resource has been idle too long.
    #[must_use]
    pub fn is_idle_expired(&self, idle_timeout: Duration) -> bool {
        self.state.is_available() && self.last_used_at.elapsed() > idle_timeout
    }

    /// Mark the resource as checked out.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
        self.state = ResourceState::InUse;
    }

    /// Mark the resource as returned to idle.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
        self.state = ResourceState::Idle;
    }
}
