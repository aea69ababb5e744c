//! crates/pawtrack_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the document store, the device location stream and the
//! purchase SDK.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::{Family, GeoPoint, InviteToken, Member, PlanStatus, Walk};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, GPS).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Item already exists: {0}")]
    AlreadyExists(String),
    /// Optimistic-concurrency contention. Safe to retry.
    #[error("Concurrent modification: {0}")]
    Conflict(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Clock
//=========================================================================================

/// Source of "now". Injected so that expiry and elapsed-time logic is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

pub type PointStream = Pin<Box<dyn Stream<Item = GeoPoint> + Send>>;

/// A live subscription to the device location stream.
pub struct LocationSubscription {
    pub id: Uuid,
    pub points: PointStream,
}

#[async_trait]
pub trait LocationService: Send + Sync {
    /// Acquires the location stream. Fails with `Unavailable` when permission
    /// or the underlying provider cannot be obtained.
    async fn start(&self) -> PortResult<LocationSubscription>;

    /// Unsubscribes. No point is delivered on the subscription's stream after this returns.
    async fn stop(&self, subscription_id: Uuid) -> PortResult<()>;
}

#[async_trait]
pub trait WalkRepository: Send + Sync {
    async fn save_walk(&self, walk: &Walk) -> PortResult<()>;

    /// Walks of a family whose start time lies in `[start, end]`, oldest first.
    async fn list_walks_by_date_range(
        &self,
        family_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<Vec<Walk>>;

    async fn get_walk(&self, walk_id: Uuid) -> PortResult<Walk>;

    async fn delete_walk(&self, walk_id: Uuid) -> PortResult<()>;

    async fn delete_walks_by_user(&self, user_id: Uuid, family_id: Uuid) -> PortResult<()>;
}

#[async_trait]
pub trait FamilyStore: Send + Sync {
    // --- Families ---
    /// Persists a new family together with its owner's member record, atomically.
    async fn create_family(&self, family: &Family, owner: &Member) -> PortResult<()>;

    async fn get_family(&self, family_id: Uuid) -> PortResult<Family>;

    async fn update_plan_status(&self, family_id: Uuid, status: PlanStatus) -> PortResult<()>;

    async fn delete_family(&self, family_id: Uuid) -> PortResult<()>;

    // --- Members ---
    async fn get_member(&self, user_id: Uuid) -> PortResult<Member>;

    async fn list_members(&self, family_id: Uuid) -> PortResult<Vec<Member>>;

    async fn count_members(&self, family_id: Uuid) -> PortResult<usize>;

    async fn delete_member(&self, user_id: Uuid) -> PortResult<()>;

    // --- Invites ---
    /// Fails with `AlreadyExists` if the token is taken. Never overwrites.
    async fn insert_invite(&self, invite: &InviteToken) -> PortResult<()>;

    async fn get_invite(&self, token: &str) -> PortResult<InviteToken>;

    async fn delete_invites_for_family(&self, family_id: Uuid) -> PortResult<()>;

    /// Consumes an invite and writes the member in one atomic transaction.
    ///
    /// Every precondition of the acceptance is re-read inside the transaction, in
    /// this order: the invite is still active, the user's membership is still
    /// `prior_family`, and the target family has room. The first one that fails is
    /// returned and nothing is written. Transient contention is reported as `Conflict`.
    async fn commit_invite_acceptance(
        &self,
        acceptance: &InviteAcceptance,
    ) -> PortResult<AcceptanceCommit>;
}

/// An invite acceptance decided on a snapshot, to be re-checked by the commit.
#[derive(Debug, Clone, PartialEq)]
pub struct InviteAcceptance {
    pub token: String,
    /// The member record to write. Its `family_id` is the family being joined.
    pub member: Member,
    /// The user's family at the time of the decision; `None` if they had none.
    pub prior_family: Option<Uuid>,
    /// The user must still be the only member of `prior_family`.
    pub require_sole_member: bool,
}

/// How a guarded acceptance commit ended. Only `Committed` writes anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptanceCommit {
    Committed,
    /// The invite is missing or already consumed.
    InviteInactive,
    /// The user's membership no longer matches `prior_family`, or the prior
    /// family gained members.
    MembershipChanged,
    FamilyFull,
}

#[async_trait]
pub trait EntitlementService: Send + Sync {
    /// Whether the user currently holds a paid subscription.
    async fn has_active_entitlement(&self, user_id: Uuid) -> PortResult<bool>;
}
