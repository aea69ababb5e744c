//! crates/pawtrack_core/src/family.rs
//!
//! Family creation, subscription-gated app access and account deletion.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::{Family, Member, PlanStatus, Role};
use crate::nickname::{validate_nickname, NicknameError};
use crate::ports::{Clock, EntitlementService, FamilyStore, PortError, WalkRepository};

/// Length of the free trial that starts when a family is created.
pub const TRIAL_DAYS: i64 = 7;

/// Owner included.
pub const MEMBER_LIMIT: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum FamilyError {
    #[error("store error: {0}")]
    Store(#[from] PortError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreateFamilyOutcome {
    Created { family: Family, owner: Member },
    AlreadyInFamily,
    InvalidNickname(NicknameError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountDeletion {
    Deleted,
    UserNotFound,
    OwnerHasMembers,
}

/// What the app lets a user do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppAccess {
    pub read_only: bool,
    pub trial_in_use: bool,
}

impl AppAccess {
    pub const READ_ONLY: AppAccess = AppAccess {
        read_only: true,
        trial_in_use: false,
    };
}

/// An entitlement always grants full access. Without one, access is full only
/// while the trial is running.
pub fn evaluate_access(family: &Family, has_entitlement: bool, now: DateTime<Utc>) -> AppAccess {
    if has_entitlement {
        return AppAccess {
            read_only: false,
            trial_in_use: false,
        };
    }
    let in_trial = family.trial_ends_at > now;
    AppAccess {
        read_only: !in_trial,
        trial_in_use: in_trial,
    }
}

pub struct FamilyService {
    store: Arc<dyn FamilyStore>,
    walks: Arc<dyn WalkRepository>,
    entitlements: Arc<dyn EntitlementService>,
    clock: Arc<dyn Clock>,
}

impl FamilyService {
    pub fn new(
        store: Arc<dyn FamilyStore>,
        walks: Arc<dyn WalkRepository>,
        entitlements: Arc<dyn EntitlementService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            walks,
            entitlements,
            clock,
        }
    }

    /// The caller's membership, or `None` when they belong to no family.
    pub async fn membership(&self, user_id: Uuid) -> Result<Option<Member>, FamilyError> {
        match self.store.get_member(user_id).await {
            Ok(member) => Ok(Some(member)),
            Err(PortError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Starts a new family with `owner_id` as its owner and a fresh trial.
    pub async fn create_family(
        &self,
        owner_id: Uuid,
        nickname: &str,
    ) -> Result<CreateFamilyOutcome, FamilyError> {
        let nickname = match validate_nickname(nickname) {
            Ok(nickname) => nickname,
            Err(e) => return Ok(CreateFamilyOutcome::InvalidNickname(e)),
        };
        if self.membership(owner_id).await?.is_some() {
            return Ok(CreateFamilyOutcome::AlreadyInFamily);
        }

        let now = self.clock.now();
        let family = Family {
            id: Uuid::new_v4(),
            owner_id,
            created_at: now,
            plan_status: PlanStatus::Active,
            trial_ends_at: now + Duration::days(TRIAL_DAYS),
            member_limit: MEMBER_LIMIT,
        };
        let owner = Member {
            user_id: owner_id,
            family_id: family.id,
            role: Role::Owner,
            nickname: nickname.to_string(),
            created_at: now,
        };

        match self.store.create_family(&family, &owner).await {
            Ok(()) => {}
            // Lost a race with another create or an invite acceptance.
            Err(PortError::AlreadyExists(_)) => return Ok(CreateFamilyOutcome::AlreadyInFamily),
            Err(e) => return Err(e.into()),
        }
        info!(family_id = %family.id, owner_id = %owner_id, "Family created");
        Ok(CreateFamilyOutcome::Created { family, owner })
    }

    /// Users without a family are read-only.
    pub async fn access_for(&self, user_id: Uuid) -> Result<AppAccess, FamilyError> {
        let Some(member) = self.membership(user_id).await? else {
            return Ok(AppAccess::READ_ONLY);
        };
        let family = match self.store.get_family(member.family_id).await {
            Ok(family) => family,
            Err(PortError::NotFound(_)) => return Ok(AppAccess::READ_ONLY),
            Err(e) => return Err(e.into()),
        };
        let has_entitlement = self.entitlements.has_active_entitlement(user_id).await?;
        Ok(evaluate_access(&family, has_entitlement, self.clock.now()))
    }

    pub async fn update_plan_status(
        &self,
        family_id: Uuid,
        status: PlanStatus,
    ) -> Result<(), FamilyError> {
        self.store.update_plan_status(family_id, status).await?;
        info!(family_id = %family_id, status = status.as_str(), "Plan status updated");
        Ok(())
    }

    /// Removes the user's walks and membership. An owner also takes the family
    /// and its invites along, which is only allowed once nobody else is left.
    ///
    /// The steps are separate store calls, each idempotent, and the membership is
    /// removed last. A failure part way leaves the user a member with some data
    /// already gone, and calling again finishes the deletion.
    pub async fn delete_account(&self, user_id: Uuid) -> Result<AccountDeletion, FamilyError> {
        let Some(member) = self.membership(user_id).await? else {
            return Ok(AccountDeletion::UserNotFound);
        };

        if member.role == Role::Owner && self.store.count_members(member.family_id).await? > 1 {
            return Ok(AccountDeletion::OwnerHasMembers);
        }

        self.walks
            .delete_walks_by_user(user_id, member.family_id)
            .await?;
        if member.role == Role::Owner {
            self.store.delete_invites_for_family(member.family_id).await?;
            self.store.delete_family(member.family_id).await?;
            info!(family_id = %member.family_id, "Family deleted with its owner");
        }
        self.store.delete_member(user_id).await?;
        info!(user_id = %user_id, role = member.role.as_str(), "Account deleted");
        Ok(AccountDeletion::Deleted)
    }
}
