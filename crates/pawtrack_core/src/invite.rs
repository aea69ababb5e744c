//! crates/pawtrack_core/src/invite.rs
//!
//! Issues, validates and consumes single-use family invites.
//!
//! Expected outcomes (unknown token, used token, already in a family, ...) are
//! returned on the `Ok` side as typed verdicts. `InviteError` is reserved for
//! collaborator failures.

use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{InviteToken, Member, Role};
use crate::nickname::{validate_nickname, NicknameError};
use crate::ports::{AcceptanceCommit, Clock, FamilyStore, InviteAcceptance, PortError};

/// Invites are valid for 24 hours after creation.
pub const INVITE_TTL_HOURS: i64 = 24;

/// Attempts made on the acceptance transaction before giving up on contention.
pub const ACCEPT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum InviteError {
    #[error("invite token collision")]
    TokenCollision,

    #[error("user {user_id} is not the owner of family {family_id}")]
    NotFamilyOwner { user_id: Uuid, family_id: Uuid },

    #[error("invite acceptance gave up after {attempts} conflicting attempts")]
    TransactionConflict { attempts: u32 },

    #[error("store error: {0}")]
    Store(#[from] PortError),
}

/// Which existing memberships stop a user from joining another family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinPolicy {
    /// Any existing membership blocks joining.
    #[default]
    Strict,
    /// A user blocks only while their current family has other members, so the
    /// sole member of a family (typically a fresh owner) may move.
    SoleMember,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteVerdict {
    NotFound,
    Inactive,
    Expired,
    Valid { family_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinEligibility {
    Allowed,
    AlreadyInFamily,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptRejection {
    NotFound,
    Inactive,
    Expired,
    AlreadyInFamily,
    FamilyFull,
    Nickname(NicknameError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcceptOutcome {
    Joined(Member),
    Rejected(AcceptRejection),
}

pub struct InviteService {
    store: Arc<dyn FamilyStore>,
    clock: Arc<dyn Clock>,
    policy: JoinPolicy,
}

impl InviteService {
    pub fn new(store: Arc<dyn FamilyStore>, clock: Arc<dyn Clock>, policy: JoinPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Issues a fresh invite for `family_id`. Only the family's owner may do this.
    pub async fn create_invite(
        &self,
        family_id: Uuid,
        created_by: Uuid,
    ) -> Result<InviteToken, InviteError> {
        let creator = match self.store.get_member(created_by).await {
            Ok(member) => Some(member),
            Err(PortError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let is_owner = creator
            .map(|m| m.family_id == family_id && m.role == Role::Owner)
            .unwrap_or(false);
        if !is_owner {
            return Err(InviteError::NotFamilyOwner {
                user_id: created_by,
                family_id,
            });
        }

        let now = self.clock.now();
        let invite = InviteToken {
            token: new_token(),
            family_id,
            created_by,
            created_at: now,
            expires_at: now + Duration::hours(INVITE_TTL_HOURS),
            is_active: true,
        };

        match self.store.insert_invite(&invite).await {
            Ok(()) => {
                info!(family_id = %family_id, "Invite created");
                Ok(invite)
            }
            Err(PortError::AlreadyExists(_)) => Err(InviteError::TokenCollision),
            Err(e) => Err(e.into()),
        }
    }

    /// Checks, in order: existence, `is_active`, expiry.
    ///
    /// A used token that has also expired reports `Inactive`.
    pub async fn verify_invite(&self, token: &str) -> Result<InviteVerdict, InviteError> {
        let invite = match self.store.get_invite(token).await {
            Ok(invite) => invite,
            Err(PortError::NotFound(_)) => return Ok(InviteVerdict::NotFound),
            Err(e) => return Err(e.into()),
        };

        if !invite.is_active {
            return Ok(InviteVerdict::Inactive);
        }
        if invite.is_expired_at(self.clock.now()) {
            return Ok(InviteVerdict::Expired);
        }
        Ok(InviteVerdict::Valid {
            family_id: invite.family_id,
        })
    }

    pub async fn can_join_family(&self, user_id: Uuid) -> Result<JoinEligibility, InviteError> {
        Ok(self.eligibility(user_id).await?.0)
    }

    async fn eligibility(
        &self,
        user_id: Uuid,
    ) -> Result<(JoinEligibility, Option<Member>), InviteError> {
        let existing = match self.store.get_member(user_id).await {
            Ok(member) => member,
            Err(PortError::NotFound(_)) => return Ok((JoinEligibility::Allowed, None)),
            Err(e) => return Err(e.into()),
        };

        let eligibility = match self.policy {
            JoinPolicy::Strict => JoinEligibility::AlreadyInFamily,
            JoinPolicy::SoleMember => {
                if self.store.count_members(existing.family_id).await? > 1 {
                    JoinEligibility::AlreadyInFamily
                } else {
                    JoinEligibility::Allowed
                }
            }
        };
        Ok((eligibility, Some(existing)))
    }

    /// Joins `user_id` to the invite's family under `nickname`.
    ///
    /// The checks below run on a snapshot and reject early. The commit re-checks the
    /// token, the user's membership and the family's capacity inside its transaction,
    /// so two racing acceptances cannot both act on the same stale snapshot. A
    /// conflicting transaction is retried up to [`ACCEPT_MAX_ATTEMPTS`] times.
    pub async fn accept_invite(
        &self,
        token: &str,
        user_id: Uuid,
        nickname: &str,
    ) -> Result<AcceptOutcome, InviteError> {
        let nickname = match validate_nickname(nickname) {
            Ok(nickname) => nickname,
            Err(e) => return Ok(AcceptOutcome::Rejected(AcceptRejection::Nickname(e))),
        };

        let family_id = match self.verify_invite(token).await? {
            InviteVerdict::Valid { family_id } => family_id,
            InviteVerdict::NotFound => return Ok(rejected(AcceptRejection::NotFound)),
            InviteVerdict::Inactive => return Ok(rejected(AcceptRejection::Inactive)),
            InviteVerdict::Expired => return Ok(rejected(AcceptRejection::Expired)),
        };

        let (eligibility, existing) = self.eligibility(user_id).await?;
        let rejoining_same_family = existing.as_ref().is_some_and(|m| m.family_id == family_id);
        if eligibility == JoinEligibility::AlreadyInFamily || rejoining_same_family {
            debug!(user_id = %user_id, "Invite rejected: user already in a family");
            return Ok(rejected(AcceptRejection::AlreadyInFamily));
        }

        let acceptance = InviteAcceptance {
            token: token.to_string(),
            prior_family: existing.as_ref().map(|m| m.family_id),
            require_sole_member: self.policy == JoinPolicy::SoleMember && existing.is_some(),
            member: Member {
                user_id,
                family_id,
                role: Role::Family,
                nickname: nickname.to_string(),
                created_at: existing
                    .map(|m| m.created_at)
                    .unwrap_or_else(|| self.clock.now()),
            },
        };

        for attempt in 1..=ACCEPT_MAX_ATTEMPTS {
            let rejection = match self.store.commit_invite_acceptance(&acceptance).await {
                Ok(AcceptanceCommit::Committed) => {
                    info!(user_id = %user_id, family_id = %family_id, "Invite accepted");
                    return Ok(AcceptOutcome::Joined(acceptance.member));
                }
                Ok(AcceptanceCommit::InviteInactive) => AcceptRejection::Inactive,
                Ok(AcceptanceCommit::MembershipChanged) => AcceptRejection::AlreadyInFamily,
                Ok(AcceptanceCommit::FamilyFull) => AcceptRejection::FamilyFull,
                Err(PortError::Conflict(reason)) => {
                    warn!(attempt, "Invite acceptance transaction conflicted: {}", reason);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            debug!(user_id = %user_id, ?rejection, "Invite rejected inside the transaction");
            return Ok(rejected(rejection));
        }

        Err(InviteError::TransactionConflict {
            attempts: ACCEPT_MAX_ATTEMPTS,
        })
    }
}

fn rejected(reason: AcceptRejection) -> AcceptOutcome {
    AcceptOutcome::Rejected(reason)
}

/// A v4 UUID carries 122 bits from the OS random source.
fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}
