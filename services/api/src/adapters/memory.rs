//! services/api/src/adapters/memory.rs
//!
//! An in-process implementation of the storage ports. Every operation runs under a
//! single lock, so the invite acceptance commit re-checks and writes atomically. Used when no
//! `DATABASE_URL` is configured and by the integration tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pawtrack_core::domain::{Family, InviteToken, Member, PlanStatus, Walk};
use pawtrack_core::ports::{
    AcceptanceCommit, EntitlementService, FamilyStore, InviteAcceptance, PortError, PortResult,
    WalkRepository,
};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    families: HashMap<Uuid, Family>,
    members: HashMap<Uuid, Member>,
    invites: HashMap<String, InviteToken>,
    walks: HashMap<Uuid, Walk>,
    entitlements: HashSet<Uuid>,
}

impl Tables {
    fn members_of(&self, family_id: Uuid) -> usize {
        self.members
            .values()
            .filter(|member| member.family_id == family_id)
            .count()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a user as holding a paid subscription.
    pub async fn grant_entitlement(&self, user_id: Uuid) {
        self.tables.lock().await.entitlements.insert(user_id);
    }

    pub async fn revoke_entitlement(&self, user_id: Uuid) {
        self.tables.lock().await.entitlements.remove(&user_id);
    }
}

fn not_found(kind: &str, id: impl std::fmt::Display) -> PortError {
    PortError::NotFound(format!("{} {} not found", kind, id))
}

//=========================================================================================
// `FamilyStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl FamilyStore for MemoryStore {
    async fn create_family(&self, family: &Family, owner: &Member) -> PortResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.members.contains_key(&owner.user_id) {
            return Err(PortError::AlreadyExists(format!(
                "User {} already has a family",
                owner.user_id
            )));
        }
        tables.families.insert(family.id, family.clone());
        tables.members.insert(owner.user_id, owner.clone());
        Ok(())
    }

    async fn get_family(&self, family_id: Uuid) -> PortResult<Family> {
        self.tables
            .lock()
            .await
            .families
            .get(&family_id)
            .cloned()
            .ok_or_else(|| not_found("Family", family_id))
    }

    async fn update_plan_status(&self, family_id: Uuid, status: PlanStatus) -> PortResult<()> {
        let mut tables = self.tables.lock().await;
        let family = tables
            .families
            .get_mut(&family_id)
            .ok_or_else(|| not_found("Family", family_id))?;
        family.plan_status = status;
        Ok(())
    }

    async fn delete_family(&self, family_id: Uuid) -> PortResult<()> {
        self.tables.lock().await.families.remove(&family_id);
        Ok(())
    }

    async fn get_member(&self, user_id: Uuid) -> PortResult<Member> {
        self.tables
            .lock()
            .await
            .members
            .get(&user_id)
            .cloned()
            .ok_or_else(|| not_found("Member", user_id))
    }

    async fn list_members(&self, family_id: Uuid) -> PortResult<Vec<Member>> {
        let tables = self.tables.lock().await;
        let mut members: Vec<Member> = tables
            .members
            .values()
            .filter(|m| m.family_id == family_id)
            .cloned()
            .collect();
        members.sort_by_key(|m| m.created_at);
        Ok(members)
    }

    async fn count_members(&self, family_id: Uuid) -> PortResult<usize> {
        let tables = self.tables.lock().await;
        Ok(tables
            .members
            .values()
            .filter(|m| m.family_id == family_id)
            .count())
    }

    async fn delete_member(&self, user_id: Uuid) -> PortResult<()> {
        self.tables.lock().await.members.remove(&user_id);
        Ok(())
    }

    async fn insert_invite(&self, invite: &InviteToken) -> PortResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.invites.contains_key(&invite.token) {
            return Err(PortError::AlreadyExists(format!(
                "Invite token {} already exists",
                invite.token
            )));
        }
        tables.invites.insert(invite.token.clone(), invite.clone());
        Ok(())
    }

    async fn get_invite(&self, token: &str) -> PortResult<InviteToken> {
        self.tables
            .lock()
            .await
            .invites
            .get(token)
            .cloned()
            .ok_or_else(|| not_found("Invite", token))
    }

    async fn delete_invites_for_family(&self, family_id: Uuid) -> PortResult<()> {
        self.tables
            .lock()
            .await
            .invites
            .retain(|_, invite| invite.family_id != family_id);
        Ok(())
    }

    async fn commit_invite_acceptance(
        &self,
        acceptance: &InviteAcceptance,
    ) -> PortResult<AcceptanceCommit> {
        let mut tables = self.tables.lock().await;
        let member = &acceptance.member;

        let invite_active = tables
            .invites
            .get(&acceptance.token)
            .is_some_and(|invite| invite.is_active);
        if !invite_active {
            return Ok(AcceptanceCommit::InviteInactive);
        }

        let current_family = tables.members.get(&member.user_id).map(|m| m.family_id);
        if current_family != acceptance.prior_family {
            return Ok(AcceptanceCommit::MembershipChanged);
        }
        if let (true, Some(prior)) = (acceptance.require_sole_member, acceptance.prior_family) {
            if tables.members_of(prior) > 1 {
                return Ok(AcceptanceCommit::MembershipChanged);
            }
        }

        let member_limit = tables
            .families
            .get(&member.family_id)
            .map(|family| family.member_limit as usize)
            .ok_or_else(|| PortError::NotFound(format!("Family {} not found", member.family_id)))?;
        if tables.members_of(member.family_id) >= member_limit {
            return Ok(AcceptanceCommit::FamilyFull);
        }

        if let Some(invite) = tables.invites.get_mut(&acceptance.token) {
            invite.is_active = false;
        }
        tables.members.insert(member.user_id, member.clone());
        Ok(AcceptanceCommit::Committed)
    }
}

//=========================================================================================
// `WalkRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl WalkRepository for MemoryStore {
    async fn save_walk(&self, walk: &Walk) -> PortResult<()> {
        self.tables.lock().await.walks.insert(walk.id, walk.clone());
        Ok(())
    }

    async fn list_walks_by_date_range(
        &self,
        family_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<Vec<Walk>> {
        let tables = self.tables.lock().await;
        let mut walks: Vec<Walk> = tables
            .walks
            .values()
            .filter(|w| w.family_id == family_id && w.start_time >= start && w.start_time <= end)
            .cloned()
            .collect();
        walks.sort_by_key(|w| w.start_time);
        Ok(walks)
    }

    async fn get_walk(&self, walk_id: Uuid) -> PortResult<Walk> {
        self.tables
            .lock()
            .await
            .walks
            .get(&walk_id)
            .cloned()
            .ok_or_else(|| not_found("Walk", walk_id))
    }

    async fn delete_walk(&self, walk_id: Uuid) -> PortResult<()> {
        self.tables.lock().await.walks.remove(&walk_id);
        Ok(())
    }

    async fn delete_walks_by_user(&self, user_id: Uuid, family_id: Uuid) -> PortResult<()> {
        self.tables
            .lock()
            .await
            .walks
            .retain(|_, w| !(w.recorded_by == user_id && w.family_id == family_id));
        Ok(())
    }
}

//=========================================================================================
// `EntitlementService` Trait Implementation
//=========================================================================================

#[async_trait]
impl EntitlementService for MemoryStore {
    async fn has_active_entitlement(&self, user_id: Uuid) -> PortResult<bool> {
        Ok(self.tables.lock().await.entitlements.contains(&user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pawtrack_core::domain::Role;

    fn invite(token: &str, family_id: Uuid) -> InviteToken {
        let now = Utc::now();
        InviteToken {
            token: token.to_string(),
            family_id,
            created_by: Uuid::new_v4(),
            created_at: now,
            expires_at: now + Duration::hours(24),
            is_active: true,
        }
    }

    fn member(family_id: Uuid) -> Member {
        Member {
            user_id: Uuid::new_v4(),
            family_id,
            role: Role::Family,
            nickname: "Kid".to_string(),
            created_at: Utc::now(),
        }
    }

    /// A family with its owner and the given number of extra members.
    async fn family(store: &MemoryStore, member_limit: u32, extra_members: usize) -> Uuid {
        let now = Utc::now();
        let owner_id = Uuid::new_v4();
        let family = Family {
            id: Uuid::new_v4(),
            owner_id,
            created_at: now,
            plan_status: PlanStatus::Active,
            trial_ends_at: now + Duration::days(7),
            member_limit,
        };
        let owner = Member {
            user_id: owner_id,
            role: Role::Owner,
            ..member(family.id)
        };
        store.create_family(&family, &owner).await.unwrap();
        let mut tables = store.tables.lock().await;
        for _ in 0..extra_members {
            let extra = member(family.id);
            tables.members.insert(extra.user_id, extra);
        }
        family.id
    }

    fn acceptance(token: &str, member: Member, prior_family: Option<Uuid>) -> InviteAcceptance {
        InviteAcceptance {
            token: token.to_string(),
            member,
            prior_family,
            require_sole_member: false,
        }
    }

    #[tokio::test]
    async fn duplicate_invite_token_is_rejected_not_overwritten() {
        let store = MemoryStore::new();
        let family_id = Uuid::new_v4();
        store.insert_invite(&invite("tok", family_id)).await.unwrap();

        let mut other = invite("tok", Uuid::new_v4());
        other.is_active = false;
        assert!(matches!(
            store.insert_invite(&other).await,
            Err(PortError::AlreadyExists(_))
        ));
        let kept = store.get_invite("tok").await.unwrap();
        assert_eq!(kept.family_id, family_id);
        assert!(kept.is_active);
    }

    #[tokio::test]
    async fn acceptance_commit_is_all_or_nothing() {
        let store = MemoryStore::new();
        let family_id = family(&store, 5, 0).await;
        store.insert_invite(&invite("tok", family_id)).await.unwrap();

        let first = member(family_id);
        assert_eq!(
            store
                .commit_invite_acceptance(&acceptance("tok", first, None))
                .await
                .unwrap(),
            AcceptanceCommit::Committed
        );
        assert!(!store.get_invite("tok").await.unwrap().is_active);

        let second = member(family_id);
        for token in ["tok", "missing"] {
            assert_eq!(
                store
                    .commit_invite_acceptance(&acceptance(token, second.clone(), None))
                    .await
                    .unwrap(),
                AcceptanceCommit::InviteInactive
            );
        }
        assert!(matches!(
            store.get_member(second.user_id).await,
            Err(PortError::NotFound(_))
        ));
        assert_eq!(store.count_members(family_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn acceptance_commit_rechecks_membership() {
        let store = MemoryStore::new();
        let home = family(&store, 5, 0).await;
        let target = family(&store, 5, 0).await;
        store.insert_invite(&invite("home", home)).await.unwrap();
        store.insert_invite(&invite("target", target)).await.unwrap();

        // Decided while the user had no family, but they joined one since.
        let joined = member(home);
        store
            .commit_invite_acceptance(&acceptance("home", joined.clone(), None))
            .await
            .unwrap();
        let moving = Member {
            family_id: target,
            ..joined.clone()
        };
        assert_eq!(
            store
                .commit_invite_acceptance(&acceptance("target", moving.clone(), None))
                .await
                .unwrap(),
            AcceptanceCommit::MembershipChanged
        );

        // A sole-member move is refused while the old family has other members.
        let sole_move = InviteAcceptance {
            require_sole_member: true,
            ..acceptance("target", moving, Some(home))
        };
        assert_eq!(
            store.commit_invite_acceptance(&sole_move).await.unwrap(),
            AcceptanceCommit::MembershipChanged
        );
        assert!(store.get_invite("target").await.unwrap().is_active);
        assert_eq!(store.get_member(joined.user_id).await.unwrap().family_id, home);
    }

    #[tokio::test]
    async fn acceptance_commit_enforces_member_limit() {
        let store = MemoryStore::new();
        let family_id = family(&store, 3, 2).await;
        store.insert_invite(&invite("tok", family_id)).await.unwrap();

        assert_eq!(
            store
                .commit_invite_acceptance(&acceptance("tok", member(family_id), None))
                .await
                .unwrap(),
            AcceptanceCommit::FamilyFull
        );
        assert!(store.get_invite("tok").await.unwrap().is_active);
        assert_eq!(store.count_members(family_id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn entitlements_can_be_granted_and_revoked() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        assert!(!store.has_active_entitlement(user).await.unwrap());
        store.grant_entitlement(user).await;
        assert!(store.has_active_entitlement(user).await.unwrap());
        store.revoke_entitlement(user).await;
        assert!(!store.has_active_entitlement(user).await.unwrap());
    }
}
