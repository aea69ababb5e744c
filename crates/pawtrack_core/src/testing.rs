//! In-crate fakes for the ports, used by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::channel::mpsc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;
use uuid::Uuid;

use crate::domain::{Family, GeoPoint, InviteToken, Member, PlanStatus, Walk};
use crate::ports::{
    AcceptanceCommit, Clock, EntitlementService, FamilyStore, InviteAcceptance, LocationService,
    LocationSubscription, PortError, PortResult, WalkRepository,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap()
}

pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }

}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

//=========================================================================================
// Location
//=========================================================================================

#[derive(Default)]
pub struct FakeLocation {
    pub deny: bool,
    sender: Mutex<Option<(Uuid, mpsc::UnboundedSender<GeoPoint>)>>,
    pub stopped: Mutex<Vec<Uuid>>,
}

impl FakeLocation {
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Default::default()
        }
    }

    /// Delivers a point to the active subscription. Returns false if there is none.
    pub fn emit(&self, point: GeoPoint) -> bool {
        match &*self.sender.lock().unwrap() {
            Some((_, tx)) => tx.unbounded_send(point).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl LocationService for FakeLocation {
    async fn start(&self) -> PortResult<LocationSubscription> {
        if self.deny {
            return Err(PortError::Unavailable("location permission denied".to_string()));
        }
        let (tx, rx) = mpsc::unbounded();
        let id = Uuid::new_v4();
        *self.sender.lock().unwrap() = Some((id, tx));
        Ok(LocationSubscription {
            id,
            points: Box::pin(rx),
        })
    }

    async fn stop(&self, subscription_id: Uuid) -> PortResult<()> {
        let mut sender = self.sender.lock().unwrap();
        if matches!(&*sender, Some((id, _)) if *id == subscription_id) {
            *sender = None;
        }
        self.stopped.lock().unwrap().push(subscription_id);
        Ok(())
    }
}

//=========================================================================================
// Walks
//=========================================================================================

#[derive(Default)]
pub struct FakeWalks {
    pub walks: Mutex<Vec<Walk>>,
    pub fail_saves: bool,
}

#[async_trait]
impl WalkRepository for FakeWalks {
    async fn save_walk(&self, walk: &Walk) -> PortResult<()> {
        if self.fail_saves {
            return Err(PortError::Unexpected("disk full".to_string()));
        }
        self.walks.lock().unwrap().push(walk.clone());
        Ok(())
    }

    async fn list_walks_by_date_range(
        &self,
        family_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<Vec<Walk>> {
        let mut walks: Vec<Walk> = self
            .walks
            .lock()
            .unwrap()
            .iter()
            .filter(|w| w.family_id == family_id && w.start_time >= start && w.start_time <= end)
            .cloned()
            .collect();
        walks.sort_by_key(|w| w.start_time);
        Ok(walks)
    }

    async fn get_walk(&self, walk_id: Uuid) -> PortResult<Walk> {
        self.walks
            .lock()
            .unwrap()
            .iter()
            .find(|w| w.id == walk_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Walk {} not found", walk_id)))
    }

    async fn delete_walk(&self, walk_id: Uuid) -> PortResult<()> {
        self.walks.lock().unwrap().retain(|w| w.id != walk_id);
        Ok(())
    }

    async fn delete_walks_by_user(&self, user_id: Uuid, family_id: Uuid) -> PortResult<()> {
        self.walks
            .lock()
            .unwrap()
            .retain(|w| !(w.recorded_by == user_id && w.family_id == family_id));
        Ok(())
    }
}

//=========================================================================================
// Families, members, invites
//=========================================================================================

#[derive(Default)]
pub struct Tables {
    pub families: HashMap<Uuid, Family>,
    pub members: HashMap<Uuid, Member>,
    pub invites: HashMap<String, InviteToken>,
}

impl Tables {
    fn members_of(&self, family_id: Uuid) -> usize {
        self.members.values().filter(|m| m.family_id == family_id).count()
    }
}

#[derive(Default)]
pub struct FakeStore {
    pub tables: Mutex<Tables>,
    /// Number of upcoming acceptance commits that fail with `Conflict`.
    pub pending_conflicts: Mutex<u32>,
    pub commit_attempts: Mutex<u32>,
    /// When set, every acceptance commit waits here before taking the lock, so
    /// concurrent callers all finish their snapshot reads first.
    commit_barrier: Mutex<Option<Arc<Barrier>>>,
    /// Number of upcoming `delete_member` calls that fail.
    pub pending_member_delete_failures: Mutex<u32>,
}

impl FakeStore {
    pub fn with_family(family: Family, owner: Member) -> Self {
        let store = Self::default();
        {
            let mut tables = store.tables.lock().unwrap();
            tables.families.insert(family.id, family);
            tables.members.insert(owner.user_id, owner);
        }
        store
    }

    pub fn put_invite(&self, invite: InviteToken) {
        self.tables
            .lock()
            .unwrap()
            .invites
            .insert(invite.token.clone(), invite);
    }

    pub fn put_member(&self, member: Member) {
        self.tables.lock().unwrap().members.insert(member.user_id, member);
    }

    pub fn fail_next_commits(&self, n: u32) {
        *self.pending_conflicts.lock().unwrap() = n;
    }

    pub fn hold_commits_until(&self, callers: usize) {
        *self.commit_barrier.lock().unwrap() = Some(Arc::new(Barrier::new(callers)));
    }

    pub fn fail_next_member_deletes(&self, n: u32) {
        *self.pending_member_delete_failures.lock().unwrap() = n;
    }
}

#[async_trait]
impl FamilyStore for FakeStore {
    async fn create_family(&self, family: &Family, owner: &Member) -> PortResult<()> {
        let mut tables = self.tables.lock().unwrap();
        if tables.members.contains_key(&owner.user_id) {
            return Err(PortError::AlreadyExists(format!("Member {}", owner.user_id)));
        }
        tables.families.insert(family.id, family.clone());
        tables.members.insert(owner.user_id, owner.clone());
        Ok(())
    }

    async fn get_family(&self, family_id: Uuid) -> PortResult<Family> {
        self.tables
            .lock()
            .unwrap()
            .families
            .get(&family_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Family {}", family_id)))
    }

    async fn update_plan_status(&self, family_id: Uuid, status: PlanStatus) -> PortResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let family = tables
            .families
            .get_mut(&family_id)
            .ok_or_else(|| PortError::NotFound(format!("Family {}", family_id)))?;
        family.plan_status = status;
        Ok(())
    }

    async fn delete_family(&self, family_id: Uuid) -> PortResult<()> {
        self.tables.lock().unwrap().families.remove(&family_id);
        Ok(())
    }

    async fn get_member(&self, user_id: Uuid) -> PortResult<Member> {
        self.tables
            .lock()
            .unwrap()
            .members
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Member {}", user_id)))
    }

    async fn list_members(&self, family_id: Uuid) -> PortResult<Vec<Member>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .members
            .values()
            .filter(|m| m.family_id == family_id)
            .cloned()
            .collect())
    }

    async fn count_members(&self, family_id: Uuid) -> PortResult<usize> {
        Ok(self.list_members(family_id).await?.len())
    }

    async fn delete_member(&self, user_id: Uuid) -> PortResult<()> {
        {
            let mut pending = self.pending_member_delete_failures.lock().unwrap();
            if *pending > 0 {
                *pending -= 1;
                return Err(PortError::Unexpected("connection reset".to_string()));
            }
        }
        self.tables.lock().unwrap().members.remove(&user_id);
        Ok(())
    }

    async fn insert_invite(&self, invite: &InviteToken) -> PortResult<()> {
        let mut tables = self.tables.lock().unwrap();
        if tables.invites.contains_key(&invite.token) {
            return Err(PortError::AlreadyExists(format!("Invite {}", invite.token)));
        }
        tables.invites.insert(invite.token.clone(), invite.clone());
        Ok(())
    }

    async fn get_invite(&self, token: &str) -> PortResult<InviteToken> {
        self.tables
            .lock()
            .unwrap()
            .invites
            .get(token)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Invite {}", token)))
    }

    async fn delete_invites_for_family(&self, family_id: Uuid) -> PortResult<()> {
        self.tables
            .lock()
            .unwrap()
            .invites
            .retain(|_, i| i.family_id != family_id);
        Ok(())
    }

    async fn commit_invite_acceptance(
        &self,
        acceptance: &InviteAcceptance,
    ) -> PortResult<AcceptanceCommit> {
        let barrier = self.commit_barrier.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        *self.commit_attempts.lock().unwrap() += 1;
        {
            let mut pending = self.pending_conflicts.lock().unwrap();
            if *pending > 0 {
                *pending -= 1;
                return Err(PortError::Conflict(format!(
                    "Invite {} contended",
                    acceptance.token
                )));
            }
        }

        let mut tables = self.tables.lock().unwrap();
        let member = &acceptance.member;

        if !tables
            .invites
            .get(&acceptance.token)
            .is_some_and(|i| i.is_active)
        {
            return Ok(AcceptanceCommit::InviteInactive);
        }
        let current = tables.members.get(&member.user_id).map(|m| m.family_id);
        if current != acceptance.prior_family {
            return Ok(AcceptanceCommit::MembershipChanged);
        }
        if let (true, Some(prior)) = (acceptance.require_sole_member, acceptance.prior_family) {
            if tables.members_of(prior) > 1 {
                return Ok(AcceptanceCommit::MembershipChanged);
            }
        }
        let limit = tables
            .families
            .get(&member.family_id)
            .map(|f| f.member_limit as usize)
            .ok_or_else(|| PortError::NotFound(format!("Family {}", member.family_id)))?;
        if tables.members_of(member.family_id) >= limit {
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
// Entitlements
//=========================================================================================

#[derive(Default)]
pub struct FakeEntitlements(pub Mutex<HashSet<Uuid>>);

impl FakeEntitlements {
    pub fn grant(&self, user_id: Uuid) {
        self.0.lock().unwrap().insert(user_id);
    }
}

#[async_trait]
impl EntitlementService for FakeEntitlements {
    async fn has_active_entitlement(&self, user_id: Uuid) -> PortResult<bool> {
        Ok(self.0.lock().unwrap().contains(&user_id))
    }
}
