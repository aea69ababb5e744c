//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the storage ports from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pawtrack_core::domain::{Family, GeoPoint, InviteToken, Member, PlanStatus, Role, Walk};
use pawtrack_core::ports::{
    AcceptanceCommit, EntitlementService, FamilyStore, InviteAcceptance, PortError, PortResult,
    WalkRepository,
};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the storage ports on PostgreSQL.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

/// Maps driver errors onto port errors. Serialization failures and deadlocks are
/// the retryable kind; unique violations mean the row already exists.
fn map_db_error(e: sqlx::Error) -> PortError {
    if let Some(db_err) = e.as_database_error() {
        match db_err.code().as_deref() {
            Some("40001") | Some("40P01") => {
                return PortError::Conflict(db_err.message().to_string())
            }
            Some("23505") => return PortError::AlreadyExists(db_err.message().to_string()),
            _ => {}
        }
    }
    PortError::Unexpected(e.to_string())
}

fn not_found(kind: &str, id: impl std::fmt::Display) -> impl FnOnce(sqlx::Error) -> PortError {
    let message = format!("{} {} not found", kind, id);
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(message),
        other => map_db_error(other),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct FamilyRecord {
    id: Uuid,
    owner_id: Uuid,
    created_at: DateTime<Utc>,
    plan_status: String,
    trial_ends_at: DateTime<Utc>,
    member_limit: i32,
}
impl FamilyRecord {
    fn to_domain(self) -> PortResult<Family> {
        let plan_status = PlanStatus::parse(&self.plan_status).ok_or_else(|| {
            PortError::Unexpected(format!("Unknown plan status '{}'", self.plan_status))
        })?;
        Ok(Family {
            id: self.id,
            owner_id: self.owner_id,
            created_at: self.created_at,
            plan_status,
            trial_ends_at: self.trial_ends_at,
            member_limit: self.member_limit.max(0) as u32,
        })
    }
}

#[derive(FromRow)]
struct MemberRecord {
    user_id: Uuid,
    family_id: Uuid,
    role: String,
    nickname: String,
    created_at: DateTime<Utc>,
}
impl MemberRecord {
    fn to_domain(self) -> PortResult<Member> {
        let role = Role::parse(&self.role)
            .ok_or_else(|| PortError::Unexpected(format!("Unknown role '{}'", self.role)))?;
        Ok(Member {
            user_id: self.user_id,
            family_id: self.family_id,
            role,
            nickname: self.nickname,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct InviteRecord {
    token: String,
    family_id: Uuid,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    is_active: bool,
}
impl InviteRecord {
    fn to_domain(self) -> InviteToken {
        InviteToken {
            token: self.token,
            family_id: self.family_id,
            created_by: self.created_by,
            created_at: self.created_at,
            expires_at: self.expires_at,
            is_active: self.is_active,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RoutePointRecord {
    lat: f64,
    lng: f64,
    t: DateTime<Utc>,
}

#[derive(FromRow)]
struct WalkRecord {
    id: Uuid,
    family_id: Uuid,
    recorded_by: Uuid,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    duration_sec: i64,
    distance_meters: f64,
    route: Json<Vec<RoutePointRecord>>,
}
impl WalkRecord {
    fn to_domain(self) -> Walk {
        Walk {
            id: self.id,
            family_id: self.family_id,
            recorded_by: self.recorded_by,
            start_time: self.start_time,
            end_time: self.end_time,
            duration_sec: self.duration_sec,
            distance_meters: self.distance_meters,
            route: self
                .route
                .0
                .into_iter()
                .map(|p| GeoPoint {
                    latitude: p.lat,
                    longitude: p.lng,
                    captured_at: p.t,
                })
                .collect(),
        }
    }
}

const FAMILY_COLUMNS: &str = "id, owner_id, created_at, plan_status, trial_ends_at, member_limit";
const MEMBER_COLUMNS: &str = "user_id, family_id, role, nickname, created_at";
const INVITE_COLUMNS: &str = "token, family_id, created_by, created_at, expires_at, is_active";
const WALK_COLUMNS: &str =
    "id, family_id, recorded_by, start_time, end_time, duration_sec, distance_meters, route";

//=========================================================================================
// `FamilyStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl FamilyStore for DbAdapter {
    async fn create_family(&self, family: &Family, owner: &Member) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        sqlx::query(
            "INSERT INTO families (id, owner_id, created_at, plan_status, trial_ends_at, member_limit) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(family.id)
        .bind(family.owner_id)
        .bind(family.created_at)
        .bind(family.plan_status.as_str())
        .bind(family.trial_ends_at)
        .bind(family.member_limit as i32)
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;

        sqlx::query(
            "INSERT INTO members (user_id, family_id, role, nickname, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(owner.user_id)
        .bind(owner.family_id)
        .bind(owner.role.as_str())
        .bind(&owner.nickname)
        .bind(owner.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;

        tx.commit().await.map_err(map_db_error)
    }

    async fn get_family(&self, family_id: Uuid) -> PortResult<Family> {
        let record = sqlx::query_as::<_, FamilyRecord>(&format!(
            "SELECT {} FROM families WHERE id = $1",
            FAMILY_COLUMNS
        ))
        .bind(family_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found("Family", family_id))?;
        record.to_domain()
    }

    async fn update_plan_status(&self, family_id: Uuid, status: PlanStatus) -> PortResult<()> {
        let result = sqlx::query("UPDATE families SET plan_status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(family_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Family {} not found", family_id)));
        }
        Ok(())
    }

    async fn delete_family(&self, family_id: Uuid) -> PortResult<()> {
        // Members and invites go with it (ON DELETE CASCADE).
        sqlx::query("DELETE FROM families WHERE id = $1")
            .bind(family_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    async fn get_member(&self, user_id: Uuid) -> PortResult<Member> {
        let record = sqlx::query_as::<_, MemberRecord>(&format!(
            "SELECT {} FROM members WHERE user_id = $1",
            MEMBER_COLUMNS
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found("Member", user_id))?;
        record.to_domain()
    }

    async fn list_members(&self, family_id: Uuid) -> PortResult<Vec<Member>> {
        let records = sqlx::query_as::<_, MemberRecord>(&format!(
            "SELECT {} FROM members WHERE family_id = $1 ORDER BY created_at ASC",
            MEMBER_COLUMNS
        ))
        .bind(family_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn count_members(&self, family_id: Uuid) -> PortResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM members WHERE family_id = $1")
            .bind(family_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(count.max(0) as usize)
    }

    async fn delete_member(&self, user_id: Uuid) -> PortResult<()> {
        sqlx::query("DELETE FROM members WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    async fn insert_invite(&self, invite: &InviteToken) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO invites (token, family_id, created_by, created_at, expires_at, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&invite.token)
        .bind(invite.family_id)
        .bind(invite.created_by)
        .bind(invite.created_at)
        .bind(invite.expires_at)
        .bind(invite.is_active)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }

    async fn get_invite(&self, token: &str) -> PortResult<InviteToken> {
        let record = sqlx::query_as::<_, InviteRecord>(&format!(
            "SELECT {} FROM invites WHERE token = $1",
            INVITE_COLUMNS
        ))
        .bind(token)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found("Invite", token))?;
        Ok(record.to_domain())
    }

    async fn delete_invites_for_family(&self, family_id: Uuid) -> PortResult<()> {
        sqlx::query("DELETE FROM invites WHERE family_id = $1")
            .bind(family_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    async fn commit_invite_acceptance(
        &self,
        acceptance: &InviteAcceptance,
    ) -> PortResult<AcceptanceCommit> {
        let member = &acceptance.member;
        // Returning early drops `tx`, which rolls it back.
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        // Row lock: a concurrent acceptance of the same token waits here and then
        // sees `is_active = false`.
        let is_active: Option<bool> =
            sqlx::query_scalar("SELECT is_active FROM invites WHERE token = $1 FOR UPDATE")
                .bind(&acceptance.token)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_db_error)?;
        if is_active != Some(true) {
            return Ok(AcceptanceCommit::InviteInactive);
        }

        // Lock the target family, and the family being left when its head count
        // matters, in id order so opposite moves cannot deadlock. Joins into either
        // family queue behind these locks until we commit.
        let mut family_ids = vec![member.family_id];
        if let (true, Some(prior)) = (acceptance.require_sole_member, acceptance.prior_family) {
            family_ids.push(prior);
        }
        family_ids.sort();
        family_ids.dedup();
        let locked: Vec<(Uuid, i32)> = sqlx::query_as(
            "SELECT id, member_limit FROM families WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(&family_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_db_error)?;
        let member_limit = locked
            .iter()
            .find(|(id, _)| *id == member.family_id)
            .map(|(_, limit)| i64::from(*limit))
            .ok_or_else(|| PortError::NotFound(format!("Family {} not found", member.family_id)))?;

        let current_family: Option<Uuid> =
            sqlx::query_scalar("SELECT family_id FROM members WHERE user_id = $1 FOR UPDATE")
                .bind(member.user_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_db_error)?;
        if current_family != acceptance.prior_family {
            return Ok(AcceptanceCommit::MembershipChanged);
        }
        if let (true, Some(prior)) = (acceptance.require_sole_member, acceptance.prior_family) {
            if count_members_in(&mut tx, prior).await? > 1 {
                return Ok(AcceptanceCommit::MembershipChanged);
            }
        }

        if count_members_in(&mut tx, member.family_id).await? >= member_limit {
            return Ok(AcceptanceCommit::FamilyFull);
        }

        sqlx::query("UPDATE invites SET is_active = FALSE WHERE token = $1")
            .bind(&acceptance.token)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;

        let written = match acceptance.prior_family {
            // No row to lock: a racing first join surfaces as a unique violation.
            None => sqlx::query(
                "INSERT INTO members (user_id, family_id, role, nickname, created_at) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(member.user_id)
            .bind(member.family_id)
            .bind(member.role.as_str())
            .bind(&member.nickname)
            .bind(member.created_at)
            .execute(&mut *tx)
            .await,
            Some(_) => sqlx::query(
                "UPDATE members SET family_id = $2, role = $3, nickname = $4 WHERE user_id = $1",
            )
            .bind(member.user_id)
            .bind(member.family_id)
            .bind(member.role.as_str())
            .bind(&member.nickname)
            .execute(&mut *tx)
            .await,
        };
        match written.map_err(map_db_error) {
            Ok(_) => {}
            Err(PortError::AlreadyExists(_)) => return Ok(AcceptanceCommit::MembershipChanged),
            Err(e) => return Err(e),
        }

        tx.commit().await.map_err(map_db_error)?;
        Ok(AcceptanceCommit::Committed)
    }
}

async fn count_members_in(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    family_id: Uuid,
) -> PortResult<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM members WHERE family_id = $1")
        .bind(family_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_db_error)
}

//=========================================================================================
// `WalkRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl WalkRepository for DbAdapter {
    async fn save_walk(&self, walk: &Walk) -> PortResult<()> {
        let route: Vec<RoutePointRecord> = walk
            .route
            .iter()
            .map(|p| RoutePointRecord {
                lat: p.latitude,
                lng: p.longitude,
                t: p.captured_at,
            })
            .collect();

        sqlx::query(
            "INSERT INTO walks (id, family_id, recorded_by, start_time, end_time, duration_sec, distance_meters, route) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(walk.id)
        .bind(walk.family_id)
        .bind(walk.recorded_by)
        .bind(walk.start_time)
        .bind(walk.end_time)
        .bind(walk.duration_sec)
        .bind(walk.distance_meters)
        .bind(Json(route))
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(())
    }

    async fn list_walks_by_date_range(
        &self,
        family_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> PortResult<Vec<Walk>> {
        let records = sqlx::query_as::<_, WalkRecord>(&format!(
            "SELECT {} FROM walks WHERE family_id = $1 AND start_time >= $2 AND start_time <= $3 \
             ORDER BY start_time ASC",
            WALK_COLUMNS
        ))
        .bind(family_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn get_walk(&self, walk_id: Uuid) -> PortResult<Walk> {
        let record = sqlx::query_as::<_, WalkRecord>(&format!(
            "SELECT {} FROM walks WHERE id = $1",
            WALK_COLUMNS
        ))
        .bind(walk_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found("Walk", walk_id))?;
        Ok(record.to_domain())
    }

    async fn delete_walk(&self, walk_id: Uuid) -> PortResult<()> {
        sqlx::query("DELETE FROM walks WHERE id = $1")
            .bind(walk_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    async fn delete_walks_by_user(&self, user_id: Uuid, family_id: Uuid) -> PortResult<()> {
        sqlx::query("DELETE FROM walks WHERE recorded_by = $1 AND family_id = $2")
            .bind(user_id)
            .bind(family_id)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }
}

//=========================================================================================
// `EntitlementService` Trait Implementation
//=========================================================================================

#[async_trait]
impl EntitlementService for DbAdapter {
    async fn has_active_entitlement(&self, user_id: Uuid) -> PortResult<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM entitlements \
             WHERE user_id = $1 AND (expires_at IS NULL OR expires_at > NOW()))",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)
    }
}
