//! crates/pawtrack_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A single location fix delivered by the device's location stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
}

/// A finished, persisted walk.
#[derive(Debug, Clone, PartialEq)]
pub struct Walk {
    pub id: Uuid,
    pub family_id: Uuid,
    pub recorded_by: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_sec: i64,
    pub distance_meters: f64,
    pub route: Vec<GeoPoint>,
}

/// Billing state of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Active,
    ReadOnly,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Active => "active",
            PlanStatus::ReadOnly => "read_only",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(PlanStatus::Active),
            "read_only" => Some(PlanStatus::ReadOnly),
            _ => None,
        }
    }
}

/// The sharing and billing unit: one owner plus a handful of members.
#[derive(Debug, Clone, PartialEq)]
pub struct Family {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub plan_status: PlanStatus,
    pub trial_ends_at: DateTime<Utc>,
    pub member_limit: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Family,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Family => "family",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(Role::Owner),
            "family" => Some(Role::Family),
            _ => None,
        }
    }
}

/// Binds a user to exactly one family. A user has at most one of these.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub user_id: Uuid,
    pub family_id: Uuid,
    pub role: Role,
    pub nickname: String,
    pub created_at: DateTime<Utc>,
}

/// A single-use, time-limited credential granting membership in one family.
///
/// `is_active` only ever moves from `true` to `false`. Expiry is not stored;
/// it is derived from `expires_at` at validation time.
#[derive(Debug, Clone, PartialEq)]
pub struct InviteToken {
    pub token: String,
    pub family_id: Uuid,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl InviteToken {
    /// Expired strictly after `expires_at`; the boundary instant is still valid.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn token(expires_at: DateTime<Utc>) -> InviteToken {
        InviteToken {
            token: "t".to_string(),
            family_id: Uuid::new_v4(),
            created_by: Uuid::new_v4(),
            created_at: expires_at - Duration::hours(24),
            expires_at,
            is_active: true,
        }
    }

    #[test]
    fn expiry_boundary_is_not_expired() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert!(!token(now).is_expired_at(now));
        assert!(token(now).is_expired_at(now + Duration::milliseconds(1)));
        assert!(!token(now + Duration::seconds(1)).is_expired_at(now));
    }

    #[test]
    fn role_and_plan_status_parse_their_own_labels() {
        for role in [Role::Owner, Role::Family] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        for status in [PlanStatus::Active, PlanStatus::ReadOnly] {
            assert_eq!(PlanStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(Role::parse("admin"), None);
    }
}
