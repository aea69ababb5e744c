//! crates/pawtrack_core/src/stats.rs
//!
//! Walk history for a family: listing, deletion, aggregate statistics and the
//! per-member ranking.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::{Member, Walk};
use crate::ports::{FamilyStore, PortError, WalkRepository};

/// Display name for walks whose recorder is no longer a member.
pub const UNKNOWN_RECORDER: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalkStats {
    pub count: usize,
    pub total_distance_meters: f64,
    pub avg_distance_meters: f64,
    pub avg_duration_sec: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalkRanking {
    pub user_id: Uuid,
    pub nickname: String,
    pub count: usize,
    pub total_distance_meters: f64,
    pub total_duration_sec: i64,
}

pub fn calculate_stats(walks: &[Walk]) -> WalkStats {
    if walks.is_empty() {
        return WalkStats {
            count: 0,
            total_distance_meters: 0.0,
            avg_distance_meters: 0.0,
            avg_duration_sec: 0.0,
        };
    }
    let count = walks.len();
    let total_distance: f64 = walks.iter().map(|w| w.distance_meters).sum();
    let total_duration: i64 = walks.iter().map(|w| w.duration_sec).sum();
    WalkStats {
        count,
        total_distance_meters: total_distance,
        avg_distance_meters: total_distance / count as f64,
        avg_duration_sec: total_duration as f64 / count as f64,
    }
}

/// Per-recorder totals, longest total distance first.
pub fn calculate_ranking(walks: &[Walk], members: &[Member]) -> Vec<WalkRanking> {
    let nicknames: HashMap<Uuid, &str> = members
        .iter()
        .map(|m| (m.user_id, m.nickname.as_str()))
        .collect();

    let mut totals: HashMap<Uuid, WalkRanking> = HashMap::new();
    for walk in walks {
        let entry = totals.entry(walk.recorded_by).or_insert_with(|| WalkRanking {
            user_id: walk.recorded_by,
            nickname: nicknames
                .get(&walk.recorded_by)
                .copied()
                .unwrap_or(UNKNOWN_RECORDER)
                .to_string(),
            count: 0,
            total_distance_meters: 0.0,
            total_duration_sec: 0,
        });
        entry.count += 1;
        entry.total_distance_meters += walk.distance_meters;
        entry.total_duration_sec += walk.duration_sec;
    }

    let mut ranking: Vec<WalkRanking> = totals.into_values().collect();
    ranking.sort_by(|a, b| {
        b.total_distance_meters
            .total_cmp(&a.total_distance_meters)
            .then_with(|| a.nickname.cmp(&b.nickname))
    });
    ranking
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("user {0} does not belong to a family")]
    NoFamily(Uuid),
    #[error("store error: {0}")]
    Store(#[from] PortError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkDeletion {
    Deleted,
    /// No such walk in the caller's family.
    NotFound,
}

pub struct WalkHistoryService {
    store: Arc<dyn FamilyStore>,
    walks: Arc<dyn WalkRepository>,
}

impl WalkHistoryService {
    pub fn new(store: Arc<dyn FamilyStore>, walks: Arc<dyn WalkRepository>) -> Self {
        Self { store, walks }
    }

    async fn family_of(&self, user_id: Uuid) -> Result<Uuid, HistoryError> {
        match self.store.get_member(user_id).await {
            Ok(member) => Ok(member.family_id),
            Err(PortError::NotFound(_)) => Err(HistoryError::NoFamily(user_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Walks of the caller's family started within `[start, end]`.
    pub async fn list(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Walk>, HistoryError> {
        let family_id = self.family_of(user_id).await?;
        Ok(self
            .walks
            .list_walks_by_date_range(family_id, start, end)
            .await?)
    }

    pub async fn stats(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WalkStats, HistoryError> {
        Ok(calculate_stats(&self.list(user_id, start, end).await?))
    }

    pub async fn ranking(
        &self,
        user_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<WalkRanking>, HistoryError> {
        let family_id = self.family_of(user_id).await?;
        let walks = self
            .walks
            .list_walks_by_date_range(family_id, start, end)
            .await?;
        let members = self.store.list_members(family_id).await?;
        Ok(calculate_ranking(&walks, &members))
    }

    /// Any member may delete any walk of their own family.
    pub async fn delete(&self, user_id: Uuid, walk_id: Uuid) -> Result<WalkDeletion, HistoryError> {
        let family_id = self.family_of(user_id).await?;
        let walk = match self.walks.get_walk(walk_id).await {
            Ok(walk) => walk,
            Err(PortError::NotFound(_)) => return Ok(WalkDeletion::NotFound),
            Err(e) => return Err(e.into()),
        };
        if walk.family_id != family_id {
            return Ok(WalkDeletion::NotFound);
        }
        self.walks.delete_walk(walk_id).await?;
        info!(walk_id = %walk_id, user_id = %user_id, "Walk deleted");
        Ok(WalkDeletion::Deleted)
    }
}
