//! services/api/tests/live_walk.rs
//!
//! The per-connection recorder wiring behind `/walks/live`, without a socket.

use chrono::{Duration, Utc};
use pawtrack_api::{
    adapters::MemoryStore,
    web::{protocol::ServerMessage, state::LiveWalkSession, AppState},
};
use pawtrack_core::geo::route_distance;
use pawtrack_core::ports::{SystemClock, WalkRepository};
use pawtrack_core::{GeoPoint, JoinPolicy, RecordingError, WalkOwner};
use std::sync::Arc;
use uuid::Uuid;

fn session() -> (LiveWalkSession, Arc<MemoryStore>, WalkOwner) {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(
        JoinPolicy::default(),
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(SystemClock),
    );
    let owner = WalkOwner {
        user_id: Uuid::new_v4(),
        family_id: Uuid::new_v4(),
    };
    (LiveWalkSession::new(&state, owner), store, owner)
}

fn fix(step: u32) -> GeoPoint {
    GeoPoint {
        latitude: 35.6812 + f64::from(step) * 0.0005,
        longitude: 139.7671,
        captured_at: Utc::now() + Duration::seconds(i64::from(step) * 30),
    }
}

#[tokio::test]
async fn pushed_fixes_become_the_saved_route() {
    let (session, store, owner) = session();
    assert!(!session.location.push(fix(0)).await);

    session.recorder.start_recording().await.unwrap();
    for step in 0..4 {
        assert!(session.location.push(fix(step)).await);
    }
    let walk = session.recorder.stop_recording().await.unwrap().unwrap();

    assert_eq!(walk.route.len(), 4);
    assert_eq!(walk.recorded_by, owner.user_id);
    assert_eq!(walk.family_id, owner.family_id);
    assert!((walk.distance_meters - route_distance(&walk.route)).abs() < 1e-6);
    assert_eq!(store.get_walk(walk.id).await.unwrap(), walk);

    match ServerMessage::from(&walk) {
        ServerMessage::WalkSaved { walk_id, .. } => assert_eq!(walk_id, walk.id),
        other => panic!("unexpected message {:?}", other),
    }

    // Fixes after stop go nowhere.
    assert!(!session.location.push(fix(5)).await);
    assert!(session.recorder.stop_recording().await.unwrap().is_none());
}

#[tokio::test]
async fn closed_connection_cannot_start_again() {
    let (session, _, _) = session();
    session.location.close().await;
    assert!(matches!(
        session.recorder.start_recording().await,
        Err(RecordingError::LocationUnavailable(_))
    ));
    assert!(!session.recorder.is_recording().await);
}
