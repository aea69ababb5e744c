//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-connection state of a live walk.

use crate::adapters::ChannelLocationAdapter;
use pawtrack_core::ports::{Clock, EntitlementService, FamilyStore, WalkRepository};
use pawtrack_core::{
    FamilyService, InviteService, JoinPolicy, WalkHistoryService, WalkOwner, WalkRecorder,
};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub walks: Arc<dyn WalkRepository>,
    pub clock: Arc<dyn Clock>,
    pub families: Arc<FamilyService>,
    pub invites: Arc<InviteService>,
    pub history: Arc<WalkHistoryService>,
}

impl AppState {
    /// Wires the core services on top of the given storage adapters.
    pub fn new(
        join_policy: JoinPolicy,
        store: Arc<dyn FamilyStore>,
        walks: Arc<dyn WalkRepository>,
        entitlements: Arc<dyn EntitlementService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let families = Arc::new(FamilyService::new(
            store.clone(),
            walks.clone(),
            entitlements,
            clock.clone(),
        ));
        let invites = Arc::new(InviteService::new(
            store.clone(),
            clock.clone(),
            join_policy,
        ));
        let history = Arc::new(WalkHistoryService::new(store, walks.clone()));
        Self {
            walks,
            clock,
            families,
            invites,
            history,
        }
    }
}

//=========================================================================================
// LiveWalkSession (Specific to One WebSocket Connection)
//=========================================================================================

/// The recorder behind one live-walk socket and the feed its points arrive on.
pub struct LiveWalkSession {
    pub location: Arc<ChannelLocationAdapter>,
    pub recorder: WalkRecorder,
}

impl LiveWalkSession {
    pub fn new(app_state: &AppState, owner: WalkOwner) -> Self {
        let location = Arc::new(ChannelLocationAdapter::new());
        let recorder = WalkRecorder::new(
            owner,
            location.clone(),
            app_state.walks.clone(),
            app_state.clock.clone(),
        );
        Self { location, recorder }
    }
}
