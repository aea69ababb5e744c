//! crates/pawtrack_core/src/recorder.rs
//!
//! Turns a live stream of location fixes into running walk totals and hands the
//! finished route to the walk repository when recording stops.
//!
//! Two states: `Idle` and `Recording`. Points arrive through a pump task that reads
//! the location subscription; callers only ever start, stop and observe.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{GeoPoint, Walk};
use crate::geo::distance_between;
use crate::ports::{Clock, LocationService, PointStream, PortError, WalkRepository};

/// Average speeds above this are GPS noise for a dog walk, in km/h.
pub const NOISE_SPEED_KMH: f64 = 15.0;

const MS_TO_KMH: f64 = 3.6;

#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("location stream unavailable: {0}")]
    LocationUnavailable(#[source] PortError),

    #[error("a walk is already being recorded")]
    AlreadyRecording,

    /// The walk finished but could not be saved. It is returned so the caller can retry.
    #[error("failed to persist finished walk: {source}")]
    Persist {
        walk: Box<Walk>,
        #[source]
        source: PortError,
    },
}

/// Whose walk this is. Fixed for the lifetime of a recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOwner {
    pub user_id: Uuid,
    pub family_id: Uuid,
}

/// Read-only view of the running totals, for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSnapshot {
    pub started_at: DateTime<Utc>,
    pub elapsed_seconds: i64,
    pub distance_meters: f64,
    pub speed_kmh: f64,
    pub points: usize,
}

//=========================================================================================
// WalkSession (the accumulator)
//=========================================================================================

/// In-memory state of one walk while it is being recorded.
///
/// `points` is append-only in arrival order, which is not necessarily `captured_at`
/// order. `distance_meters` never decreases.
#[derive(Debug, Clone)]
pub struct WalkSession {
    points: Vec<GeoPoint>,
    started_at: DateTime<Utc>,
    distance_meters: f64,
    speed_kmh: f64,
}

pub fn is_plausible_speed(kmh: f64) -> bool {
    kmh <= NOISE_SPEED_KMH
}

fn is_valid_coordinate(point: &GeoPoint) -> bool {
    point.latitude.is_finite()
        && point.longitude.is_finite()
        && (-90.0..=90.0).contains(&point.latitude)
        && (-180.0..=180.0).contains(&point.longitude)
}

impl WalkSession {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            points: Vec::new(),
            started_at,
            distance_meters: 0.0,
            speed_kmh: 0.0,
        }
    }

    /// Ingests one location fix.
    ///
    /// Distance grows by the haversine length of the last leg only; it is never
    /// recomputed from the full route, so rounding error accumulates over a long walk.
    /// Speed is the whole-session average, kept unchanged when it exceeds
    /// [`NOISE_SPEED_KMH`] or when no time has elapsed yet.
    pub fn record_point(&mut self, point: GeoPoint, now: DateTime<Utc>) {
        if !is_valid_coordinate(&point) {
            debug!(
                latitude = point.latitude,
                longitude = point.longitude,
                "Ignoring location fix with invalid coordinates"
            );
            return;
        }

        if let Some(previous) = self.points.last() {
            self.distance_meters += distance_between(previous, &point);
        }
        self.points.push(point);

        let elapsed_seconds = (now - self.started_at).num_milliseconds() as f64 / 1000.0;
        if elapsed_seconds <= 0.0 {
            return;
        }

        let speed = self.distance_meters / elapsed_seconds * MS_TO_KMH;
        if is_plausible_speed(speed) {
            self.speed_kmh = speed;
        } else {
            debug!(speed_kmh = speed, "Discarding implausible average speed");
        }
    }

    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    pub fn distance_meters(&self) -> f64 {
        self.distance_meters
    }

    pub fn speed_kmh(&self) -> f64 {
        self.speed_kmh
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            started_at: self.started_at,
            elapsed_seconds: (now - self.started_at).num_seconds().max(0),
            distance_meters: self.distance_meters,
            speed_kmh: self.speed_kmh,
            points: self.points.len(),
        }
    }

    pub fn into_walk(self, owner: WalkOwner, ended_at: DateTime<Utc>) -> Walk {
        Walk {
            id: Uuid::new_v4(),
            family_id: owner.family_id,
            recorded_by: owner.user_id,
            start_time: self.started_at,
            end_time: ended_at,
            duration_sec: (ended_at - self.started_at).num_seconds().max(0),
            distance_meters: self.distance_meters,
            route: self.points,
        }
    }
}

//=========================================================================================
// WalkRecorder (the Idle/Recording state machine)
//=========================================================================================

struct ActiveRecording {
    subscription_id: Uuid,
    session: Arc<Mutex<WalkSession>>,
    cancellation_token: CancellationToken,
    pump: JoinHandle<()>,
}

enum RecorderState {
    Idle,
    Recording(ActiveRecording),
}

pub struct WalkRecorder {
    owner: WalkOwner,
    location: Arc<dyn LocationService>,
    walks: Arc<dyn WalkRepository>,
    clock: Arc<dyn Clock>,
    state: Mutex<RecorderState>,
}

impl WalkRecorder {
    pub fn new(
        owner: WalkOwner,
        location: Arc<dyn LocationService>,
        walks: Arc<dyn WalkRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            owner,
            location,
            walks,
            clock,
            state: Mutex::new(RecorderState::Idle),
        }
    }

    pub fn owner(&self) -> WalkOwner {
        self.owner
    }

    pub async fn is_recording(&self) -> bool {
        matches!(*self.state.lock().await, RecorderState::Recording(_))
    }

    /// `Idle -> Recording`. Resets the totals and subscribes to the location stream.
    ///
    /// A subscription failure is returned as-is; retrying is the caller's call.
    pub async fn start_recording(&self) -> Result<SessionSnapshot, RecordingError> {
        let mut state = self.state.lock().await;
        if matches!(*state, RecorderState::Recording(_)) {
            return Err(RecordingError::AlreadyRecording);
        }

        let started_at = self.clock.now();
        let subscription = self
            .location
            .start()
            .await
            .map_err(RecordingError::LocationUnavailable)?;

        let session = WalkSession::new(started_at);
        let snapshot = session.snapshot(started_at);
        let session = Arc::new(Mutex::new(session));
        let cancellation_token = CancellationToken::new();

        let pump = tokio::spawn(pump_points(
            subscription.points,
            session.clone(),
            self.clock.clone(),
            cancellation_token.clone(),
        ));

        *state = RecorderState::Recording(ActiveRecording {
            subscription_id: subscription.id,
            session,
            cancellation_token,
            pump,
        });
        info!(user_id = %self.owner.user_id, subscription_id = %subscription.id, "Walk recording started");
        Ok(snapshot)
    }

    /// `Recording -> Idle`. A no-op returning `Ok(None)` when already idle.
    ///
    /// The location stream is unsubscribed and the pump drained before the totals
    /// are read, so a fix delivered before the unsubscribe is counted exactly once.
    pub async fn stop_recording(&self) -> Result<Option<Walk>, RecordingError> {
        let mut state = self.state.lock().await;
        let active = match std::mem::replace(&mut *state, RecorderState::Idle) {
            RecorderState::Idle => {
                debug!("stop_recording called while idle; ignoring");
                return Ok(None);
            }
            RecorderState::Recording(active) => active,
        };

        if let Err(e) = self.location.stop(active.subscription_id).await {
            warn!(subscription_id = %active.subscription_id, "Failed to unsubscribe from location stream: {}", e);
        }
        active.cancellation_token.cancel();
        if let Err(e) = active.pump.await {
            warn!("Location pump ended abnormally: {}", e);
        }

        let ended_at = self.clock.now();
        let session = active.session.lock().await.clone();
        let walk = session.into_walk(self.owner, ended_at);

        if let Err(source) = self.walks.save_walk(&walk).await {
            return Err(RecordingError::Persist {
                walk: Box::new(walk),
                source,
            });
        }

        info!(
            walk_id = %walk.id,
            distance_meters = walk.distance_meters,
            duration_sec = walk.duration_sec,
            "Walk recording stopped and saved"
        );
        Ok(Some(walk))
    }

    /// Live totals, or `None` while idle.
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let state = self.state.lock().await;
        match &*state {
            RecorderState::Idle => None,
            RecorderState::Recording(active) => {
                Some(active.session.lock().await.snapshot(self.clock.now()))
            }
        }
    }
}

/// Feeds points into the session until the stream ends or the recording is cancelled.
///
/// Points already delivered when cancellation arrives are still ingested.
async fn pump_points(
    mut points: PointStream,
    session: Arc<Mutex<WalkSession>>,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            next = points.next() => match next {
                Some(point) => session.lock().await.record_point(point, clock.now()),
                None => break,
            },
            _ = cancellation_token.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{route_distance, EARTH_RADIUS_METERS};
    use crate::testing::{t0, FakeLocation, FakeWalks, ManualClock};
    use chrono::Duration;

    fn at(lat: f64, lon: f64, captured_at: DateTime<Utc>) -> GeoPoint {
        GeoPoint {
            latitude: lat,
            longitude: lon,
            captured_at,
        }
    }

    /// Latitude reached by walking `meters` due north.
    fn north_of(lat: f64, meters: f64) -> f64 {
        lat + (meters / EARTH_RADIUS_METERS).to_degrees()
    }

    #[test]
    fn first_point_adds_no_distance() {
        let mut session = WalkSession::new(t0());
        session.record_point(at(35.0, 139.0, t0()), t0());
        assert_eq!(session.distance_meters(), 0.0);
        assert_eq!(session.points().len(), 1);
    }

    #[test]
    fn distance_is_monotonic_even_with_out_of_order_fixes() {
        let mut session = WalkSession::new(t0());
        let fixes = [
            (35.0, 139.0, 10),
            (35.0003, 139.0002, 5),
            (35.0003, 139.0002, 20),
            (34.9999, 139.0001, 15),
            (35.0001, 138.9998, 30),
        ];
        let mut last = 0.0;
        for (i, (lat, lon, secs)) in fixes.into_iter().enumerate() {
            let now = t0() + Duration::seconds(60 * (i as i64 + 1));
            session.record_point(at(lat, lon, t0() + Duration::seconds(secs)), now);
            assert!(session.distance_meters() >= last);
            last = session.distance_meters();
        }
        assert_eq!(session.points().len(), fixes.len());
    }

    #[test]
    fn implausible_speed_keeps_previous_value() {
        let mut session = WalkSession::new(t0());
        session.record_point(at(35.0, 139.0, t0()), t0());
        assert_eq!(session.speed_kmh(), 0.0);

        // 100 m in one second is 360 km/h.
        let one_second = t0() + Duration::seconds(1);
        session.record_point(at(north_of(35.0, 100.0), 139.0, one_second), one_second);
        assert!((session.distance_meters() - 100.0).abs() < 1e-6);
        assert_eq!(session.speed_kmh(), 0.0);

        // Still at the same spot a minute in: 100 m / 60 s = 6 km/h.
        let one_minute = t0() + Duration::seconds(60);
        session.record_point(at(north_of(35.0, 100.0), 139.0, one_minute), one_minute);
        assert!((session.speed_kmh() - 6.0).abs() < 1e-6);
    }

    #[test]
    fn speed_threshold_is_inclusive() {
        assert!(is_plausible_speed(15.0));
        assert!(!is_plausible_speed(15.000_001));
        assert!(is_plausible_speed(0.0));
    }

    #[test]
    fn no_speed_update_without_elapsed_time() {
        let mut session = WalkSession::new(t0());
        session.record_point(at(35.0, 139.0, t0()), t0());
        session.record_point(at(north_of(35.0, 5.0), 139.0, t0()), t0());
        assert!(session.distance_meters() > 0.0);
        assert_eq!(session.speed_kmh(), 0.0);
    }

    #[test]
    fn invalid_coordinates_are_ignored() {
        let mut session = WalkSession::new(t0());
        session.record_point(at(35.0, 139.0, t0()), t0());
        session.record_point(at(f64::NAN, 139.0, t0()), t0() + Duration::seconds(5));
        session.record_point(at(95.0, 139.0, t0()), t0() + Duration::seconds(5));
        assert_eq!(session.points().len(), 1);
        assert_eq!(session.distance_meters(), 0.0);
    }

    /// Known tradeoff: the total is the sum of legs, so GPS jitter in place adds
    /// distance even though net displacement is zero.
    #[test]
    fn distance_is_sum_of_legs_and_accumulates_jitter() {
        let mut session = WalkSession::new(t0());
        for i in 0..200 {
            let lat = if i % 2 == 0 { 35.0 } else { north_of(35.0, 3.0) };
            let now = t0() + Duration::seconds(i);
            session.record_point(at(lat, 139.0, now), now);
        }
        let recomputed = route_distance(session.points());
        assert!((session.distance_meters() - recomputed).abs() < 1e-6);
        assert!((session.distance_meters() - 199.0 * 3.0).abs() < 1e-3);
    }

    fn owner() -> WalkOwner {
        WalkOwner {
            user_id: Uuid::new_v4(),
            family_id: Uuid::new_v4(),
        }
    }

    fn recorder(
        location: Arc<FakeLocation>,
        walks: Arc<FakeWalks>,
        clock: Arc<ManualClock>,
    ) -> WalkRecorder {
        WalkRecorder::new(owner(), location, walks, clock)
    }

    #[tokio::test]
    async fn stop_while_idle_is_a_noop_twice() {
        let location = Arc::new(FakeLocation::default());
        let walks = Arc::new(FakeWalks::default());
        let recorder = recorder(location.clone(), walks.clone(), Arc::new(ManualClock::at(t0())));

        assert!(recorder.stop_recording().await.unwrap().is_none());
        assert!(recorder.stop_recording().await.unwrap().is_none());
        assert!(!recorder.is_recording().await);
        assert!(walks.walks.lock().unwrap().is_empty());
        assert!(location.stopped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_fails_when_location_is_unavailable() {
        let recorder = recorder(
            Arc::new(FakeLocation::denied()),
            Arc::new(FakeWalks::default()),
            Arc::new(ManualClock::at(t0())),
        );
        let err = recorder.start_recording().await.unwrap_err();
        assert!(matches!(err, RecordingError::LocationUnavailable(PortError::Unavailable(_))));
        assert!(!recorder.is_recording().await);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let recorder = recorder(
            Arc::new(FakeLocation::default()),
            Arc::new(FakeWalks::default()),
            Arc::new(ManualClock::at(t0())),
        );
        recorder.start_recording().await.unwrap();
        assert!(matches!(
            recorder.start_recording().await,
            Err(RecordingError::AlreadyRecording)
        ));
    }

    #[tokio::test]
    async fn points_delivered_before_stop_are_all_counted() {
        let location = Arc::new(FakeLocation::default());
        let walks = Arc::new(FakeWalks::default());
        let clock = Arc::new(ManualClock::at(t0()));
        let recorder = recorder(location.clone(), walks.clone(), clock.clone());

        recorder.start_recording().await.unwrap();
        clock.advance(Duration::seconds(60));
        let mut lat = 35.0;
        for _ in 0..10 {
            assert!(location.emit(at(lat, 139.0, clock.now())));
            lat = north_of(lat, 10.0);
        }

        clock.advance(Duration::seconds(60));
        let walk = recorder.stop_recording().await.unwrap().expect("walk");

        assert_eq!(walk.route.len(), 10);
        assert!((walk.distance_meters - 90.0).abs() < 1e-3);
        assert_eq!(walk.duration_sec, 120);
        assert_eq!(walk.start_time, t0());
        assert_eq!(walk.recorded_by, recorder.owner().user_id);
        assert_eq!(walks.walks.lock().unwrap().len(), 1);
        assert_eq!(location.stopped.lock().unwrap().len(), 1);

        // Unsubscribed: later fixes go nowhere.
        assert!(!location.emit(at(lat, 139.0, clock.now())));
        assert!(recorder.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn restart_resets_counters() {
        let location = Arc::new(FakeLocation::default());
        let clock = Arc::new(ManualClock::at(t0()));
        let recorder = recorder(location.clone(), Arc::new(FakeWalks::default()), clock.clone());

        recorder.start_recording().await.unwrap();
        location.emit(at(35.0, 139.0, clock.now()));
        location.emit(at(north_of(35.0, 50.0), 139.0, clock.now()));
        clock.advance(Duration::seconds(30));
        recorder.stop_recording().await.unwrap();

        let snapshot = recorder.start_recording().await.unwrap();
        assert_eq!(snapshot.distance_meters, 0.0);
        assert_eq!(snapshot.points, 0);
        assert_eq!(snapshot.started_at, clock.now());
    }

    #[tokio::test]
    async fn failed_save_returns_the_walk() {
        let walks = Arc::new(FakeWalks {
            fail_saves: true,
            ..Default::default()
        });
        let recorder = recorder(
            Arc::new(FakeLocation::default()),
            walks,
            Arc::new(ManualClock::at(t0())),
        );
        recorder.start_recording().await.unwrap();
        match recorder.stop_recording().await {
            Err(RecordingError::Persist { walk, .. }) => {
                assert_eq!(walk.family_id, recorder.owner().family_id)
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(!recorder.is_recording().await);
    }
}
