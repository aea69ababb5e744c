//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the mobile client and the API server
//! for recording a walk live.

use chrono::{DateTime, Utc};
use pawtrack_core::{GeoPoint, SessionSnapshot, Walk};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//=========================================================================================
// Messages Sent FROM the Client TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Begins recording. Totals start from zero.
    Start,

    /// A location fix from the device.
    Point {
        latitude: f64,
        longitude: f64,
        captured_at: DateTime<Utc>,
    },

    /// Ends the recording and saves the walk.
    Stop,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the recorder is running.
    RecordingStarted,

    /// Running totals, sent after every accepted point.
    Progress {
        distance_meters: f64,
        speed_kmh: f64,
        elapsed_seconds: i64,
        points: usize,
    },

    /// The walk was stored.
    WalkSaved {
        walk_id: Uuid,
        distance_meters: f64,
        duration_seconds: i64,
    },

    /// Reports an error to the client, which should display an error message.
    Error { message: String },
}

impl From<SessionSnapshot> for ServerMessage {
    fn from(snapshot: SessionSnapshot) -> Self {
        ServerMessage::Progress {
            distance_meters: snapshot.distance_meters,
            speed_kmh: snapshot.speed_kmh,
            elapsed_seconds: snapshot.elapsed_seconds,
            points: snapshot.points,
        }
    }
}

impl From<&Walk> for ServerMessage {
    fn from(walk: &Walk) -> Self {
        ServerMessage::WalkSaved {
            walk_id: walk.id,
            distance_meters: walk.distance_meters,
            duration_seconds: walk.duration_sec,
        }
    }
}

impl ClientMessage {
    /// The fix carried by a `Point` message.
    pub fn as_point(&self) -> Option<GeoPoint> {
        match self {
            ClientMessage::Point {
                latitude,
                longitude,
                captured_at,
            } => Some(GeoPoint {
                latitude: *latitude,
                longitude: *longitude,
                captured_at: *captured_at,
            }),
            _ => None,
        }
    }
}
