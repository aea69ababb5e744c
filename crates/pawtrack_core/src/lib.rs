pub mod domain;
pub mod family;
pub mod geo;
pub mod invite;
pub mod nickname;
pub mod ports;
pub mod recorder;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use domain::{Family, GeoPoint, InviteToken, Member, PlanStatus, Role, Walk};
pub use family::{AccountDeletion, AppAccess, CreateFamilyOutcome, FamilyError, FamilyService};
pub use invite::{
    AcceptOutcome, AcceptRejection, InviteError, InviteService, InviteVerdict, JoinEligibility,
    JoinPolicy,
};
pub use nickname::{validate_nickname, NicknameError};
pub use ports::{
    AcceptanceCommit, Clock, EntitlementService, FamilyStore, InviteAcceptance, LocationService,
    LocationSubscription, PortError, PortResult, SystemClock, WalkRepository,
};
pub use recorder::{RecordingError, SessionSnapshot, WalkOwner, WalkRecorder, WalkSession};
pub use stats::{HistoryError, WalkDeletion, WalkHistoryService, WalkRanking, WalkStats};
