//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use pawtrack_core::{
    AcceptOutcome, AcceptRejection, AccountDeletion, CreateFamilyOutcome, FamilyError,
    HistoryError, InviteError, InviteVerdict, JoinEligibility, Member, PlanStatus, Role, Walk,
    WalkDeletion, WalkRanking, WalkStats,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_family_handler,
        get_membership_handler,
        get_access_handler,
        get_eligibility_handler,
        update_plan_handler,
        delete_account_handler,
        create_invite_handler,
        verify_invite_handler,
        accept_invite_handler,
        list_walks_handler,
        walk_stats_handler,
        walk_ranking_handler,
        delete_walk_handler,
    ),
    components(
        schemas(
            ErrorResponse,
            NicknameRequest,
            UpdatePlanRequest,
            FamilyResponse,
            MemberResponse,
            CreateFamilyResponse,
            AccessResponse,
            EligibilityResponse,
            InviteResponse,
            VerifyInviteResponse,
            RoutePointResponse,
            WalkResponse,
            WalkStatsResponse,
            WalkRankingResponse,
        )
    ),
    tags(
        (name = "PawTrack API", description = "Family dog-walk recording, invites and history.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// The body of every non-2xx response.
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    /// A stable, machine-readable code such as `invite_expired`.
    pub error: String,
    pub message: String,
}

#[derive(Deserialize, ToSchema)]
pub struct NicknameRequest {
    pub nickname: String,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdatePlanRequest {
    /// `active` or `read_only`.
    pub status: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct FamilyResponse {
    pub family_id: Uuid,
    pub owner_id: Uuid,
    pub plan_status: String,
    pub trial_ends_at: DateTime<Utc>,
    pub member_limit: u32,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct MemberResponse {
    pub user_id: Uuid,
    pub family_id: Uuid,
    pub role: String,
    pub nickname: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Member> for MemberResponse {
    fn from(member: &Member) -> Self {
        Self {
            user_id: member.user_id,
            family_id: member.family_id,
            role: member.role.as_str().to_string(),
            nickname: member.nickname.clone(),
            created_at: member.created_at,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct CreateFamilyResponse {
    pub family: FamilyResponse,
    pub owner: MemberResponse,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct AccessResponse {
    pub read_only: bool,
    pub trial_in_use: bool,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct EligibilityResponse {
    pub can_join: bool,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct InviteResponse {
    pub token: String,
    pub family_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct VerifyInviteResponse {
    /// One of `valid`, `not_found`, `inactive`, `expired`.
    pub status: String,
    pub family_id: Option<Uuid>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct RoutePointResponse {
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalkResponse {
    pub id: Uuid,
    pub recorded_by: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_sec: i64,
    pub distance_meters: f64,
    pub route: Vec<RoutePointResponse>,
}

impl From<Walk> for WalkResponse {
    fn from(walk: Walk) -> Self {
        Self {
            id: walk.id,
            recorded_by: walk.recorded_by,
            start_time: walk.start_time,
            end_time: walk.end_time,
            duration_sec: walk.duration_sec,
            distance_meters: walk.distance_meters,
            route: walk
                .route
                .into_iter()
                .map(|p| RoutePointResponse {
                    latitude: p.latitude,
                    longitude: p.longitude,
                    captured_at: p.captured_at,
                })
                .collect(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalkStatsResponse {
    pub count: usize,
    pub total_distance_meters: f64,
    pub avg_distance_meters: f64,
    pub avg_duration_sec: f64,
}

impl From<WalkStats> for WalkStatsResponse {
    fn from(stats: WalkStats) -> Self {
        Self {
            count: stats.count,
            total_distance_meters: stats.total_distance_meters,
            avg_distance_meters: stats.avg_distance_meters,
            avg_duration_sec: stats.avg_duration_sec,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalkRankingResponse {
    pub user_id: Uuid,
    pub nickname: String,
    pub count: usize,
    pub total_distance_meters: f64,
    pub total_duration_sec: i64,
}

impl From<WalkRanking> for WalkRankingResponse {
    fn from(rank: WalkRanking) -> Self {
        Self {
            user_id: rank.user_id,
            nickname: rank.nickname,
            count: rank.count,
            total_distance_meters: rank.total_distance_meters,
            total_duration_sec: rank.total_duration_sec,
        }
    }
}

/// An inclusive time window over walk start times.
#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RangeQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

//=========================================================================================
// Error Mapping
//=========================================================================================

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn reject(status: StatusCode, code: &str, message: impl Into<String>) -> HandlerError {
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message: message.into(),
        }),
    )
}

/// Logs the underlying failure and hides it from the client.
fn internal(context: &str, e: impl std::fmt::Debug) -> HandlerError {
    error!("{}: {:?}", context, e);
    reject(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "An internal error occurred",
    )
}

fn no_family(user_id: Uuid) -> HandlerError {
    reject(
        StatusCode::NOT_FOUND,
        "no_family",
        format!("User {} does not belong to a family", user_id),
    )
}

fn history_error(context: &str, e: HistoryError) -> HandlerError {
    match e {
        HistoryError::NoFamily(user_id) => no_family(user_id),
        HistoryError::Store(e) => internal(context, e),
    }
}

fn family_error(context: &str, e: FamilyError) -> HandlerError {
    match e {
        FamilyError::Store(e) => internal(context, e),
    }
}

fn invite_error(context: &str, e: InviteError) -> HandlerError {
    match e {
        InviteError::TokenCollision => reject(
            StatusCode::CONFLICT,
            "token_collision",
            "Could not allocate an invite token, please retry",
        ),
        InviteError::NotFamilyOwner { .. } => reject(
            StatusCode::FORBIDDEN,
            "not_family_owner",
            "Only the family owner can do this",
        ),
        InviteError::TransactionConflict { attempts } => reject(
            StatusCode::CONFLICT,
            "transaction_conflict",
            format!("The invite is busy, gave up after {} attempts", attempts),
        ),
        InviteError::Store(e) => internal(context, e),
    }
}

fn nickname_rejection(e: impl std::fmt::Display) -> HandlerError {
    reject(StatusCode::UNPROCESSABLE_ENTITY, "invalid_nickname", e.to_string())
}

//=========================================================================================
// Family Handlers
//=========================================================================================

/// Create a family owned by the caller, with a fresh trial.
#[utoipa::path(
    post,
    path = "/families",
    request_body = NicknameRequest,
    responses(
        (status = 201, description = "Family created", body = CreateFamilyResponse),
        (status = 409, description = "The caller already belongs to a family", body = ErrorResponse),
        (status = 422, description = "Invalid nickname", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn create_family_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(body): Json<NicknameRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let outcome = app_state
        .families
        .create_family(user_id, &body.nickname)
        .await
        .map_err(|e| family_error("Failed to create family", e))?;

    match outcome {
        CreateFamilyOutcome::Created { family, owner } => {
            let response = CreateFamilyResponse {
                family: FamilyResponse {
                    family_id: family.id,
                    owner_id: family.owner_id,
                    plan_status: family.plan_status.as_str().to_string(),
                    trial_ends_at: family.trial_ends_at,
                    member_limit: family.member_limit,
                },
                owner: MemberResponse::from(&owner),
            };
            Ok((StatusCode::CREATED, Json(response)))
        }
        CreateFamilyOutcome::AlreadyInFamily => Err(reject(
            StatusCode::CONFLICT,
            "already_in_family",
            "The user already belongs to a family",
        )),
        CreateFamilyOutcome::InvalidNickname(e) => Err(nickname_rejection(e)),
    }
}

/// The caller's own membership record.
#[utoipa::path(
    get,
    path = "/families/me",
    responses(
        (status = 200, description = "Membership", body = MemberResponse),
        (status = 404, description = "The caller belongs to no family", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn get_membership_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<Json<MemberResponse>, HandlerError> {
    match app_state.families.membership(user_id).await {
        Ok(Some(member)) => Ok(Json(MemberResponse::from(&member))),
        Ok(None) => Err(no_family(user_id)),
        Err(e) => Err(family_error("Failed to load membership", e)),
    }
}

/// Whether the app is read-only for the caller and whether a trial is running.
#[utoipa::path(
    get,
    path = "/families/me/access",
    responses(
        (status = 200, description = "Access level", body = AccessResponse)
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn get_access_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<Json<AccessResponse>, HandlerError> {
    let access = app_state
        .families
        .access_for(user_id)
        .await
        .map_err(|e| family_error("Failed to evaluate access", e))?;
    Ok(Json(AccessResponse {
        read_only: access.read_only,
        trial_in_use: access.trial_in_use,
    }))
}

/// Whether the caller may join another family under the configured join policy.
#[utoipa::path(
    get,
    path = "/families/me/eligibility",
    responses(
        (status = 200, description = "Join eligibility", body = EligibilityResponse)
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn get_eligibility_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<Json<EligibilityResponse>, HandlerError> {
    let eligibility = app_state
        .invites
        .can_join_family(user_id)
        .await
        .map_err(|e| invite_error("Failed to check join eligibility", e))?;
    Ok(Json(EligibilityResponse {
        can_join: eligibility == JoinEligibility::Allowed,
    }))
}

/// Switch the caller's family between `active` and `read_only`. Owner only.
#[utoipa::path(
    put,
    path = "/families/me/plan",
    request_body = UpdatePlanRequest,
    responses(
        (status = 204, description = "Plan status updated"),
        (status = 403, description = "The caller is not the family owner", body = ErrorResponse),
        (status = 404, description = "The caller belongs to no family", body = ErrorResponse),
        (status = 422, description = "Unknown plan status", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn update_plan_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(body): Json<UpdatePlanRequest>,
) -> Result<StatusCode, HandlerError> {
    let status = PlanStatus::parse(&body.status).ok_or_else(|| {
        reject(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_plan_status",
            format!("'{}' is not one of 'active', 'read_only'", body.status),
        )
    })?;
    let member = match app_state.families.membership(user_id).await {
        Ok(Some(member)) => member,
        Ok(None) => return Err(no_family(user_id)),
        Err(e) => return Err(family_error("Failed to load membership", e)),
    };
    if member.role != Role::Owner {
        return Err(reject(
            StatusCode::FORBIDDEN,
            "not_family_owner",
            "Only the family owner can do this",
        ));
    }
    app_state
        .families
        .update_plan_status(member.family_id, status)
        .await
        .map_err(|e| family_error("Failed to update plan status", e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Delete the caller's account, walks and, for an owner, the family.
#[utoipa::path(
    delete,
    path = "/accounts/me",
    responses(
        (status = 204, description = "Account deleted"),
        (status = 404, description = "No such user", body = ErrorResponse),
        (status = 409, description = "The owner still has family members", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn delete_account_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<StatusCode, HandlerError> {
    let outcome = app_state
        .families
        .delete_account(user_id)
        .await
        .map_err(|e| family_error("Failed to delete account", e))?;
    match outcome {
        AccountDeletion::Deleted => Ok(StatusCode::NO_CONTENT),
        AccountDeletion::UserNotFound => Err(reject(
            StatusCode::NOT_FOUND,
            "user_not_found",
            "The user does not exist",
        )),
        AccountDeletion::OwnerHasMembers => Err(reject(
            StatusCode::CONFLICT,
            "owner_has_members",
            "Remove the other family members before deleting the owner account",
        )),
    }
}

//=========================================================================================
// Invite Handlers
//=========================================================================================

/// Issue a 24-hour invite to the caller's family. Owner only.
#[utoipa::path(
    post,
    path = "/invites",
    responses(
        (status = 201, description = "Invite created", body = InviteResponse),
        (status = 403, description = "The caller is not the family owner", body = ErrorResponse),
        (status = 404, description = "The caller belongs to no family", body = ErrorResponse),
        (status = 409, description = "Token collision, retry", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn create_invite_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let member = match app_state.families.membership(user_id).await {
        Ok(Some(member)) => member,
        Ok(None) => return Err(no_family(user_id)),
        Err(e) => return Err(family_error("Failed to load membership", e)),
    };
    let invite = app_state
        .invites
        .create_invite(member.family_id, user_id)
        .await
        .map_err(|e| invite_error("Failed to create invite", e))?;
    let response = InviteResponse {
        token: invite.token,
        family_id: invite.family_id,
        expires_at: invite.expires_at,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// Check an invite token without consuming it. Does not require a caller id.
#[utoipa::path(
    get,
    path = "/invites/{token}",
    responses(
        (status = 200, description = "Verification result", body = VerifyInviteResponse)
    ),
    params(
        ("token" = String, Path, description = "The invite token.")
    )
)]
pub async fn verify_invite_handler(
    State(app_state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<VerifyInviteResponse>, HandlerError> {
    let verdict = app_state
        .invites
        .verify_invite(&token)
        .await
        .map_err(|e| invite_error("Failed to verify invite", e))?;
    let (status, family_id) = match verdict {
        InviteVerdict::Valid { family_id } => ("valid", Some(family_id)),
        InviteVerdict::NotFound => ("not_found", None),
        InviteVerdict::Inactive => ("inactive", None),
        InviteVerdict::Expired => ("expired", None),
    };
    Ok(Json(VerifyInviteResponse {
        status: status.to_string(),
        family_id,
    }))
}

/// Join the invite's family under the given nickname, consuming the invite.
#[utoipa::path(
    post,
    path = "/invites/{token}/accept",
    request_body = NicknameRequest,
    responses(
        (status = 201, description = "Joined the family", body = MemberResponse),
        (status = 404, description = "Unknown invite", body = ErrorResponse),
        (status = 409, description = "Invite already used, caller already in a family, family full, or contention", body = ErrorResponse),
        (status = 410, description = "Invite expired", body = ErrorResponse),
        (status = 422, description = "Invalid nickname", body = ErrorResponse)
    ),
    params(
        ("token" = String, Path, description = "The invite token."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn accept_invite_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(token): Path<String>,
    Json(body): Json<NicknameRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let outcome = app_state
        .invites
        .accept_invite(&token, user_id, &body.nickname)
        .await
        .map_err(|e| invite_error("Failed to accept invite", e))?;

    match outcome {
        AcceptOutcome::Joined(member) => {
            Ok((StatusCode::CREATED, Json(MemberResponse::from(&member))))
        }
        AcceptOutcome::Rejected(rejection) => Err(match rejection {
            AcceptRejection::NotFound => reject(
                StatusCode::NOT_FOUND,
                "invite_not_found",
                "The invite does not exist",
            ),
            AcceptRejection::Inactive => reject(
                StatusCode::CONFLICT,
                "invite_inactive",
                "The invite has already been used",
            ),
            AcceptRejection::Expired => {
                reject(StatusCode::GONE, "invite_expired", "The invite has expired")
            }
            AcceptRejection::AlreadyInFamily => reject(
                StatusCode::CONFLICT,
                "already_in_family",
                "The user already belongs to a family",
            ),
            AcceptRejection::FamilyFull => reject(
                StatusCode::CONFLICT,
                "family_full",
                "The family has reached its member limit",
            ),
            AcceptRejection::Nickname(e) => nickname_rejection(e),
        }),
    }
}

//=========================================================================================
// Walk History Handlers
//=========================================================================================

/// Walks of the caller's family started within the window, oldest first.
#[utoipa::path(
    get,
    path = "/walks",
    params(
        RangeQuery,
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    ),
    responses(
        (status = 200, description = "Walks", body = [WalkResponse]),
        (status = 404, description = "The caller belongs to no family", body = ErrorResponse)
    )
)]
pub async fn list_walks_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<WalkResponse>>, HandlerError> {
    let walks = app_state
        .history
        .list(user_id, range.start, range.end)
        .await
        .map_err(|e| history_error("Failed to list walks", e))?;
    Ok(Json(walks.into_iter().map(WalkResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/walks/stats",
    params(
        RangeQuery,
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    ),
    responses(
        (status = 200, description = "Aggregate statistics", body = WalkStatsResponse),
        (status = 404, description = "The caller belongs to no family", body = ErrorResponse)
    )
)]
pub async fn walk_stats_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<WalkStatsResponse>, HandlerError> {
    let stats = app_state
        .history
        .stats(user_id, range.start, range.end)
        .await
        .map_err(|e| history_error("Failed to compute walk stats", e))?;
    Ok(Json(stats.into()))
}

/// Per-member totals, longest total distance first.
#[utoipa::path(
    get,
    path = "/walks/ranking",
    params(
        RangeQuery,
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    ),
    responses(
        (status = 200, description = "Ranking", body = [WalkRankingResponse]),
        (status = 404, description = "The caller belongs to no family", body = ErrorResponse)
    )
)]
pub async fn walk_ranking_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<WalkRankingResponse>>, HandlerError> {
    let ranking = app_state
        .history
        .ranking(user_id, range.start, range.end)
        .await
        .map_err(|e| history_error("Failed to compute walk ranking", e))?;
    Ok(Json(
        ranking.into_iter().map(WalkRankingResponse::from).collect(),
    ))
}

#[utoipa::path(
    delete,
    path = "/walks/{id}",
    responses(
        (status = 204, description = "Walk deleted"),
        (status = 404, description = "No such walk in the caller's family", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "The walk ID."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn delete_walk_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(walk_id): Path<Uuid>,
) -> Result<StatusCode, HandlerError> {
    let outcome = app_state
        .history
        .delete(user_id, walk_id)
        .await
        .map_err(|e| history_error("Failed to delete walk", e))?;
    match outcome {
        WalkDeletion::Deleted => Ok(StatusCode::NO_CONTENT),
        WalkDeletion::NotFound => Err(reject(
            StatusCode::NOT_FOUND,
            "walk_not_found",
            "The walk does not exist",
        )),
    }
}
