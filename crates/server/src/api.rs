//! JSON API over the lifecycle service.
//!
//! Callers identify themselves with `x-user-id`; authentication happens in
//! front of this service. Every route runs inside a span carrying the caller
//! and a correlation id taken from `x-correlation-id` or generated here.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Path, Query, Request, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use deferra_core::config::LifecycleConfig;
use deferra_core::{
    ApplicationError, AuditEntry, Deferral, DeferralContent, DeferralFilter, DeferralId,
    DeferralStatus, Department, InterfaceError, LifecycleError, LifecycleService,
    RandomCodeGenerator, SignRequest, SignatureRole, UserId,
};
use deferra_db::repositories::INBOX_LIMIT;
use deferra_db::{
    DbPool, Inbox, RepositoryError, SqlDeferralStore, SqlIdentityDirectory, SqlNotificationOutbox,
};
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument, Span};
use uuid::Uuid;

pub const CALLER_HEADER: &str = "x-user-id";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

pub type SqlLifecycleService = LifecycleService<
    SqlDeferralStore,
    SqlIdentityDirectory,
    SqlNotificationOutbox,
    RandomCodeGenerator,
>;

#[derive(Clone)]
pub struct ApiState {
    service: Arc<SqlLifecycleService>,
    outbox: SqlNotificationOutbox,
}

impl ApiState {
    pub fn new(db_pool: DbPool, lifecycle: &LifecycleConfig) -> Self {
        let outbox = SqlNotificationOutbox::new(db_pool.clone());
        let service = LifecycleService::new(
            SqlDeferralStore::new(db_pool.clone()),
            SqlIdentityDirectory::new(db_pool),
            outbox.clone(),
        )
        .with_code_generator(RandomCodeGenerator::new(lifecycle.code_prefix.clone()))
        .with_max_conflict_retries(lifecycle.max_conflict_retries);

        Self { service: Arc::new(service), outbox }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/deferrals", get(list_deferrals).post(create_deferral))
        .route(
            "/api/deferrals/{id}",
            get(get_deferral).patch(edit_deferral).delete(delete_deferral),
        )
        .route("/api/deferrals/{id}/submit", post(submit_deferral))
        .route("/api/deferrals/{id}/resubmit", post(resubmit_deferral))
        .route("/api/deferrals/{id}/review/start", post(start_review))
        .route("/api/deferrals/{id}/review/approve", post(approve_review))
        .route("/api/deferrals/{id}/review/return", post(return_review))
        .route("/api/deferrals/{id}/sign", post(sign_deferral))
        .route("/api/deferrals/{id}/audit", get(audit_trail))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/read-all", post(mark_all_notifications_read))
        .route("/api/notifications/{id}/read", post(mark_notification_read))
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub detail: String,
    pub field: Option<String>,
    pub correlation_id: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let (status, kind, field) = match &error {
            InterfaceError::BadRequest { field, .. } => {
                (StatusCode::BAD_REQUEST, "bad_request", field.clone())
            }
            InterfaceError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden", None),
            InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found", None),
            InterfaceError::Conflict { field, .. } => {
                (StatusCode::CONFLICT, "conflict", field.clone())
            }
            InterfaceError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", None)
            }
            InterfaceError::Internal { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorBody {
            error: kind.to_owned(),
            message: error.user_message().to_owned(),
            detail: error.to_string(),
            field,
            correlation_id: error.correlation_id().to_owned(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Caller and correlation id for one request.
pub struct RequestContext {
    pub caller: UserId,
    pub correlation_id: String,
}

impl RequestContext {
    fn span(&self, operation: &'static str) -> Span {
        info_span!(
            "api.request",
            operation,
            correlation_id = %self.correlation_id,
            caller = %self.caller,
        )
    }

    fn lifecycle(&self, error: LifecycleError) -> ApiError {
        ApiError(ApplicationError::from(error).into_interface(self.correlation_id.clone()))
    }

    fn persistence(&self, error: RepositoryError) -> ApiError {
        ApiError(
            ApplicationError::Persistence(error.to_string())
                .into_interface(self.correlation_id.clone()),
        )
    }

    fn bad_request(&self, field: &str, message: String) -> ApiError {
        ApiError(InterfaceError::BadRequest {
            message,
            field: Some(field.to_owned()),
            correlation_id: self.correlation_id.clone(),
        })
    }

    fn not_found(&self, message: String) -> ApiError {
        ApiError(InterfaceError::NotFound { message, correlation_id: self.correlation_id.clone() })
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = correlation_id(&parts.headers);

        let caller = parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        match caller {
            Some(caller) => Ok(Self { caller: UserId(caller.to_owned()), correlation_id }),
            None => Err(ApiError(InterfaceError::Forbidden {
                message: format!("missing `{CALLER_HEADER}` header"),
                correlation_id,
            })),
        }
    }
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// JSON request body whose rejections use the API error body instead of
/// axum's plain-text response.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = correlation_id(req.headers());
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError(InterfaceError::BadRequest {
                message: rejection.body_text(),
                field: None,
                correlation_id,
            })),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub department: Option<String>,
    pub initiator: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    #[serde(default)]
    pub comments: Option<String>,
    pub required_signatures: Vec<String>,
}

impl ApproveBody {
    fn roles(&self, ctx: &RequestContext) -> ApiResult<Vec<SignatureRole>> {
        self.required_signatures
            .iter()
            .map(|value| {
                SignatureRole::parse(value).ok_or_else(|| {
                    ctx.bad_request(
                        "required_signatures",
                        format!("unknown signature role `{value}`"),
                    )
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct SignBody {
    pub role: String,
    pub signer_name: String,
    #[serde(default)]
    pub comments: Option<String>,
}

impl SignBody {
    fn into_request(self, ctx: &RequestContext) -> ApiResult<SignRequest> {
        let role = SignatureRole::parse(&self.role).ok_or_else(|| {
            ctx.bad_request("role", format!("unknown signature role `{}`", self.role))
        })?;
        Ok(SignRequest { role, signer_name: self.signer_name, comments: self.comments })
    }
}

#[derive(Debug, Deserialize)]
pub struct ReturnBody {
    pub comments: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SignResponse {
    pub deferral: Deferral,
    pub completed_now: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MarkAllResponse {
    pub updated: u64,
}

fn present(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_owned()).filter(|value| !value.is_empty())
}

impl ListQuery {
    fn into_filter(self, ctx: &RequestContext) -> ApiResult<DeferralFilter> {
        let status = match present(self.status) {
            Some(value) => Some(DeferralStatus::parse(&value).ok_or_else(|| {
                ctx.bad_request("status", format!("unknown deferral status `{value}`"))
            })?),
            None => None,
        };
        let department = match present(self.department) {
            Some(value) => Some(Department::parse(&value).ok_or_else(|| {
                ctx.bad_request("department", format!("unknown department `{value}`"))
            })?),
            None => None,
        };

        Ok(DeferralFilter { status, department, initiator_id: present(self.initiator).map(UserId) })
    }
}

async fn list_deferrals(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Deferral>>> {
    let filter = query.into_filter(&ctx)?;
    let deferrals = state
        .service
        .list(&filter)
        .instrument(ctx.span("list_deferrals"))
        .await
        .map_err(|error| ctx.lifecycle(error))?;
    Ok(Json(deferrals))
}

async fn create_deferral(
    State(state): State<ApiState>,
    ctx: RequestContext,
    JsonBody(content): JsonBody<DeferralContent>,
) -> ApiResult<(StatusCode, Json<Deferral>)> {
    let deferral = state
        .service
        .create_draft(&ctx.caller, content)
        .instrument(ctx.span("create_deferral"))
        .await
        .map_err(|error| ctx.lifecycle(error))?;
    Ok((StatusCode::CREATED, Json(deferral)))
}

async fn get_deferral(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<Json<Deferral>> {
    let deferral = state
        .service
        .get(&DeferralId(id))
        .instrument(ctx.span("get_deferral"))
        .await
        .map_err(|error| ctx.lifecycle(error))?;
    Ok(Json(deferral))
}

async fn edit_deferral(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    JsonBody(content): JsonBody<DeferralContent>,
) -> ApiResult<Json<Deferral>> {
    let deferral = state
        .service
        .edit(&DeferralId(id), &ctx.caller, content)
        .instrument(ctx.span("edit_deferral"))
        .await
        .map_err(|error| ctx.lifecycle(error))?;
    Ok(Json(deferral))
}

async fn delete_deferral(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .service
        .delete_draft(&DeferralId(id), &ctx.caller)
        .instrument(ctx.span("delete_deferral"))
        .await
        .map_err(|error| ctx.lifecycle(error))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_deferral(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<Json<Deferral>> {
    let deferral = state
        .service
        .submit(&DeferralId(id), &ctx.caller)
        .instrument(ctx.span("submit_deferral"))
        .await
        .map_err(|error| ctx.lifecycle(error))?;
    Ok(Json(deferral))
}

async fn resubmit_deferral(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    JsonBody(content): JsonBody<DeferralContent>,
) -> ApiResult<Json<Deferral>> {
    let deferral = state
        .service
        .resubmit(&DeferralId(id), &ctx.caller, content)
        .instrument(ctx.span("resubmit_deferral"))
        .await
        .map_err(|error| ctx.lifecycle(error))?;
    Ok(Json(deferral))
}

async fn start_review(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<Json<Deferral>> {
    let deferral = state
        .service
        .start_review(&DeferralId(id), &ctx.caller)
        .instrument(ctx.span("start_review"))
        .await
        .map_err(|error| ctx.lifecycle(error))?;
    Ok(Json(deferral))
}

async fn approve_review(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<ApproveBody>,
) -> ApiResult<Json<Deferral>> {
    let roles = body.roles(&ctx)?;
    let deferral = state
        .service
        .review_approve(&DeferralId(id), &ctx.caller, body.comments, roles)
        .instrument(ctx.span("approve_review"))
        .await
        .map_err(|error| ctx.lifecycle(error))?;
    Ok(Json(deferral))
}

async fn return_review(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<ReturnBody>,
) -> ApiResult<Json<Deferral>> {
    let deferral = state
        .service
        .review_return(&DeferralId(id), &ctx.caller, &body.comments)
        .instrument(ctx.span("return_review"))
        .await
        .map_err(|error| ctx.lifecycle(error))?;
    Ok(Json(deferral))
}

async fn sign_deferral(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<SignBody>,
) -> ApiResult<Json<SignResponse>> {
    let request = body.into_request(&ctx)?;
    let receipt = state
        .service
        .sign(&DeferralId(id), &ctx.caller, request)
        .instrument(ctx.span("sign_deferral"))
        .await
        .map_err(|error| ctx.lifecycle(error))?;
    Ok(Json(SignResponse { deferral: receipt.deferral, completed_now: receipt.completed_now }))
}

async fn audit_trail(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    let entries = state
        .service
        .audit_trail(&DeferralId(id))
        .instrument(ctx.span("audit_trail"))
        .await
        .map_err(|error| ctx.lifecycle(error))?;
    Ok(Json(entries))
}

async fn list_notifications(
    State(state): State<ApiState>,
    ctx: RequestContext,
) -> ApiResult<Json<Inbox>> {
    let inbox = state
        .outbox
        .list_for_user(&ctx.caller, INBOX_LIMIT)
        .instrument(ctx.span("list_notifications"))
        .await
        .map_err(|error| ctx.persistence(error))?;
    Ok(Json(inbox))
}

async fn mark_notification_read(
    State(state): State<ApiState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let updated = state
        .outbox
        .mark_read(&ctx.caller, &id)
        .instrument(ctx.span("mark_notification_read"))
        .await
        .map_err(|error| ctx.persistence(error))?;
    if !updated {
        return Err(ctx.not_found(format!("notification `{id}` not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_all_notifications_read(
    State(state): State<ApiState>,
    ctx: RequestContext,
) -> ApiResult<Json<MarkAllResponse>> {
    let updated = state
        .outbox
        .mark_all_read(&ctx.caller)
        .instrument(ctx.span("mark_all_notifications_read"))
        .await
        .map_err(|error| ctx.persistence(error))?;
    Ok(Json(MarkAllResponse { updated }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        Router,
    };
    use deferra_core::config::LifecycleConfig;
    use deferra_core::{Deferral, DeferralStatus};
    use deferra_db::fixtures::{
        demo_content, demo_users, DEMO_DFGM_ID, DEMO_HEAD_ID, DEMO_INITIATOR_ID,
        DEMO_RELIABILITY_ID,
    };
    use deferra_db::{connect_with_settings, migrations, Inbox, SqlIdentityDirectory};
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, ApiState, ErrorBody, SignResponse, CALLER_HEADER, CORRELATION_HEADER};

    type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

    async fn app() -> TestResult<Router> {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await?;
        migrations::run_pending(&pool).await?;
        let directory = SqlIdentityDirectory::new(pool.clone());
        for user in demo_users() {
            directory.save(&user).await?;
        }
        let lifecycle =
            LifecycleConfig { max_conflict_retries: 3, code_prefix: "DEF".to_owned() };
        Ok(router(ApiState::new(pool, &lifecycle)))
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        caller: Option<&str>,
        body: Option<Value>,
    ) -> TestResult<(StatusCode, Vec<u8>)> {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(caller) = caller {
            request = request.header(CALLER_HEADER, caller);
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => request.body(Body::empty())?,
        };

        let response = app.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, bytes.to_vec()))
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> TestResult<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    async fn create_and_submit(app: &Router) -> TestResult<Deferral> {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/deferrals",
            Some(DEMO_INITIATOR_ID),
            Some(serde_json::to_value(demo_content())?),
        )
        .await?;
        assert_eq!(status, StatusCode::CREATED);
        let draft: Deferral = decode(&body)?;
        assert_eq!(draft.status, DeferralStatus::Draft);
        assert!(draft.code.0.starts_with("DEF-"));

        let (status, body) = call(
            app,
            Method::POST,
            &format!("/api/deferrals/{}/submit", draft.id),
            Some(DEMO_INITIATOR_ID),
            None,
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        Ok(decode(&body)?)
    }

    #[tokio::test]
    async fn full_workflow_over_http() -> TestResult {
        let app = app().await?;
        let submitted = create_and_submit(&app).await?;
        assert_eq!(submitted.status, DeferralStatus::Submitted);
        let base = format!("/api/deferrals/{}", submitted.id);

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("{base}/review/approve"),
            Some(DEMO_RELIABILITY_ID),
            Some(json!({ "comments": "ok", "required_signatures": ["department_head", "dfgm"] })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        let approved: Deferral = decode(&body)?;
        assert_eq!(approved.status, DeferralStatus::PendingSignatures);

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("{base}/sign"),
            Some(DEMO_HEAD_ID),
            Some(json!({ "role": "department_head", "signer_name": "Layla Nasser" })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        let first: SignResponse = decode(&body)?;
        assert_eq!(first.deferral.status, DeferralStatus::PartiallyApproved);
        assert!(!first.completed_now);

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("{base}/sign"),
            Some(DEMO_DFGM_ID),
            Some(json!({ "role": "dfgm", "signer_name": "Karim Aziz", "comments": "fine" })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        let second: SignResponse = decode(&body)?;
        assert_eq!(second.deferral.status, DeferralStatus::FullyApproved);
        assert!(second.completed_now);

        let (status, body) =
            call(&app, Method::GET, &format!("{base}/audit"), Some(DEMO_INITIATOR_ID), None)
                .await?;
        assert_eq!(status, StatusCode::OK);
        let trail: Vec<Value> = decode(&body)?;
        assert_eq!(trail.len(), 5);

        let (status, body) =
            call(&app, Method::GET, "/api/notifications", Some(DEMO_INITIATOR_ID), None).await?;
        assert_eq!(status, StatusCode::OK);
        let inbox: Inbox = decode(&body)?;
        assert_eq!(inbox.notifications.len(), 3);
        assert_eq!(inbox.unread_count, 3);

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/notifications/read-all",
            Some(DEMO_INITIATOR_ID),
            None,
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        let marked: Value = decode(&body)?;
        assert_eq!(marked["updated"].as_u64(), Some(inbox.unread_count));
        Ok(())
    }

    #[tokio::test]
    async fn lifecycle_errors_map_to_http_statuses() -> TestResult {
        let app = app().await?;
        let submitted = create_and_submit(&app).await?;
        let base = format!("/api/deferrals/{}", submitted.id);

        let (status, body) =
            call(&app, Method::POST, &format!("{base}/submit"), Some(DEMO_RELIABILITY_ID), None)
                .await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let error: ErrorBody = decode(&body)?;
        assert_eq!(error.error, "forbidden");

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("{base}/sign"),
            Some(DEMO_DFGM_ID),
            Some(json!({ "role": "dfgm", "signer_name": "Karim Aziz" })),
        )
        .await?;
        assert_eq!(status, StatusCode::CONFLICT);
        let error: ErrorBody = decode(&body)?;
        assert_eq!(error.error, "conflict");

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("{base}/review/return"),
            Some(DEMO_RELIABILITY_ID),
            Some(json!({ "comments": "   " })),
        )
        .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorBody = decode(&body)?;
        assert_eq!(error.field.as_deref(), Some("comments"));

        let (status, _) = call(
            &app,
            Method::GET,
            "/api/deferrals/does-not-exist",
            Some(DEMO_INITIATOR_ID),
            None,
        )
        .await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn missing_caller_is_forbidden_and_keeps_correlation_id() -> TestResult {
        let app = app().await?;
        let request = Request::builder()
            .method(Method::GET)
            .uri("/api/deferrals")
            .header(CORRELATION_HEADER, "req-42")
            .body(Body::empty())?;

        let response = app.oneshot(request).await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let error: ErrorBody = decode(&bytes)?;
        assert_eq!(error.correlation_id, "req-42");
        Ok(())
    }

    #[tokio::test]
    async fn list_filters_validate_query_values() -> TestResult {
        let app = app().await?;
        create_and_submit(&app).await?;

        let (status, body) = call(
            &app,
            Method::GET,
            "/api/deferrals?status=submitted&department=Instrument",
            Some(DEMO_RELIABILITY_ID),
            None,
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        let listed: Vec<Deferral> = decode(&body)?;
        assert_eq!(listed.len(), 1);

        let (status, body) = call(
            &app,
            Method::GET,
            "/api/deferrals?status=approved_by_reliability",
            Some(DEMO_RELIABILITY_ID),
            None,
        )
        .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorBody = decode(&body)?;
        assert_eq!(error.field.as_deref(), Some("status"));
        Ok(())
    }

    #[tokio::test]
    async fn draft_delete_and_notification_ownership() -> TestResult {
        let app = app().await?;
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/deferrals",
            Some(DEMO_INITIATOR_ID),
            Some(serde_json::to_value(demo_content())?),
        )
        .await?;
        assert_eq!(status, StatusCode::CREATED);
        let draft: Deferral = decode(&body)?;
        let uri = format!("/api/deferrals/{}", draft.id);

        let (status, _) = call(&app, Method::DELETE, &uri, Some(DEMO_HEAD_ID), None).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&app, Method::DELETE, &uri, Some(DEMO_INITIATOR_ID), None).await?;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&app, Method::GET, &uri, Some(DEMO_INITIATOR_ID), None).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/notifications/unknown/read",
            Some(DEMO_INITIATOR_ID),
            None,
        )
        .await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_roles_and_malformed_bodies_get_structured_errors() -> TestResult {
        let app = app().await?;
        let submitted = create_and_submit(&app).await?;
        let base = format!("/api/deferrals/{}", submitted.id);

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("{base}/review/approve"),
            Some(DEMO_RELIABILITY_ID),
            Some(json!({ "required_signatures": ["department_head", "plant_manager"] })),
        )
        .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorBody = decode(&body)?;
        assert_eq!(error.error, "bad_request");
        assert_eq!(error.field.as_deref(), Some("required_signatures"));
        assert!(error.detail.contains("plant_manager"));

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("{base}/review/approve"),
            Some(DEMO_RELIABILITY_ID),
            Some(json!({ "required_signatures": ["dfgm"] })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decode::<Deferral>(&body)?.status, DeferralStatus::PendingSignatures);

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("{base}/sign"),
            Some(DEMO_DFGM_ID),
            Some(json!({ "role": "plant_manager", "signer_name": "Karim Aziz" })),
        )
        .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorBody = decode(&body)?;
        assert_eq!(error.field.as_deref(), Some("role"));

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("{base}/sign"),
            Some(DEMO_DFGM_ID),
            Some(json!({ "role": "dfgm" })),
        )
        .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorBody = decode(&body)?;
        assert_eq!(error.error, "bad_request");
        assert!(error.field.is_none());
        assert!(!error.correlation_id.is_empty());
        Ok(())
    }
}
