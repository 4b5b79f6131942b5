use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregation::{Aggregator, AggregatorError, BoardAlert, DEFAULT_SILENCE_DURATION};
use crate::config::DEFAULT_DASHBOARD;
use crate::connectors::State as AlertState;
use crate::health::HealthRegistry;
use crate::rules::{matches_all, parse_filter};
use crate::silence::Silence;

/// Header set by the authenticating proxy in front of the board
pub const USER_HEADER: &str = "x-auth-request-user";

/// Application state shared across handlers
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub health: Arc<HealthRegistry>,
}

// ============================================================================
// Health
// ============================================================================

pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let report = state.health.report();
    let status = if report.status.is_failure() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status, Json(report)).into_response()
}

// ============================================================================
// Dashboards
// ============================================================================

#[derive(Serialize)]
pub struct DashboardsResponse {
    pub dashboards: Vec<String>,
}

pub async fn list_dashboards(State(state): State<Arc<AppState>>) -> Json<DashboardsResponse> {
    Json(DashboardsResponse {
        dashboards: state.aggregator.dashboards(),
    })
}

pub async fn default_aggregate(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let aggregate = state.aggregator.alerts(DEFAULT_DASHBOARD)?;
    Ok(Json(aggregate.as_ref()).into_response())
}

pub async fn aggregate(
    State(state): State<Arc<AppState>>,
    Path(dashboard): Path<String>,
) -> Result<Response, ApiError> {
    let aggregate = state.aggregator.alerts(&dashboard)?;
    Ok(Json(aggregate.as_ref()).into_response())
}

// ============================================================================
// Silences
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct SilenceRequest {
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

pub async fn silence_alert(
    State(state): State<Arc<AppState>>,
    Path(alert_id): Path<String>,
    headers: HeaderMap,
    request: Option<Json<SilenceRequest>>,
) -> Result<StatusCode, ApiError> {
    let user = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing user".to_string()))?;

    let duration = request
        .and_then(|Json(r)| r.duration_secs)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_SILENCE_DURATION);

    state.aggregator.silence(&alert_id, user, duration).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub external_id: String,
}

pub async fn link_silence(
    State(state): State<Arc<AppState>>,
    Path(alert_id): Path<String>,
    Json(request): Json<LinkRequest>,
) -> Result<StatusCode, ApiError> {
    if request.external_id.trim().is_empty() {
        return Err(ApiError::BadRequest("external_id must not be empty".to_string()));
    }

    state
        .aggregator
        .link_silence(&alert_id, request.external_id.trim())?;
    Ok(StatusCode::CREATED)
}

pub async fn delete_silence(
    State(state): State<Arc<AppState>>,
    Path(external_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.aggregator.unlink_silence(&external_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_silences(State(state): State<Arc<AppState>>) -> Json<Vec<Silence>> {
    Json(state.aggregator.silences())
}

// ============================================================================
// Alertmanager compatible listing
// ============================================================================

/// Listing parameters. `filter` may repeat; all clauses must match.
#[derive(Debug)]
pub struct AlertsQuery {
    pub active: bool,
    pub inhibited: bool,
    pub filters: Vec<String>,
}

impl AlertsQuery {
    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut query = Self {
            active: true,
            inhibited: true,
            filters: Vec::new(),
        };

        for (key, value) in pairs {
            match key.as_str() {
                "active" if !value.is_empty() => query.active = value == "true",
                "inhibited" if !value.is_empty() => query.inhibited = value == "true",
                "filter" => query.filters.push(value),
                _ => {}
            }
        }
        query
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertView {
    pub fingerprint: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub starts_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub ends_at: DateTime<Utc>,
    pub status: AlertStatusView,
}

#[derive(Serialize)]
pub struct AlertStatusView {
    pub state: &'static str,
}

const STATE_ACTIVE: &str = "active";
const STATE_SUPPRESSED: &str = "suppressed";

fn alert_view(
    dashboard: &str,
    shown: &BoardAlert,
    check_time: Option<DateTime<Utc>>,
    ends_at: DateTime<Utc>,
    state: &'static str,
) -> AlertView {
    let alert = &shown.alert;

    let mut labels = alert.labels.clone();
    labels.insert("dashboard".to_string(), dashboard.to_string());
    let severity = match alert.state {
        AlertState::Critical => "critical",
        AlertState::Warning => "warning",
        _ => "",
    };
    labels.insert("severity".to_string(), severity.to_string());

    let mut annotations = HashMap::from([("summary".to_string(), alert.description.clone())]);
    if !alert.details.is_empty() {
        annotations.insert("description".to_string(), alert.details.clone());
    }

    AlertView {
        fingerprint: alert.id.clone(),
        labels,
        annotations,
        starts_at: alert.start,
        updated_at: check_time,
        ends_at,
        status: AlertStatusView { state },
    }
}

/// Alertmanager-compatible listing over every dashboard. Shown alerts are
/// `active`, blocked ones `suppressed`; green alerts are left out.
pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<AlertView>>, ApiError> {
    let query = AlertsQuery::from_pairs(pairs);

    let mut matchers = Vec::new();
    for filter in query.filters.iter().filter(|f| !f.trim().is_empty()) {
        matchers.extend(parse_filter(filter).map_err(|e| ApiError::BadRequest(e.to_string()))?);
    }

    let ends_at = state.aggregator.now() + chrono::Duration::hours(1);
    let mut views = Vec::new();

    for dashboard in state.aggregator.dashboards() {
        let aggregate = state.aggregator.alerts(&dashboard)?;

        if query.active {
            views.extend(
                aggregate
                    .active()
                    .filter(|shown| shown.alert.state != AlertState::Ok)
                    .map(|shown| alert_view(&dashboard, shown, aggregate.check_time, ends_at, STATE_ACTIVE)),
            );
        }

        if query.inhibited {
            views.extend(
                aggregate
                    .blocked
                    .iter()
                    .map(|blocked| &blocked.alert)
                    .filter(|shown| shown.alert.state != AlertState::Ok)
                    .map(|shown| alert_view(&dashboard, shown, aggregate.check_time, ends_at, STATE_SUPPRESSED)),
            );
        }
    }

    views.retain(|view| matches_all(&matchers, &view.labels));

    Ok(Json(views))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<AggregatorError> for ApiError {
    fn from(e: AggregatorError) -> Self {
        match e {
            AggregatorError::UnknownDashboard(_) | AggregatorError::AlertNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            AggregatorError::NotSilenceable(_) | AggregatorError::NoSilencer => {
                ApiError::BadRequest(e.to_string())
            }
            AggregatorError::Silence(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
