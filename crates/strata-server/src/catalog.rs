//! Education catalog endpoints.
//!
//! Backed by PostgreSQL through the connection manager when `[database]` is
//! configured, otherwise by a fixed in-memory catalog with simulated latency.

use crate::app::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use strata_db::DbError;

const LIST_COURSES: &str =
    "SELECT id, title, level, duration_hours, enrolled FROM courses ORDER BY id";
const GET_COURSE: &str =
    "SELECT id, title, level, duration_hours, enrolled FROM courses WHERE id = $1";
const ENROLL: &str = "INSERT INTO enrollments (course_id, student) VALUES ($1, $2)";

#[derive(Debug, Clone, Serialize)]
pub struct Course {
    pub id: i64,
    pub title: &'static str,
    pub level: &'static str,
    pub duration_hours: i32,
    pub enrolled: i64,
}

static MOCK_COURSES: [Course; 4] = [
    Course {
        id: 1,
        title: "Systems Programming in Rust",
        level: "intermediate",
        duration_hours: 24,
        enrolled: 1280,
    },
    Course {
        id: 2,
        title: "Database Internals",
        level: "advanced",
        duration_hours: 30,
        enrolled: 640,
    },
    Course {
        id: 3,
        title: "Networking Fundamentals",
        level: "beginner",
        duration_hours: 12,
        enrolled: 2210,
    },
    Course {
        id: 4,
        title: "Caching at Scale",
        level: "advanced",
        duration_hours: 8,
        enrolled: 415,
    },
];

#[derive(Debug, Deserialize)]
pub struct EnrollmentRequest {
    pub student: String,
}

#[derive(Debug, Serialize)]
pub struct Enrollment {
    pub course_id: i64,
    pub student: String,
    pub enrolled_at: DateTime<Utc>,
}

/// Handler failure rendered as `{"error": ...}`.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Database(DbError),
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        ApiError::Database(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Database(err) => {
                tracing::error!(error = %err, "catalog query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "database error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// GET /api/courses
pub async fn list_courses(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let Some(db) = &state.db else {
        simulate_latency().await;
        return Ok(Json(json!(MOCK_COURSES)));
    };

    let result = db.query_with_cache("courses:all", LIST_COURSES, &[]).await?;
    Ok(Json(Value::Array(result.to_objects())))
}

/// GET /api/courses/{id}
pub async fn get_course(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let Some(db) = &state.db else {
        simulate_latency().await;
        return MOCK_COURSES
            .iter()
            .find(|c| c.id == id)
            .map(|c| Json(json!(c)))
            .ok_or_else(|| ApiError::NotFound(format!("course {id} not found")));
    };

    let key = format!("courses:{id}");
    let result = db.query_with_cache(&key, GET_COURSE, &[&id]).await?;
    result
        .to_objects()
        .into_iter()
        .next()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("course {id} not found")))
}

/// POST /api/courses/{id}/enrollments
pub async fn enroll(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<EnrollmentRequest>,
) -> Result<(StatusCode, Json<Enrollment>), ApiError> {
    let student = request.student.trim().to_string();
    if student.is_empty() {
        return Err(ApiError::BadRequest("student must not be empty".into()));
    }

    match &state.db {
        Some(db) => {
            db.exec_with_metrics(ENROLL, &[&id, &student]).await?;
        }
        None => {
            simulate_latency().await;
            if !MOCK_COURSES.iter().any(|c| c.id == id) {
                return Err(ApiError::NotFound(format!("course {id} not found")));
            }
        }
    }

    tracing::info!(course_id = id, student = %student, "enrollment created");
    let enrollment = Enrollment {
        course_id: id,
        student,
        enrolled_at: Utc::now(),
    };
    Ok((StatusCode::CREATED, Json(enrollment)))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match &state.db {
        Some(db) => match db.health().await {
            Ok(()) => (StatusCode::OK, "ok"),
            Err(err) => {
                tracing::warn!(error = %err, "health check failed");
                (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
            }
        },
        None => (StatusCode::OK, "ok"),
    }
}

async fn simulate_latency() {
    let delay = Duration::from_millis(rand::thread_rng().gen_range(5..=20));
    tokio::time::sleep(delay).await;
}
