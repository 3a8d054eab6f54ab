use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;

use crate::auth::{self, AuthUser};
use crate::config::Config;
use crate::db::{self, CreditTransaction, Faculty, Program, Student, UserRecord};
use crate::error::ApiError;

/// Shared application state, constructed once in the server binary and
/// injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(conn: Connection, config: Config) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            config: Arc::new(config),
        }
    }
}

/// API Response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

// ============================================================================
// Request / response types
// ============================================================================

/// Registration body, discriminated by `role`. A missing or unknown role,
/// or a missing field, is rejected by the JSON extractor as a client error.
#[derive(Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum RegisterRequest {
    Faculty {
        fid: String,
        name: String,
        password: String,
    },
    Student {
        roll: String,
        name: String,
        course: String,
        year: i64,
        password: String,
    },
}

#[derive(Serialize)]
struct RegisterResponse {
    message: &'static str,
    id: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    fid: Option<String>,
    roll: Option<String>,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    access_token: String,
    role: &'static str,
}

#[derive(Serialize)]
struct ProfileResponse {
    role: &'static str,
    user: serde_json::Value,
}

/// Program creation body: a required calendar date plus whatever other
/// event fields the faculty member chooses to record.
#[derive(Deserialize)]
struct CreateProgramRequest {
    event_date: String,
    #[serde(flatten)]
    fields: HashMap<String, serde_json::Value>,
}

#[derive(Serialize)]
struct CreatedResponse {
    message: &'static str,
    id: String,
}

#[derive(Deserialize)]
struct CreateTransactionRequest {
    receiver_id: String,
    credits: i64,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::ok("OK"))
}

/// POST /api/register - Create a faculty or student account
async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RegisterResponse>>), ApiError> {
    let conn = state.db.lock().unwrap();

    let response = match req {
        RegisterRequest::Faculty {
            fid,
            name,
            password,
        } => {
            if db::find_faculty_by_fid(&conn, &fid)?.is_some() {
                return Err(ApiError::DuplicateKey("Faculty ID"));
            }

            let faculty = Faculty::new(&fid, &name, &auth::hash_password(&password)?);
            db::insert_faculty(&conn, &faculty)?;

            tracing::info!(%fid, "registered faculty");
            RegisterResponse {
                message: "Faculty registered successfully",
                id: faculty.id,
            }
        }
        RegisterRequest::Student {
            roll,
            name,
            course,
            year,
            password,
        } => {
            if db::find_student_by_roll(&conn, &roll)?.is_some() {
                return Err(ApiError::DuplicateKey("Student roll number"));
            }

            let student = Student::new(&roll, &name, &course, year, &auth::hash_password(&password)?);
            db::insert_student(&conn, &student)?;

            tracing::info!(%roll, "registered student");
            RegisterResponse {
                message: "Student registered successfully",
                id: student.id,
            }
        }
    };

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(response))))
}

/// POST /api/login - Verify credentials and issue a token
async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, ApiError> {
    let conn = state.db.lock().unwrap();

    // Unknown identifier, wrong password, and a body naming neither fid
    // nor roll all take the same exit: the caller learns nothing about
    // which identifiers exist.
    let (user_id, role, password_hash) = if let Some(fid) = &req.fid {
        match db::find_faculty_by_fid(&conn, fid)? {
            Some(f) => (f.id, "faculty", f.password_hash),
            None => return Err(ApiError::InvalidCredentials),
        }
    } else if let Some(roll) = &req.roll {
        match db::find_student_by_roll(&conn, roll)? {
            Some(s) => (s.id, "student", s.password_hash),
            None => return Err(ApiError::InvalidCredentials),
        }
    } else {
        return Err(ApiError::InvalidCredentials);
    };

    if !auth::verify_password(&req.password, &password_hash) {
        return Err(ApiError::InvalidCredentials);
    }

    let access_token = auth::issue_token(
        &user_id,
        &state.config.jwt_secret,
        state.config.jwt_expires_secs,
    )?;

    Ok(Json(ApiResponse::ok(LoginResponse { access_token, role })))
}

/// GET /api/user - Profile of the authenticated caller
async fn get_user(
    State(state): State<AppState>,
    caller: AuthUser,
) -> Result<Json<ApiResponse<ProfileResponse>>, ApiError> {
    let conn = state.db.lock().unwrap();

    // A valid token whose subject matches neither collection is a
    // dangling token; report the resource as missing.
    let record = db::resolve_user(&conn, &caller.user_id)?.ok_or(ApiError::NotFound("User"))?;

    let profile = match record {
        UserRecord::Faculty(f) => ProfileResponse {
            role: "faculty",
            user: serde_json::to_value(f).map_err(anyhow::Error::from)?,
        },
        UserRecord::Student(s) => ProfileResponse {
            role: "student",
            user: serde_json::to_value(s).map_err(anyhow::Error::from)?,
        },
    };

    Ok(Json(ApiResponse::ok(profile)))
}

/// POST /api/programs - Create a program (faculty only)
async fn create_program(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(req): Json<CreateProgramRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreatedResponse>>), ApiError> {
    let mut conn = state.db.lock().unwrap();

    let faculty = match db::resolve_user(&conn, &caller.user_id)? {
        Some(UserRecord::Faculty(f)) => f,
        _ => return Err(ApiError::Unauthorized),
    };

    let event_date = NaiveDate::parse_from_str(&req.event_date, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest("event_date must be formatted YYYY-MM-DD".to_string()))?;

    let program = Program::new(&faculty.fid, event_date, req.fields);
    db::create_program(&mut conn, &program)?;

    tracing::info!(fid = %faculty.fid, program_id = %program.id, "created program");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(CreatedResponse {
            message: "Program created successfully",
            id: program.id,
        })),
    ))
}

/// GET /api/programs - List all programs
async fn list_programs(
    State(state): State<AppState>,
    _caller: AuthUser,
) -> Result<Json<ApiResponse<Vec<Program>>>, ApiError> {
    let conn = state.db.lock().unwrap();

    Ok(Json(ApiResponse::ok(db::all_programs(&conn)?)))
}

/// POST /api/transactions - Record a credit transaction (faculty only)
async fn create_transaction(
    State(state): State<AppState>,
    caller: AuthUser,
    Json(req): Json<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreatedResponse>>), ApiError> {
    let mut conn = state.db.lock().unwrap();

    let faculty = match db::resolve_user(&conn, &caller.user_id)? {
        Some(UserRecord::Faculty(f)) => f,
        _ => return Err(ApiError::Unauthorized),
    };

    let credit_tx = CreditTransaction::new(&faculty.fid, &req.receiver_id, req.credits);

    if !db::create_credit_transaction(&mut conn, &credit_tx)? {
        return Err(ApiError::NotFound("Student"));
    }

    tracing::info!(
        sender = %credit_tx.sender_id,
        receiver = %credit_tx.receiver_id,
        credits = credit_tx.credits,
        "recorded transaction"
    );

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(CreatedResponse {
            message: "Transaction created successfully",
            id: credit_tx.id,
        })),
    ))
}

/// GET /api/transactions - Transactions involving the caller
async fn list_transactions(
    State(state): State<AppState>,
    caller: AuthUser,
) -> Result<Json<ApiResponse<Vec<CreditTransaction>>>, ApiError> {
    let conn = state.db.lock().unwrap();

    let transactions = match db::resolve_user(&conn, &caller.user_id)? {
        Some(UserRecord::Faculty(f)) => db::transactions_for_sender(&conn, &f.fid)?,
        Some(UserRecord::Student(s)) => db::transactions_for_receiver(&conn, &s.roll)?,
        None => return Err(ApiError::NotFound("User")),
    };

    Ok(Json(ApiResponse::ok(transactions)))
}

/// GET /api/students - List all students (password hashes stripped)
async fn list_students(
    State(state): State<AppState>,
    _caller: AuthUser,
) -> Result<Json<ApiResponse<Vec<Student>>>, ApiError> {
    let conn = state.db.lock().unwrap();

    Ok(Json(ApiResponse::ok(db::all_students(&conn)?)))
}

/// GET /api/students/:roll - Look up a student by roll
async fn get_student(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(roll): Path<String>,
) -> Result<Json<ApiResponse<Student>>, ApiError> {
    let conn = state.db.lock().unwrap();

    // Decode URL-encoded roll
    let decoded_roll = urlencoding::decode(&roll)
        .unwrap_or_else(|_| roll.clone().into())
        .into_owned();

    let student =
        db::find_student_by_roll(&conn, &decoded_roll)?.ok_or(ApiError::NotFound("Student"))?;

    Ok(Json(ApiResponse::ok(student)))
}

/// GET /api/faculty - List all faculty (password hashes stripped)
async fn list_faculty(
    State(state): State<AppState>,
    _caller: AuthUser,
) -> Result<Json<ApiResponse<Vec<Faculty>>>, ApiError> {
    let conn = state.db.lock().unwrap();

    Ok(Json(ApiResponse::ok(db::all_faculty(&conn)?)))
}

/// GET /api/faculty/:fid - Look up a faculty member by fid
async fn get_faculty_member(
    State(state): State<AppState>,
    _caller: AuthUser,
    Path(fid): Path<String>,
) -> Result<Json<ApiResponse<Faculty>>, ApiError> {
    let conn = state.db.lock().unwrap();

    // Decode URL-encoded fid
    let decoded_fid = urlencoding::decode(&fid)
        .unwrap_or_else(|_| fid.clone().into())
        .into_owned();

    let faculty = db::find_faculty_by_fid(&conn, &decoded_fid)?
        .ok_or(ApiError::NotFound("Faculty member"))?;

    Ok(Json(ApiResponse::ok(faculty)))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/user", get(get_user))
        .route("/programs", post(create_program).get(list_programs))
        .route(
            "/transactions",
            post(create_transaction).get(list_transactions),
        )
        .route("/students", get(list_students))
        .route("/students/:roll", get(get_student))
        .route("/faculty", get(list_faculty))
        .route("/faculty/:fid", get(get_faculty_member))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}
