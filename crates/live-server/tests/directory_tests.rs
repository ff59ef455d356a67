//! REST directory client tests against a local backend that serves the
//! same routes and `{data, error}` bodies as the classroom backend.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{delete, get};
use axum::{Json, Router};
use live_protocol::{Identity, LiveError, Role};
use live_server::{
    ClassroomDirectory, DirectoryError, HttpDirectory, RegistryConfig, SessionRegistry,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

const STUDENT_TOKEN: &str = "student-token";
const TEACHER_TOKEN: &str = "teacher-token";

/// Requests seen by the backend, as `METHOD path token`.
type RequestLog = Arc<Mutex<Vec<String>>>;

fn log(requests: &RequestLog, method: &str, path: &str, headers: &HeaderMap) {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("-");
    requests.lock().push(format!("{method} {path} {token}"));
}

async fn list_classrooms(State(requests): State<RequestLog>, headers: HeaderMap) -> Json<Value> {
    log(&requests, "GET", "/classrooms", &headers);
    Json(json!({
        "data": [
            { "id": 7, "name": "Algebra", "teacher_id": 1, "is_public": true },
            { "id": 8, "name": "Chemistry", "teacher_id": 5, "is_public": false },
        ],
        "error": null,
    }))
}

async fn list_sessions(State(requests): State<RequestLog>, headers: HeaderMap) -> Json<Value> {
    log(&requests, "GET", "/sessions", &headers);
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let data = if auth == format!("Bearer {STUDENT_TOKEN}") {
        json!([{ "id": 3, "classroom_id": 7, "user_id": 2, "is_teacher": false }])
    } else if auth == format!("Bearer {TEACHER_TOKEN}") {
        json!([{ "id": 1, "classroom_id": 7, "user_id": 1, "is_teacher": true }])
    } else {
        json!([])
    };
    Json(json!({ "data": data, "error": null }))
}

async fn leave_session(State(requests): State<RequestLog>, headers: HeaderMap) -> Json<Value> {
    log(&requests, "DELETE", "/sessions", &headers);
    Json(json!({ "data": { "id": 2 }, "error": null }))
}

async fn delete_classroom(
    State(requests): State<RequestLog>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Json<Value> {
    log(&requests, "DELETE", &format!("/classrooms/{id}"), &headers);
    Json(json!({ "data": { "id": id }, "error": null }))
}

/// Serve `app` on a random port; returns its base URL.
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Start the fake backend; only the routes the real backend exposes.
async fn start_backend() -> (HttpDirectory, RequestLog) {
    let requests = RequestLog::default();
    let app = Router::new()
        .route("/classrooms", get(list_classrooms))
        .route("/classrooms/{id}", delete(delete_classroom))
        .route("/sessions", get(list_sessions).delete(leave_session))
        .with_state(requests.clone());
    let base = serve(app).await;
    let directory = HttpDirectory::new(base, Duration::from_secs(2)).unwrap();
    (directory, requests)
}

fn student() -> Identity {
    Identity::new("2").with_token(STUDENT_TOKEN)
}

fn teacher() -> Identity {
    Identity::new("1").with_token(TEACHER_TOKEN)
}

#[tokio::test]
async fn classroom_is_found_in_the_listing() {
    let (directory, requests) = start_backend().await;

    let record = directory.classroom(7, &student()).await.unwrap().unwrap();
    assert_eq!(record.id, 7);
    assert_eq!(record.teacher_id, "1");
    assert_eq!(record.name.as_deref(), Some("Algebra"));
    assert!(!record.deleted);

    assert!(directory.classroom(99, &student()).await.unwrap().is_none());

    let requests = requests.lock().clone();
    assert_eq!(
        requests,
        vec![
            format!("GET /classrooms {STUDENT_TOKEN}"),
            format!("GET /classrooms {STUDENT_TOKEN}"),
        ]
    );
}

#[tokio::test]
async fn membership_comes_from_the_callers_sessions() {
    let (directory, requests) = start_backend().await;

    let membership = directory.membership(7, &student()).await.unwrap().unwrap();
    assert_eq!(membership.user_id, "2");
    assert!(!membership.is_teacher);

    assert!(directory.membership(8, &student()).await.unwrap().is_none());
    assert!(
        directory
            .membership(7, &Identity::new("9"))
            .await
            .unwrap()
            .is_none()
    );

    assert_eq!(requests.lock()[0], format!("GET /sessions {STUDENT_TOKEN}"));
    assert_eq!(requests.lock()[2], "GET /sessions -");
}

#[tokio::test]
async fn deletions_use_the_backend_routes() {
    let (directory, requests) = start_backend().await;

    directory.delete_membership(7, &student()).await.unwrap();
    directory.delete_classroom(7, &teacher()).await.unwrap();

    assert_eq!(
        requests.lock().clone(),
        vec![
            format!("DELETE /sessions {STUDENT_TOKEN}"),
            format!("DELETE /classrooms/7 {TEACHER_TOKEN}"),
        ]
    );
}

#[tokio::test]
async fn failing_backend_surfaces_the_status() {
    let app = Router::new().route(
        "/classrooms",
        get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
    );
    let directory = HttpDirectory::new(serve(app).await, Duration::from_secs(2)).unwrap();

    let err = directory.classroom(7, &student()).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Status { status: 500, .. }));
}

#[tokio::test]
async fn registry_admits_through_the_rest_backend() {
    let (directory, _) = start_backend().await;
    let registry = SessionRegistry::new(Arc::new(directory), RegistryConfig::default());

    let admission = registry.admit(7, student()).await.unwrap();
    assert_eq!(admission.role, Role::Student);
    assert_eq!(admission.classroom.teacher_id, "1");

    let admission = registry.admit(7, teacher()).await.unwrap();
    assert_eq!(admission.role, Role::Teacher);

    let err = registry.admit(8, student()).await.unwrap_err();
    assert!(matches!(err, LiveError::NotEnrolled { .. }));

    let err = registry.admit(99, student()).await.unwrap_err();
    assert!(matches!(err, LiveError::UnknownClassroom(99)));
}
