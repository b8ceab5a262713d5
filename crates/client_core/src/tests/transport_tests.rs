use std::sync::atomic::Ordering;

use chrono::NaiveDate;
use shared::{
    domain::{ClassId, Role, ScheduleId, SubjectId},
    protocol::{GenerateSessionRequest, RosterQuery},
};

use super::*;
use crate::mock_backend::{
    roster_row, spawn_mock_backend, spawn_mock_backend_under, TEACHER_PASSWORD, TEACHER_TOKEN,
};

fn roster_query() -> RosterQuery {
    RosterQuery {
        kelas_id: ClassId::new("kelas-1"),
        mata_pelajaran_id: SubjectId::new("mapel-1"),
        tanggal: NaiveDate::from_ymd_opt(2026, 10, 19).expect("date"),
    }
}

#[test]
fn rejects_non_http_base_url() {
    assert!(matches!(
        ClientContext::new("ftp://school.example"),
        Err(AttendanceError::Validation(_))
    ));
    assert!(matches!(
        ClientContext::new("not a url"),
        Err(AttendanceError::Validation(_))
    ));
}

#[test]
fn joins_endpoints_below_base_path() {
    let context = ClientContext::new("https://school.example/api").expect("context");
    let url = context.endpoint(&["qr", "check-active"]).expect("url");
    assert_eq!(url.as_str(), "https://school.example/api/qr/check-active");

    let context = ClientContext::new("https://school.example/api/").expect("context");
    let url = context.endpoint(&["absensi", "a/b"]).expect("url");
    assert_eq!(url.as_str(), "https://school.example/api/absensi/a%2Fb");
}

#[tokio::test]
async fn login_stores_token_and_routes_by_role() {
    let (server_url, backend) = spawn_mock_backend().await.expect("spawn backend");
    let context = ClientContext::new(&server_url).expect("context");
    let mut auth_events = context.subscribe_auth_events();

    let outcome = context
        .login("sari@sekolah.sch.id", TEACHER_PASSWORD)
        .await
        .expect("login");

    assert_eq!(outcome.user.role, Role::Teacher);
    assert_eq!(outcome.route, "/guru/dashboard");
    assert!(context.is_authenticated().await);
    assert_eq!(
        context.current_user().await.map(|user| user.role),
        Some(Role::Teacher)
    );
    assert_eq!(
        auth_events.try_recv().expect("event"),
        AuthEvent::SignedIn {
            route: "/guru/dashboard"
        }
    );

    context.active_sessions().await.expect("authorized call");
    let headers = backend.authorization_headers.lock().await.clone();
    assert_eq!(
        headers.last().cloned().flatten(),
        Some(format!("Bearer {TEACHER_TOKEN}"))
    );
}

#[tokio::test]
async fn login_requires_credentials() {
    let (server_url, backend) = spawn_mock_backend().await.expect("spawn backend");
    let context = ClientContext::new(&server_url).expect("context");

    let err = context.login("  ", "secret").await.expect_err("validation");

    assert!(matches!(err, AttendanceError::Validation(_)));
    assert_eq!(backend.requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unauthorized_clears_credentials_and_requests_login() {
    let (server_url, backend) = spawn_mock_backend().await.expect("spawn backend");
    let context = ClientContext::new(&server_url).expect("context");
    context.set_token("expired-token").await.expect("token");
    let mut auth_events = context.subscribe_auth_events();

    let err = context.active_sessions().await.expect_err("401");

    assert!(matches!(err, AttendanceError::Unauthorized));
    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    assert!(!context.is_authenticated().await);
    assert_eq!(
        auth_events.try_recv().expect("event"),
        AuthEvent::LoginRequired { route: "/login" }
    );

    context.active_sessions().await.expect_err("still signed out");
    let headers = backend.authorization_headers.lock().await.clone();
    assert_eq!(headers.last().cloned().flatten(), None);
}

#[tokio::test]
async fn conflict_and_other_statuses_are_classified() {
    let (server_url, backend) = spawn_mock_backend_under("/api").await.expect("spawn backend");
    let context = ClientContext::new(&server_url).expect("context");
    context.set_token(TEACHER_TOKEN).await.expect("token");
    let request = GenerateSessionRequest {
        jadwal_id: ScheduleId::new("jadwal-1"),
        latitude: -6.2,
        longitude: 106.8,
    };

    context.generate_session(&request).await.expect("first session");
    let err = context
        .generate_session(&request)
        .await
        .expect_err("second session conflicts");
    match err {
        AttendanceError::Conflict { message } => {
            assert_eq!(message, "Masih ada sesi absensi aktif")
        }
        other => panic!("unexpected error: {other}"),
    }

    let err = context
        .update_attendance(
            &shared::domain::AttendanceId::new("missing"),
            &UpdateAttendanceRequest {
                keterangan: shared::domain::AttendanceStatus::Present,
            },
        )
        .await
        .expect_err("404");
    assert!(err.is_network());
    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    assert!(err.to_string().contains("Absensi tidak ditemukan"));
    assert_eq!(backend.active_sessions.lock().await.len(), 1);
}

#[tokio::test]
async fn roster_rows_keep_raw_status_for_validation() {
    let (server_url, backend) = spawn_mock_backend().await.expect("spawn backend");
    backend
        .seed_roster(vec![
            roster_row("a1", "s1", "Hadir"),
            roster_row("a2", "s2", "Terlambat"),
        ])
        .await;
    let context = ClientContext::new(&server_url).expect("context");
    context.set_token(TEACHER_TOKEN).await.expect("token");

    let rows = context
        .session_roster(&roster_query())
        .await
        .expect("rows decode");

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].keterangan, "Terlambat");
    assert_eq!(rows[0].siswa.id(), "s1");
    let queries = backend.roster_queries.lock().await.clone();
    assert_eq!(queries[0].get("tanggal").map(String::as_str), Some("2026-10-19"));
}
