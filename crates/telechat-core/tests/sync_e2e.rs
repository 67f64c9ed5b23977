//! End-to-end tests against an in-process agenda/document server.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use reqwest::Url;
use tempfile::tempdir;
use tokio::net::TcpListener;

use telechat_core::{
    run_sync, Agenda, AgendaFormat, AgendaSource, DocumentId, FetchCoordinator, FetchOutcome,
    HttpAgendaSource, SyncError,
};

const AGENDA_HTML: &str = r#"<html><body>
<h2>IESG telechat 2024-01-10.</h2>
<a href="/doc/draft-ietf-foo/">draft-ietf-foo-01</a>
<a href="/doc/draft-ietf-bar/">draft-ietf-bar-07</a>
<h2>IESG telechat 2024-01-24.</h2>
<a href="/doc/draft-ietf-baz/">draft-ietf-baz-00</a>
</body></html>"#;

const AGENDA_JSON: &str = r#"{
    "telechat-date": "2024-01-10",
    "sections": {
        "1.1": {"title": "Roll call"},
        "2.1.1": {"docs": [{"docname": "draft-ietf-foo", "rev": "01"}]},
        "3.1.1": {"docs": [{"docname": "draft-ietf-bar", "rev": "07"}]}
    }
}"#;

#[derive(Default)]
struct ServerState {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: AtomicUsize,
}

fn pdf_body(file: &str) -> Vec<u8> {
    format!("%PDF-1.4\n% {}\n%%EOF\n", file).into_bytes()
}

async fn serve_pdf(State(state): State<Arc<ServerState>>, UrlPath(file): UrlPath<String>) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(now, Ordering::SeqCst);

    if file.starts_with("draft-slow") {
        tokio::time::sleep(Duration::from_secs(30)).await;
    } else if file.starts_with("draft-delay") {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    let response = if file.starts_with("draft-missing") {
        StatusCode::NOT_FOUND.into_response()
    } else {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/pdf")],
            pdf_body(&file),
        )
            .into_response()
    };

    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    response
}

async fn start_server() -> (SocketAddr, Arc<ServerState>) {
    let state = Arc::new(ServerState::default());
    let app = Router::new()
        .route("/pdf/:file", get(serve_pdf))
        .route("/agenda/", get(|| async { ([(header::CONTENT_TYPE, "text/html")], AGENDA_HTML) }))
        .route(
            "/agenda.json",
            get(|| async { ([(header::CONTENT_TYPE, "application/json")], AGENDA_JSON) }),
        )
        .route(
            "/untyped",
            get(|| async { ([(header::CONTENT_TYPE, "text/plain")], AGENDA_JSON) }),
        )
        .route(
            "/broken.json",
            get(|| async { ([(header::CONTENT_TYPE, "application/json")], r#"{"sections": {}}"#) }),
        )
        .route("/down", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .with_state(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn coordinator(addr: SocketAddr) -> FetchCoordinator {
    let base = Url::parse(&format!("http://{}/pdf/", addr)).unwrap();
    FetchCoordinator::new(reqwest::Client::new(), base)
}

fn agenda(pairs: &[(&str, &str)]) -> Agenda {
    pairs.iter().copied().collect()
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).unwrap().len()
}

// ── Fetch coordinator ─────────────────────────────────────────────────────

#[tokio::test]
async fn single_document_is_downloaded_into_date_directory() {
    let (addr, _state) = start_server().await;
    let dir = tempdir().unwrap();

    let report = coordinator(addr)
        .sync_all(dir.path(), &agenda(&[("2024-01-10", "draft-foo-01")]))
        .await
        .unwrap();

    let path = dir.path().join("2024-01-10/draft-foo-01.pdf");
    let expected = pdf_body("draft-foo-01.pdf");
    assert!(dir.path().join("2024-01-10").is_dir());
    assert_eq!(std::fs::read(&path).unwrap(), expected);
    assert_eq!(
        report.lines(),
        vec![format!(
            "2024-01-10: Downloaded draft-foo-01.pdf: {} bytes.",
            expected.len()
        )]
    );
}

#[tokio::test]
async fn rerun_reports_already_existed_and_leaves_file_untouched() {
    let (addr, state) = start_server().await;
    let dir = tempdir().unwrap();
    let agenda = agenda(&[("2024-01-10", "draft-foo-01")]);
    let coordinator = coordinator(addr);

    coordinator.sync_all(dir.path(), &agenda).await.unwrap();
    let path = dir.path().join("2024-01-10/draft-foo-01.pdf");
    let before = std::fs::metadata(&path).unwrap();

    let report = coordinator.sync_all(dir.path(), &agenda).await.unwrap();
    let after = std::fs::metadata(&path).unwrap();

    assert_eq!(
        report.lines(),
        vec!["2024-01-10: draft-foo-01.pdf already existed.".to_string()]
    );
    assert_eq!(before.len(), after.len());
    assert_eq!(before.modified().unwrap(), after.modified().unwrap());
    assert_eq!(state.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn every_success_becomes_already_existed_on_second_run() {
    let (addr, _state) = start_server().await;
    let dir = tempdir().unwrap();
    let agenda = agenda(&[
        ("2024-01-10", "draft-a-00"),
        ("2024-01-10", "draft-b-03"),
        ("2024-01-24", "draft-c-11"),
    ]);
    let coordinator = coordinator(addr);

    let first = coordinator.sync_all(dir.path(), &agenda).await.unwrap();
    let second = coordinator.sync_all(dir.path(), &agenda).await.unwrap();

    assert_eq!(first.downloaded(), 3);
    assert_eq!(second.existed(), 3);
    assert_eq!(second.len(), 3);
}

#[tokio::test]
async fn two_dates_produce_two_directories_regardless_of_arrival_order() {
    let (addr, _state) = start_server().await;
    let dir = tempdir().unwrap();

    let report = coordinator(addr)
        .sync_all(
            dir.path(),
            &agenda(&[("2024-01-10", "draft-delay-a-00"), ("2024-01-24", "draft-b-00")]),
        )
        .await
        .unwrap();

    assert_eq!(report.len(), 2);
    assert_eq!(report.downloaded(), 2);
    assert!(dir.path().join("2024-01-10/draft-delay-a-00.pdf").is_file());
    assert!(dir.path().join("2024-01-24/draft-b-00.pdf").is_file());

    let mut dates: Vec<_> = report.outcomes.iter().map(FetchOutcome::date).collect();
    dates.sort();
    assert_eq!(dates, vec!["2024-01-10", "2024-01-24"]);
}

#[tokio::test]
async fn same_document_on_two_dates_is_fetched_into_both() {
    // Drafts that stay on the agenda across telechats are mirrored per date.
    let (addr, _state) = start_server().await;
    let dir = tempdir().unwrap();

    let report = coordinator(addr)
        .sync_all(
            dir.path(),
            &agenda(&[("2024-01-10", "draft-foo-01"), ("2024-01-24", "draft-foo-01")]),
        )
        .await
        .unwrap();

    assert_eq!(report.downloaded(), 2);
    assert!(dir.path().join("2024-01-10/draft-foo-01.pdf").is_file());
    assert!(dir.path().join("2024-01-24/draft-foo-01.pdf").is_file());
}

#[tokio::test]
async fn failed_request_does_not_block_other_documents() {
    let (addr, _state) = start_server().await;
    let dir = tempdir().unwrap();

    let report = coordinator(addr)
        .sync_all(
            dir.path(),
            &agenda(&[
                ("2024-01-10", "draft-missing-00"),
                ("2024-01-10", "draft-ok-01"),
                ("2024-01-10", "draft-ok-02"),
            ]),
        )
        .await
        .unwrap();

    assert_eq!(report.len(), 3);
    assert_eq!(report.downloaded(), 2);
    assert_eq!(report.failed(), 1);

    let failure = report
        .outcomes
        .iter()
        .find(|o| o.is_error())
        .unwrap()
        .to_string();
    assert!(failure.starts_with("Error while downloading"), "{}", failure);
    assert!(failure.contains("draft-missing-00.pdf"));
    assert!(failure.contains("404"));
}

#[tokio::test]
async fn stalled_document_times_out_and_others_complete() {
    let (addr, _state) = start_server().await;
    let dir = tempdir().unwrap();

    let report = coordinator(addr)
        .with_item_timeout(Duration::from_millis(400))
        .sync_all(
            dir.path(),
            &agenda(&[
                ("2024-01-10", "draft-slow-00"),
                ("2024-01-10", "draft-ok-00"),
                ("2024-01-24", "draft-ok-01"),
            ]),
        )
        .await
        .unwrap();

    assert_eq!(report.len(), 3);
    assert_eq!(report.timed_out(), 1);
    assert_eq!(report.downloaded(), 2);
    assert!(report
        .lines()
        .iter()
        .any(|l| l.starts_with("Timeout downloading a draft") && l.contains("draft-slow-00.pdf")));
}

#[tokio::test]
async fn outcome_count_matches_identifier_count() {
    let (addr, _state) = start_server().await;
    let dir = tempdir().unwrap();
    std::fs::create_dir(dir.path().join("2024-01-10")).unwrap();
    std::fs::write(dir.path().join("2024-01-10/draft-have-00.pdf"), b"%PDF").unwrap();

    let agenda = agenda(&[
        ("2024-01-10", "draft-have-00"),
        ("2024-01-10", "draft-missing-00"),
        ("2024-01-10", "draft-slow-00"),
        ("2024-01-24", "draft-ok-00"),
        ("Unknown-date", "draft-ok-01"),
    ]);

    let report = coordinator(addr)
        .with_workers(2)
        .with_item_timeout(Duration::from_millis(300))
        .sync_all(dir.path(), &agenda)
        .await
        .unwrap();

    assert_eq!(report.len(), agenda.len());
    assert_eq!(report.existed(), 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.timed_out(), 1);
    assert_eq!(report.downloaded(), 2);
}

#[tokio::test]
async fn worker_pool_caps_concurrent_requests() {
    let (addr, state) = start_server().await;
    let dir = tempdir().unwrap();
    let pairs: Vec<(String, String)> = (0..8)
        .map(|i| ("2024-01-10".to_string(), format!("draft-delay-{}-00", i)))
        .collect();
    let agenda: Agenda = pairs.iter().map(|(d, i)| (d.as_str(), i.as_str())).collect();

    let report = coordinator(addr)
        .with_workers(2)
        .sync_all(dir.path(), &agenda)
        .await
        .unwrap();

    assert_eq!(report.downloaded(), 8);
    assert!(state.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn cancellation_reports_one_outcome_per_document() {
    let (addr, _state) = start_server().await;
    let dir = tempdir().unwrap();
    let coordinator = coordinator(addr).with_workers(1);
    let token = coordinator.cancellation_token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let report = coordinator
        .sync_all(
            dir.path(),
            &agenda(&[
                ("2024-01-10", "draft-slow-00"),
                ("2024-01-10", "draft-slow-01"),
                ("2024-01-10", "draft-slow-02"),
            ]),
        )
        .await
        .unwrap();

    assert_eq!(report.len(), 3);
    assert_eq!(report.cancelled(), 3);
}

#[tokio::test]
async fn racing_fetches_for_the_same_path_write_it_once() {
    let (addr, state) = start_server().await;
    let dir = tempdir().unwrap();
    std::fs::create_dir(dir.path().join("2024-01-10")).unwrap();
    let coordinator = coordinator(addr);
    let id = DocumentId::new("draft-delay-race-00");

    let (a, b) = tokio::join!(
        coordinator.fetch_document(dir.path(), "2024-01-10", &id),
        coordinator.fetch_document(dir.path(), "2024-01-10", &id),
    );

    let downloaded = [&a, &b]
        .iter()
        .filter(|o| matches!(o, FetchOutcome::Downloaded { .. }))
        .count();
    let existed = [&a, &b]
        .iter()
        .filter(|o| matches!(o, FetchOutcome::AlreadyExisted { .. }))
        .count();
    assert_eq!((downloaded, existed), (1, 1));
    assert_eq!(state.requests.load(Ordering::SeqCst), 1);
    assert_eq!(
        file_len(&dir.path().join("2024-01-10/draft-delay-race-00.pdf")),
        pdf_body("draft-delay-race-00.pdf").len() as u64
    );
}

// ── Agenda source ─────────────────────────────────────────────────────────

fn source(addr: SocketAddr, path: &str, format: AgendaFormat) -> HttpAgendaSource {
    HttpAgendaSource::new(
        reqwest::Client::new(),
        &format!("http://{}{}", addr, path),
        format,
    )
}

#[tokio::test]
async fn html_agenda_is_grouped_by_telechat_date() {
    let (addr, _state) = start_server().await;

    let agenda = source(addr, "/agenda/", AgendaFormat::Html).fetch().await.unwrap();

    assert_eq!(agenda.len(), 3);
    assert_eq!(
        agenda.documents("2024-01-10"),
        &[DocumentId::new("draft-ietf-foo-01"), DocumentId::new("draft-ietf-bar-07")]
    );
    assert_eq!(agenda.documents("2024-01-24"), &[DocumentId::new("draft-ietf-baz-00")]);
}

#[tokio::test]
async fn json_agenda_is_detected_automatically() {
    let (addr, _state) = start_server().await;

    let by_header = source(addr, "/agenda.json", AgendaFormat::Auto).fetch().await.unwrap();
    let by_body = source(addr, "/untyped", AgendaFormat::Auto).fetch().await.unwrap();

    assert_eq!(by_header, by_body);
    assert_eq!(
        by_header.documents("2024-01-10"),
        &[DocumentId::new("draft-ietf-foo-01"), DocumentId::new("draft-ietf-bar-07")]
    );
}

#[tokio::test]
async fn malformed_agenda_aborts_before_any_directory_is_created() {
    let (addr, state) = start_server().await;
    let dir = tempdir().unwrap();

    let err = run_sync(
        &source(addr, "/broken.json", AgendaFormat::Json),
        &coordinator(addr),
        dir.path(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, SyncError::Decode(_)));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    assert_eq!(state.requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn server_error_is_a_fetch_failure() {
    let (addr, _state) = start_server().await;

    let err = source(addr, "/down", AgendaFormat::Auto).fetch().await.unwrap_err();

    assert!(matches!(err, SyncError::FetchStatus { status: 500, .. }));
}

#[tokio::test]
async fn unreachable_agenda_host_is_a_fetch_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = source(addr, "/agenda/", AgendaFormat::Auto).fetch().await.unwrap_err();

    assert!(matches!(err, SyncError::Fetch { .. }));
}

#[tokio::test]
async fn run_sync_mirrors_the_html_agenda() {
    let (addr, _state) = start_server().await;
    let dir = tempdir().unwrap();

    let report = run_sync(
        &source(addr, "/agenda/", AgendaFormat::Auto),
        &coordinator(addr),
        dir.path(),
    )
    .await
    .unwrap();

    assert_eq!(report.downloaded(), 3);
    assert!(dir.path().join("2024-01-10/draft-ietf-foo-01.pdf").is_file());
    assert!(dir.path().join("2024-01-10/draft-ietf-bar-07.pdf").is_file());
    assert!(dir.path().join("2024-01-24/draft-ietf-baz-00.pdf").is_file());
}
