use acquigraph::aggregate::{self, YearMetric};
use acquigraph::config::{ColumnMap, Preset};
use acquigraph::dashboard::ChartId;
use acquigraph::data::RecordTable;
use acquigraph::error::{LoadError, SchemaError};
use acquigraph::server::{router, AppState};
use acquigraph::session::Session;
use acquigraph::RenderOptions;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

fn load(name: &str, preset: Preset) -> RecordTable {
    RecordTable::from_path(Path::new(&format!("test/{}.csv", name)), &ColumnMap::preset(preset))
        .expect("Failed to load test CSV")
}

fn app(name: &str, preset: Preset) -> Router {
    let render = RenderOptions {
        width: 400,
        height: 300,
        ..RenderOptions::default()
    };
    router(Arc::new(AppState::new(Arc::new(load(name, preset)), render)))
}

/// Check if bytes are a valid PNG
fn is_valid_png(bytes: &[u8]) -> bool {
    bytes.len() > 8 && bytes[0..8] == [137, 80, 78, 71, 13, 10, 26, 10]
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, bytes) = send(app, request).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[test]
fn test_books_dashboard_builds_every_chart() {
    let table = load("books", Preset::Books);
    let session = Session::new(&table);
    assert!(session.failures().is_empty(), "failures: {:?}", session.failures());
    assert_eq!(session.charts().len(), ChartId::ALL.len());
}

#[test]
fn test_default_schema_reads_books() {
    let table = load("books", Preset::default());
    assert_eq!(table.noun(), "books");
    let session = Session::new(&table);
    assert!(session.failures().is_empty(), "failures: {:?}", session.failures());
    assert!(session.chart(ChartId::PagesHistogram).is_some());
}

#[test]
fn test_museum_dashboard_skips_numeric_charts() {
    let table = load("museum", Preset::Museum);
    let session = Session::new(&table);
    let failed: Vec<ChartId> = session.failures().iter().map(|f| f.chart).collect();
    assert_eq!(failed, vec![ChartId::PagesHistogram, ChartId::GradeByCountry]);
    assert!(session.chart(ChartId::ClassificationFrames).is_some());
}

#[test]
fn test_cumulative_reaches_row_count() {
    let table = load("museum", Preset::Museum);
    let points = aggregate::cumulative_by_year(&table, YearMetric::Rows).unwrap();
    assert_eq!(points.last().map(|p| p.cumulative), Some(table.len() as f64));
}

#[test]
fn test_missing_data_file() {
    let err = RecordTable::from_path(Path::new("test/absent.csv"), &ColumnMap::preset(Preset::Books)).unwrap_err();
    assert!(matches!(err, LoadError::NotFound(_)));
}

#[test]
fn test_missing_required_column_on_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "Title,Artist,Gender,DateAcquired").unwrap();
    writeln!(file, "Maman,Louise Bourgeois,Female,1961").unwrap();
    let err = RecordTable::from_path(file.path(), &ColumnMap::preset(Preset::Museum)).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Schema(SchemaError::MissingColumn { .. })
    ));
}

#[tokio::test]
async fn test_healthz() {
    let app = app("museum", Preset::Museum);
    let (status, body) = get(&app, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn test_index_page_inlines_charts() {
    let app = app("museum", Preset::Museum);
    let (status, body) = get(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("data:image/png;base64,"));
    assert!(html.contains("id=\"chart-gender-distribution\""));
    assert!(html.contains("data-control=\"year-range\""));
    assert!(html.contains("13 artworks loaded."));
}

#[tokio::test]
async fn test_chart_png_endpoint() {
    let app = app("books", Preset::Books);
    let (status, body) = get(&app, "/charts/gender-distribution.png").await;
    assert_eq!(status, StatusCode::OK);
    assert!(is_valid_png(&body), "Output is not a valid PNG");

    let (status, body) = get(&app, "/charts/classification-frames.svg").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("<svg"));
}

#[tokio::test]
async fn test_unknown_chart_and_session() {
    let app = app("books", Preset::Books);
    let (status, _) = get(&app, "/charts/volume.png").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get(&app, "/api/charts?session=999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = post_json(&app, "/api/sessions/999/controls/bins", json!({ "value": 5 })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_control_updates_only_affected_chart() {
    let app = app("books", Preset::Books);
    let (status, created) = post_json(&app, "/api/sessions", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let id = created["session"].as_u64().unwrap();
    assert_eq!(created["charts"].as_array().unwrap().len(), ChartId::ALL.len());

    let uri = format!("/api/sessions/{}/controls/bins", id);
    let (status, update) = post_json(&app, &uri, json!({ "value": 5 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(update["outcome"], "updated");
    let charts = update["charts"].as_array().unwrap();
    assert_eq!(charts.len(), 1);
    assert_eq!(charts[0]["id"], "pages-histogram");
    assert_eq!(charts[0]["traces"][0]["values"].as_array().unwrap().len(), 5);

    let (status, body) = get(&app, &format!("/charts/pages-histogram.png?session={}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(is_valid_png(&body));
}

#[tokio::test]
async fn test_bad_control_values_are_rejected() {
    let app = app("books", Preset::Books);
    let (_, created) = post_json(&app, "/api/sessions", json!({})).await;
    let id = created["session"].as_u64().unwrap();

    let uri = format!("/api/sessions/{}/controls/year-range", id);
    let (status, update) = post_json(&app, &uri, json!({ "value": [2001, 1995] })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(update["outcome"], "rejected");
    assert!(update["error"].as_str().unwrap().contains("after end"));
    assert_eq!(update["charts"][0]["title"], "books by classification acquired 1995-2002");

    let (_, update) = post_json(&app, &uri, json!({ "value": null })).await;
    assert_eq!(update["outcome"], "unchanged");

    let (_, update) = post_json(&app, &uri, json!({ "value": "1996 to 1998" })).await;
    assert_eq!(update["outcome"], "updated");
    assert_eq!(update["charts"][0]["title"], "books by classification acquired 1996-1998");
}
