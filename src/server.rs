// HTTP surface: page scaffold, chart images and control callbacks

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::aggregate::Threshold;
use crate::chart::ChartSpec;
use crate::controls::{ControlId, ALL_CLASSIFICATIONS};
use crate::dashboard::{build_chart, ChartId};
use crate::data::{Field, RecordTable};
use crate::graph::render_chart;
use crate::session::{ChartFailure, ControlState, SessionId, SessionStore, Update};
use crate::{OutputFormat, RenderOptions};

/// Shared across every handler. The table is never mutated after load.
pub struct AppState {
    pub table: Arc<RecordTable>,
    pub sessions: SessionStore,
    pub render: RenderOptions,
}

impl AppState {
    pub fn new(table: Arc<RecordTable>, render: RenderOptions) -> Self {
        Self {
            table,
            sessions: SessionStore::default(),
            render,
        }
    }
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/healthz", get(health_handler))
        .route("/api/sessions", post(create_session_handler))
        .route("/api/charts", get(charts_handler))
        .route("/api/sessions/:id/controls/:control", post(control_handler))
        .route("/charts/:file", get(chart_image_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("unknown chart '{0}'")]
    UnknownChart(String),
    #[error("unknown control '{0}'")]
    UnknownControl(String),
    #[error("chart {chart} is unavailable: {reason}")]
    Unavailable { chart: ChartId, reason: String },
    #[error("failed to render chart")]
    Render(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Render(e) => {
                warn!(error = ?e, "render failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct SessionCharts {
    session: SessionId,
    charts: Vec<ChartSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    failures: Vec<ChartFailure>,
}

async fn create_session_handler(State(state): State<SharedState>) -> Result<Json<SessionCharts>, ApiError> {
    let id = state.sessions.create(&state.table);
    session_charts(&state, id).map(Json)
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session: SessionId,
}

async fn charts_handler(
    State(state): State<SharedState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<SessionCharts>, ApiError> {
    session_charts(&state, query.session).map(Json)
}

fn session_charts(state: &AppState, id: SessionId) -> Result<SessionCharts, ApiError> {
    state
        .sessions
        .with_session(id, |s| SessionCharts {
            session: id,
            charts: s.charts(),
            failures: s.failures(),
        })
        .ok_or(ApiError::UnknownSession(id))
}

#[derive(Debug, Deserialize)]
struct ControlRequest {
    #[serde(default)]
    value: Value,
}

async fn control_handler(
    State(state): State<SharedState>,
    Path((id, control)): Path<(SessionId, String)>,
    Json(request): Json<ControlRequest>,
) -> Result<Json<Update>, ApiError> {
    let control: ControlId = control.parse().map_err(|_| ApiError::UnknownControl(control))?;
    let update = state
        .sessions
        .with_session(id, |s| s.handle(&state.table, control, &request.value))
        .ok_or(ApiError::UnknownSession(id))?;
    debug!(session = id, control = %control, outcome = ?update.outcome, "control handled");
    Ok(Json(update))
}

#[derive(Debug, Deserialize)]
struct ImageQuery {
    session: Option<SessionId>,
    width: Option<u32>,
    height: Option<u32>,
}

async fn chart_image_handler(
    State(state): State<SharedState>,
    Path(file): Path<String>,
    Query(query): Query<ImageQuery>,
) -> Result<Response, ApiError> {
    let (slug, format) = match file.rsplit_once('.') {
        Some((slug, ext)) => (slug, OutputFormat::from_extension(ext)),
        None => (file.as_str(), Some(OutputFormat::Png)),
    };
    let format = format.ok_or_else(|| ApiError::UnknownChart(file.clone()))?;
    let chart: ChartId = slug.parse().map_err(|_| ApiError::UnknownChart(slug.to_string()))?;

    let spec = match query.session {
        Some(id) => state
            .sessions
            .with_session(id, |s| s.chart(chart).cloned())
            .ok_or(ApiError::UnknownSession(id))?,
        None => build_chart(&state.table, chart, &ControlState::defaults(&state.table)).ok(),
    };
    let spec = spec.ok_or_else(|| ApiError::Unavailable {
        chart,
        reason: "not computed for this dataset".to_string(),
    })?;

    let options = RenderOptions {
        width: query.width.unwrap_or(state.render.width).clamp(100, 4000),
        height: query.height.unwrap_or(state.render.height).clamp(100, 4000),
        format,
    };
    let bytes = tokio::task::spawn_blocking(move || render_chart(&spec, &options))
        .await
        .context("Render task failed")??;
    Ok(([(header::CONTENT_TYPE, format.content_type())], bytes).into_response())
}

async fn index_handler(State(state): State<SharedState>) -> Result<Html<String>, ApiError> {
    let id = state.sessions.create(&state.table);
    let (charts, failures, controls) = state
        .sessions
        .with_session(id, |s| (s.charts(), s.failures(), s.state().clone()))
        .ok_or(ApiError::UnknownSession(id))?;

    let render = state.render.clone();
    let images = tokio::task::spawn_blocking(move || {
        charts
            .into_iter()
            .map(|spec| match render_chart(&spec, &render) {
                Ok(png) => {
                    let data = base64::engine::general_purpose::STANDARD.encode(png);
                    (spec, Some(data))
                }
                Err(e) => {
                    warn!(chart = %spec.id, error = ?e, "initial render failed");
                    (spec, None)
                }
            })
            .collect::<Vec<_>>()
    })
    .await
    .context("Render task failed")?;

    Ok(Html(render_page(&state.table, id, &controls, &images, &failures)))
}

// =============================================================================
// Page
// =============================================================================

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn options_html(choices: &[String], selected: Option<&str>) -> String {
    choices
        .iter()
        .map(|c| {
            let mark = if Some(c.as_str()) == selected { " selected" } else { "" };
            format!("<option value=\"{0}\"{1}>{0}</option>", escape_html(c), mark)
        })
        .collect()
}

fn controls_html(table: &RecordTable, controls: &ControlState) -> String {
    let years: Vec<String> = {
        let mut years: Vec<i32> = table.records().iter().filter_map(|r| r.year).collect();
        years.sort_unstable();
        years.dedup();
        years.into_iter().map(|y| y.to_string()).collect()
    };
    let mut classifications = vec![ALL_CLASSIFICATIONS.to_string()];
    classifications.extend(table.distinct(Field::Classification));
    let thresholds: Vec<String> = [Threshold::Mean, Threshold::Median]
        .iter()
        .map(|t| t.label().to_string())
        .collect();
    let (start, end) = controls.year_range;
    let frame = controls.frame_year.map(|y| y.to_string());

    let mut html = String::new();
    html.push_str(&format!(
        "<label>Years <input type=\"number\" id=\"year-start\" value=\"{start}\"> to \
         <input type=\"number\" id=\"year-end\" value=\"{end}\"> \
         <button data-control=\"year-range\">Apply</button></label>\n"
    ));
    html.push_str(&format!(
        "<label>Frame year <select data-control=\"frame-year\">{}</select></label>\n",
        options_html(&years, frame.as_deref())
    ));
    html.push_str(&format!(
        "<label>Countries <input type=\"text\" data-control=\"countries\" value=\"{}\"></label>\n",
        escape_html(&controls.countries.join(", "))
    ));
    html.push_str(&format!(
        "<label>Bins <input type=\"number\" min=\"1\" data-control=\"bins\" value=\"{}\"></label>\n",
        controls.bins
    ));
    html.push_str(&format!(
        "<label>Group below <select data-control=\"threshold\">{}</select></label>\n",
        options_html(&thresholds, Some(controls.threshold.label()))
    ));
    html.push_str(&format!(
        "<label>Classification <select data-control=\"classification\">{}</select></label>\n",
        options_html(&classifications, Some(controls.classification.as_deref().unwrap_or(ALL_CLASSIFICATIONS)))
    ));
    html
}

fn render_page(
    table: &RecordTable,
    session: SessionId,
    controls: &ControlState,
    images: &[(ChartSpec, Option<String>)],
    failures: &[ChartFailure],
) -> String {
    let mut html = String::new();
    html.push_str(PAGE_HEAD);
    html.push_str(&format!(
        "<h1>Acquisitions</h1>\n<p>{} {} loaded.</p>\n<div id=\"controls\" data-session=\"{}\">\n{}</div>\n<p id=\"status\"></p>\n<div id=\"charts\">\n",
        table.len(),
        escape_html(table.noun()),
        session,
        controls_html(table, controls)
    ));

    for (spec, image) in images {
        let body = match image {
            Some(data) => format!(
                "<img alt=\"{}\" src=\"data:image/png;base64,{}\">",
                escape_html(&spec.title),
                data
            ),
            None => "<p class=\"error\">render failed</p>".to_string(),
        };
        html.push_str(&format!("<figure id=\"chart-{}\">{}</figure>\n", spec.id, body));
    }
    for failure in failures {
        html.push_str(&format!(
            "<figure id=\"chart-{}\"><p class=\"error\">{}</p></figure>\n",
            failure.chart,
            escape_html(&failure.error)
        ));
    }

    html.push_str("</div>\n");
    html.push_str(PAGE_SCRIPT);
    html.push_str("</body>\n</html>\n");
    html
}

const PAGE_HEAD: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Acquisitions dashboard</title>
    <style>
        body { font-family: sans-serif; margin: 20px; background: #fafafa; }
        #controls label { display: inline-block; margin: 0 16px 8px 0; }
        #charts { display: flex; flex-wrap: wrap; gap: 12px; }
        figure { margin: 0; background: white; border: 1px solid #ddd; }
        figure img { display: block; max-width: 100%; }
        .error { color: #b00; padding: 12px; }
    </style>
</head>
<body>
"##;

const PAGE_SCRIPT: &str = r##"<script>
const controls = document.getElementById('controls');
const session = controls.dataset.session;
const status = document.getElementById('status');

function valueOf(el) {
    const control = el.dataset.control;
    if (control === 'year-range') {
        const start = document.getElementById('year-start').value;
        const end = document.getElementById('year-end').value;
        return start && end ? [Number(start), Number(end)] : null;
    }
    if (control === 'bins') return el.value ? Number(el.value) : null;
    return el.value;
}

async function send(el) {
    const control = el.dataset.control;
    const resp = await fetch(`/api/sessions/${session}/controls/${control}`, {
        method: 'POST',
        headers: { 'Content-Type': 'application/json' },
        body: JSON.stringify({ value: valueOf(el) }),
    });
    const update = await resp.json();
    status.textContent = update.error || '';
    if (update.outcome !== 'updated') return;
    for (const chart of update.charts) {
        const fig = document.getElementById(`chart-${chart.id}`);
        if (!fig) continue;
        fig.innerHTML = `<img alt="" src="/charts/${chart.id}.png?session=${session}&t=${Date.now()}">`;
    }
}

controls.querySelectorAll('[data-control]').forEach(el => {
    const event = el.tagName === 'BUTTON' ? 'click' : 'change';
    el.addEventListener(event, ev => { ev.preventDefault(); send(el); });
});
</script>
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>\"A&B\"</b>"), "&lt;b&gt;&quot;A&amp;B&quot;&lt;/b&gt;");
    }

    #[test]
    fn test_options_mark_selection() {
        let html = options_html(&["Mean".to_string(), "Median".to_string()], Some("Median"));
        assert_eq!(
            html,
            "<option value=\"Mean\">Mean</option><option value=\"Median\" selected>Median</option>"
        );
    }

    #[test]
    fn test_api_error_status() {
        let resp = ApiError::UnknownSession(7).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = ApiError::Render(anyhow::anyhow!("boom")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
