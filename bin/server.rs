// GradCafe Analytics - Web Server
// Analysis page, JSON API and the pull / recompute triggers

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use gradcafe::config::env_or;
use gradcafe::{
    Analysis, DbConfig, HttpHarvester, Pipeline, PullOutcome, RecomputeOutcome, ScrapeLimits,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Shared application state
#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
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

fn internal_error(context: &str, e: anyhow::Error) -> Response {
    error!(error = %format!("{:#}", e), "{}", context);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "ok": false, "error": format!("{:#}", e) })),
    )
        .into_response()
}

// ============================================================================
// Page rendering
// ============================================================================

/// Two decimals; missing data renders as "0.00".
fn pct2(value: Option<f64>) -> String {
    format!("{:.2}", value.unwrap_or(0.0))
}

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

fn render_index(analysis: &Analysis, pull_in_progress: bool) -> String {
    let params = &analysis.params;
    let term = escape_html(&params.term);
    let year = escape_html(&params.year);
    let program = escape_html(&params.program);
    let institution = escape_html(&params.institution);

    let answers = [
        (format!("Applicants for {}", term), analysis.term_count.to_string()),
        ("International applicants (%)".to_string(), pct2(analysis.international_percent)),
        ("Average GPA".to_string(), pct2(analysis.avg_gpa)),
        ("Average GRE".to_string(), pct2(analysis.avg_gre)),
        ("Average GRE V".to_string(), pct2(analysis.avg_gre_v)),
        ("Average GRE AW".to_string(), pct2(analysis.avg_gre_aw)),
        (format!("Average GPA of American applicants, {}", term), pct2(analysis.avg_gpa_american_fall)),
        (format!("Acceptance rate, {} (%)", term), pct2(analysis.accept_percent_fall)),
        (format!("Average GPA of accepted applicants, {}", term), pct2(analysis.avg_gpa_accept_fall)),
        (format!("{} Masters applicants in {}", institution, program), analysis.jhu_ms_cs.to_string()),
        (format!("{} PhD acceptances in {} at selected universities", year, program), analysis.cs_phd_accept_2026.to_string()),
        (format!("{} PhD acceptances in {} (LLM-labelled fields)", year, program), analysis.cs_phd_accept_2026_llm.to_string()),
    ];

    let answer_items: String = answers
        .iter()
        .map(|(question, answer)| format!("      <li>{}: <strong>{}</strong></li>\n", question, answer))
        .collect();

    let status_rows: String = analysis
        .gpa_by_status
        .iter()
        .map(|row| {
            format!(
                "      <tr><td>{}</td><td>{}</td></tr>\n",
                escape_html(row.status.as_deref().unwrap_or("Unknown")),
                pct2(row.avg_gpa)
            )
        })
        .collect();

    let university_rows: String = analysis
        .top_universities
        .iter()
        .map(|row| {
            format!(
                "      <tr><td>{}</td><td>{}</td></tr>\n",
                escape_html(&row.university),
                row.total
            )
        })
        .collect();

    let banner = if pull_in_progress {
        "    <p class=\"busy\">A data pull is in progress; results may be incomplete.</p>\n"
    } else {
        ""
    };

    format!(
        "<!DOCTYPE html>\n\
         <html lang=\"en\">\n\
         <head><meta charset=\"utf-8\"><title>GradCafe Analysis</title></head>\n\
         <body>\n\
         <h1>GradCafe Analysis</h1>\n\
         {banner}\
         <form method=\"post\" action=\"/pull-data\"><button>Pull Data</button></form>\n\
         <form method=\"post\" action=\"/update-analysis\"><button>Update Analysis</button></form>\n\
         <ul>\n{answer_items}</ul>\n\
         <h2>Average GPA by status, {term}</h2>\n\
         <table>\n      <tr><th>Status</th><th>Average GPA</th></tr>\n{status_rows}</table>\n\
         <h2>Top universities, {term}</h2>\n\
         <table>\n      <tr><th>University</th><th>Applicants</th></tr>\n{university_rows}</table>\n\
         </body>\n\
         </html>\n"
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// GET / and GET /analysis - Render the analysis page
async fn serve_index(State(state): State<AppState>) -> Response {
    match state.pipeline.get_aggregates().await {
        Ok(analysis) => Html(render_index(&analysis, state.pipeline.is_busy())).into_response(),
        Err(e) => internal_error("analysis page failed", e),
    }
}

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/analysis - Current aggregates as JSON
async fn get_analysis(State(state): State<AppState>) -> Response {
    match state.pipeline.get_aggregates().await {
        Ok(analysis) => (StatusCode::OK, Json(ApiResponse::ok(analysis))).into_response(),
        Err(e) => internal_error("analysis query failed", e),
    }
}

/// POST /pull-data - Scrape, clean and load new data
async fn pull_data(State(state): State<AppState>) -> Response {
    match state.pipeline.trigger_pull().await {
        Ok(PullOutcome::Busy) => (StatusCode::CONFLICT, Json(json!({ "busy": true }))).into_response(),
        Ok(PullOutcome::Accepted) => (StatusCode::ACCEPTED, Json(json!({ "ok": true }))).into_response(),
        Ok(PullOutcome::Completed { rows }) => {
            info!(rows, "pull completed");
            (StatusCode::OK, Json(json!({ "ok": true }))).into_response()
        }
        Err(e) => internal_error("pull failed", e),
    }
}

/// POST /update-analysis - Recompute aggregates without pulling
async fn update_analysis(State(state): State<AppState>) -> Response {
    match state.pipeline.trigger_recompute().await {
        Ok(RecomputeOutcome::Busy) => (StatusCode::CONFLICT, Json(json!({ "busy": true }))).into_response(),
        Ok(RecomputeOutcome::Ok(_)) => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
        Err(e) => internal_error("recompute failed", e),
    }
}

fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/analysis", get(get_analysis))
        .with_state(state.clone());

    Router::new()
        .route("/", get(serve_index))
        .route("/analysis", get(serve_index))
        .route("/pull-data", post(pull_data))
        .route("/update-analysis", post(update_analysis))
        .with_state(state)
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gradcafe=info")),
        )
        .init();

    let db = DbConfig::from_env();
    let run_async = env_or("RUN_ASYNC", Some("true"))
        .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
        .unwrap_or(true);

    let harvester = HttpHarvester::new().context("failed to build HTTP client")?;
    let pipeline = Pipeline::new(Arc::new(harvester), db.clone())
        .with_limits(ScrapeLimits::from_env())
        .run_async(run_async);

    let app = build_router(AppState { pipeline });

    let addr = env_or("BIND_ADDR", Some("0.0.0.0:3000")).unwrap_or_default();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    info!(%addr, db = %db.path.display(), run_async, "server listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use gradcafe::{HarvestError, PageSource};
    use tower::ServiceExt;

    struct OnePageSource;

    #[async_trait]
    impl PageSource for OnePageSource {
        async fn fetch_page(&self, page: u32, _per_page: u32) -> Result<String, HarvestError> {
            if page > 1 {
                return Ok("<html></html>".to_string());
            }
            Ok("<table>\
                <tr><td>Johns Hopkins University</td><td>Computer Science</td><td>Jan 5, 2026</td>\
                <td>Accepted on 5 Jan</td><td><a href=\"/result/1\">x</a></td></tr>\
                <tr><td>Fall 2026 American GPA 3.90</td></tr>\
                </table>"
                .to_string())
        }
    }

    fn test_state(dir: &tempfile::TempDir, run_async: bool) -> AppState {
        let pipeline = Pipeline::new(
            Arc::new(OnePageSource),
            DbConfig::new(dir.path().join("server.db")),
        )
        .with_limits(ScrapeLimits {
            min_entries: 1,
            max_pages: 10,
            per_page: 100,
        })
        .run_async(run_async);
        AppState { pipeline }
    }

    async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_pct2_formatting() {
        assert_eq!(pct2(Some(33.333)), "33.33");
        assert_eq!(pct2(Some(3.9)), "3.90");
        assert_eq!(pct2(None), "0.00");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("A & <B>"), "A &amp; &lt;B&gt;");
    }

    #[tokio::test]
    async fn test_index_renders_empty_database() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir, false));

        let (status, body) = send(app, "GET", "/").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Applicants for Fall 2026: <strong>0</strong>"));
        assert!(body.contains("Average GPA: <strong>0.00</strong>"));
    }

    #[tokio::test]
    async fn test_sync_pull_then_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, false);

        let (status, body) = send(build_router(state.clone()), "POST", "/pull-data").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"ok":true}"#);

        let (status, body) = send(build_router(state.clone()), "GET", "/api/analysis").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["term_count"], 1);
        assert_eq!(json["data"]["avg_gpa_american_fall"], 3.9);

        let (_, body) = send(build_router(state), "GET", "/analysis").await;
        assert!(body.contains("Average GPA of American applicants, Fall 2026: <strong>3.90</strong>"));
    }

    #[tokio::test]
    async fn test_async_pull_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(test_state(&dir, true));

        let (status, body) = send(app, "POST", "/pull-data").await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn test_busy_triggers_return_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir, false);
        assert!(state.pipeline.guard().try_start());

        let (status, body) = send(build_router(state.clone()), "POST", "/pull-data").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, r#"{"busy":true}"#);

        let (status, body) = send(build_router(state.clone()), "POST", "/update-analysis").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body, r#"{"busy":true}"#);

        let (_, body) = send(build_router(state.clone()), "GET", "/").await;
        assert!(body.contains("A data pull is in progress"));

        state.pipeline.guard().end();
        let (status, body) = send(build_router(state), "POST", "/update-analysis").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"ok":true}"#);
    }
}
