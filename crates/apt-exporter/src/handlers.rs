//! HTTP request handlers: metrics exposition and landing page.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use prometheus::{Encoder, TextEncoder};
use tracing::error;

use apt_exporter_core::{ListingKind, SnapshotCache};

use crate::state::AppState;

// ============================================================
// Metrics
// ============================================================

/// Serves the text exposition. Gathering only reads the snapshot cache, so
/// a scrape never waits on `apt`.
pub(crate) async fn handle_metrics(State(state): AppState) -> Response {
    let families = state.registry.gather();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();

    match encoder.encode(&families, &mut buf) {
        Ok(()) => (
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buf,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// ============================================================
// Landing page
// ============================================================

pub(crate) async fn handle_landing(State(state): AppState) -> Html<String> {
    Html(render_landing(&state.telemetry_path, &state.cache))
}

fn render_landing(telemetry_path: &str, cache: &SnapshotCache) -> String {
    let rows: String = ListingKind::ALL
        .iter()
        .map(|&kind| {
            let status = match cache.get(kind) {
                Some(snapshot) => format!(
                    "{} packages, refreshed {}",
                    snapshot.records.len(),
                    snapshot.refreshed_at.format("%Y-%m-%d %H:%M:%S UTC")
                ),
                None => "pending".to_string(),
            };
            format!("<tr><td>{}</td><td>{}</td></tr>\n", kind, status)
        })
        .collect();

    format!(
        "<html>
<head><title>APT Exporter</title></head>
<body>
<h1>APT Exporter</h1>
<p><a href='{path}'>Metrics</a></p>
<table>
{rows}</table>
</body>
</html>
",
        path = escape_html(telemetry_path),
        rows = rows,
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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
