//! Configuration web surface: a menu of device forms, the forms themselves
//! filled from the latest firmware snapshot, and a small JSON API.

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Json, Redirect, Response};
use axum::routing::get;
use axum::{Form, Router};
use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedSender;

use yaha_core::ConfigMap;

use crate::state::SharedState;

const LAYOUT_HTML: &str = include_str!("ui/layout.html");

#[derive(Clone)]
pub struct AppState {
    pub state: SharedState,
    /// Posted forms, drained by the firmware while it is awake.
    pub posts: UnboundedSender<ConfigMap>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(app: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/config/{page}", get(config_page).post(config_post))
        .route("/api/status", get(api_status))
        .route("/api/config", get(api_config))
        .with_state(app)
}

async fn index(State(app): State<AppState>) -> impl IntoResponse {
    let st = app.state.read().await;
    let mut content = String::from("<ul>\n");
    for form in &st.snapshot.forms {
        content.push_str(&format!(
            "<li><a href=\"/config/{}\">{}</a></li>\n",
            form.route,
            escape(form.menu_label)
        ));
    }
    content.push_str("</ul>\n");
    Html(page(&st.name, &menu(&st), &status_line(&st), &content))
}

async fn config_page(State(app): State<AppState>, Path(route): Path<String>) -> Response {
    let st = app.state.read().await;
    let Some(form) = st.form(&route) else {
        return (StatusCode::NOT_FOUND, format!("no page '{route}'")).into_response();
    };
    let content = render_form(&form.markup, &st.snapshot.config);
    let title = format!("{} - {}", st.name, form.menu_label);
    Html(page(&title, &menu(&st), &status_line(&st), &content)).into_response()
}

async fn config_post(
    State(app): State<AppState>,
    Path(route): Path<String>,
    Form(config): Form<ConfigMap>,
) -> Response {
    let mut st = app.state.write().await;
    if st.form(&route).is_none() {
        return (StatusCode::NOT_FOUND, format!("no page '{route}'")).into_response();
    }
    st.record_post(&route, &config);
    if app.posts.send(config).is_err() {
        st.record_error("firmware stopped, configuration dropped".into());
        return (StatusCode::SERVICE_UNAVAILABLE, "firmware is not running").into_response();
    }
    tracing::info!(page = %route, "configuration queued");
    Redirect::to(&format!("/config/{route}")).into_response()
}

async fn api_status(State(app): State<AppState>) -> impl IntoResponse {
    let st = app.state.read().await;
    Json(st.to_status())
}

async fn api_config(State(app): State<AppState>) -> impl IntoResponse {
    let st = app.state.read().await;
    (
        [(header::CACHE_CONTROL, "no-store")],
        Json(st.snapshot.config.clone()),
    )
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn page(title: &str, menu: &str, status: &str, content: &str) -> String {
    LAYOUT_HTML
        .replace("{{title}}", &escape(title))
        .replace("{{menu}}", menu)
        .replace("{{status}}", &escape(status))
        .replace("{{content}}", content)
}

fn menu(st: &crate::state::SystemState) -> String {
    st.snapshot
        .forms
        .iter()
        .map(|f| format!("<a href=\"/config/{}\">{}</a>", f.route, escape(f.menu_label)))
        .collect()
}

fn status_line(st: &crate::state::SystemState) -> String {
    let s = &st.snapshot;
    format!(
        "{} | wakeups {} | {} | broker {}",
        if st.awake { "awake" } else { "asleep" },
        s.wakeup_count,
        if s.fast_reset { "fast reset" } else { "normal start" },
        if s.online { "online" } else { "offline" },
    )
}

#[derive(Clone, Copy)]
enum Placeholder {
    Value,
    Checked,
}

/// Fill `[value]="key"` and `[checked]="key"` placeholders from `config`.
///
/// Unknown keys render as an empty value or an unchecked box.
pub fn render_form(markup: &str, config: &ConfigMap) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut rest = markup;
    while let Some(start) = rest.find('[') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match placeholder(tail) {
            Some((Placeholder::Value, key, used)) => {
                let value = config.get(key).map(String::as_str).unwrap_or("");
                out.push_str(&format!("value=\"{}\"", escape(value)));
                rest = &tail[used..];
            }
            Some((Placeholder::Checked, key, used)) => {
                let on = config
                    .get(key)
                    .is_some_and(|v| v.eq_ignore_ascii_case("on") || v == "1");
                if on {
                    out.push_str("checked");
                }
                rest = &tail[used..];
            }
            None => {
                out.push('[');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn placeholder(s: &str) -> Option<(Placeholder, &str, usize)> {
    for (prefix, kind) in [
        ("[value]=\"", Placeholder::Value),
        ("[checked]=\"", Placeholder::Checked),
    ] {
        if let Some(body) = s.strip_prefix(prefix) {
            let end = body.find('"')?;
            return Some((kind, &body[..end], prefix.len() + end + 1));
        }
    }
    None
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(app: AppState, configured_port: u16) -> anyhow::Result<()> {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(configured_port);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    tracing::info!("web ui listening on http://{addr}");

    axum::serve(listener, router(app))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use tokio::sync::RwLock;
    use tower::ServiceExt;
    use yaha_core::hal::StationSnapshot;
    use yaha_core::FormDescriptor;

    use crate::state::SystemState;

    const BROKER_FORM: &str = r#"<form action="/config/broker" method="POST">
<input type="text" name="broker/host" [value]="broker/host">
<input type="checkbox" name="battery/mode" [checked]="battery/mode">
</form>"#;

    async fn app() -> (AppState, UnboundedReceiver<ConfigMap>) {
        let state = Arc::new(RwLock::new(SystemState::new("garden")));
        state.write().await.record_snapshot(StationSnapshot {
            config: ConfigMap::from([
                ("broker/host".into(), "10.0.0.2".into()),
                ("battery/mode".into(), "on".into()),
            ]),
            forms: vec![FormDescriptor::new("broker", "Broker", BROKER_FORM)],
            wakeup_count: 3,
            fast_reset: false,
            online: true,
        });
        let (posts, rx) = mpsc::unbounded_channel();
        (AppState { state, posts }, rx)
    }

    async fn body_string(resp: Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    // -- render_form --------------------------------------------------------

    #[test]
    fn value_placeholder_is_filled_and_escaped() {
        let cfg = ConfigMap::from([("wlan/ssid".into(), "a\"<b>".into())]);
        let html = render_form(r#"<input [value]="wlan/ssid">"#, &cfg);
        assert_eq!(html, r#"<input value="a&quot;&lt;b&gt;">"#);
    }

    #[test]
    fn missing_value_renders_empty() {
        let html = render_form(r#"<input [value]="nope">"#, &ConfigMap::new());
        assert_eq!(html, r#"<input value="">"#);
    }

    #[test]
    fn checked_placeholder_follows_flag() {
        let on = ConfigMap::from([("battery/mode".into(), "on".into())]);
        let off = ConfigMap::from([("battery/mode".into(), "".into())]);
        let markup = r#"<input type="checkbox" [checked]="battery/mode">"#;
        assert_eq!(
            render_form(markup, &on),
            r#"<input type="checkbox" checked>"#
        );
        assert_eq!(render_form(markup, &off), r#"<input type="checkbox" >"#);
    }

    #[test]
    fn other_brackets_pass_through() {
        let html = render_form("a[0] [value]=\"k\" [x]", &ConfigMap::new());
        assert_eq!(html, "a[0] value=\"\" [x]");
    }

    // -- Routes -------------------------------------------------------------

    #[tokio::test]
    async fn index_lists_forms() {
        let (app, _rx) = app().await;
        let resp = router(app)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_string(resp).await;
        assert!(body.contains("<a href=\"/config/broker\">Broker</a>"));
        assert!(body.contains("wakeups 3"));
    }

    #[tokio::test]
    async fn config_page_renders_snapshot_values() {
        let (app, _rx) = app().await;
        let resp = router(app)
            .oneshot(
                Request::builder()
                    .uri("/config/broker")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_string(resp).await;
        assert!(body.contains(r#"name="broker/host" value="10.0.0.2""#));
        assert!(body.contains(r#"name="battery/mode" checked"#));
        assert!(!body.contains("[value]"));
    }

    #[tokio::test]
    async fn unknown_page_is_not_found() {
        let (app, _rx) = app().await;
        let resp = router(app)
            .oneshot(
                Request::builder()
                    .uri("/config/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn post_queues_config_for_firmware() {
        let (app, mut rx) = app().await;
        let state = Arc::clone(&app.state);
        let resp = router(app)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/config/broker")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(
                        "broker%2Fhost=10.0.0.9&battery%2Fmode=off&battery%2Fmode=on",
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[header::LOCATION], "/config/broker");

        let posted = rx.try_recv().unwrap();
        assert_eq!(posted["broker/host"], "10.0.0.9");
        assert_eq!(posted["battery/mode"], "on");
        assert_eq!(state.read().await.events.len(), 1);
    }

    #[tokio::test]
    async fn post_without_firmware_is_unavailable() {
        let (app, rx) = app().await;
        drop(rx);
        let resp = router(app)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/config/broker")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("broker%2Fhost=x"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn api_status_returns_json() {
        let (app, _rx) = app().await;
        let resp = router(app)
            .oneshot(
                Request::builder()
                    .uri("/api/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(json["name"], "garden");
        assert_eq!(json["wakeup_count"], 3);
        assert_eq!(json["start_type"], "normal");
        assert_eq!(json["pages"][0]["route"], "broker");
    }

    #[tokio::test]
    async fn api_config_returns_flat_map() {
        let (app, _rx) = app().await;
        let resp = router(app)
            .oneshot(
                Request::builder()
                    .uri("/api/config")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(json["broker/host"], "10.0.0.2");
    }
}
