use anyhow::{Context, Result};
use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{info, warn};

/// Where the OAuth redirect lands. The page hands the result to the window
/// that opened the consent popup and then closes itself.
pub const CALLBACK_PATH: &str = "/spotify/callback";

/// Outcome of a provider redirect, as read from its query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Code { code: String, state: String },
    Error(String),
}

impl CallbackOutcome {
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let get = |k: &str| params.get(k).filter(|v| !v.is_empty()).cloned();
        match (get("error"), get("code"), get("state")) {
            (Some(err), _, _) => CallbackOutcome::Error(err),
            (None, Some(code), Some(state)) => CallbackOutcome::Code { code, state },
            _ => CallbackOutcome::Error("Missing code or state".into()),
        }
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// JSON literal safe to embed inside a <script> block.
fn script_literal(s: &str) -> String {
    serde_json::Value::String(s.to_string())
        .to_string()
        .replace("</", "<\\/")
}

pub fn render(outcome: &CallbackOutcome) -> (StatusCode, String) {
    match outcome {
        CallbackOutcome::Code { code, state } => {
            let body = format!(
                r#"<!DOCTYPE html>
<html>
  <head>
    <title>Spotify Connected</title>
    <style>
      body {{ font-family: Arial, sans-serif; text-align: center; padding: 50px; }}
      .success {{ color: #28a745; }}
    </style>
  </head>
  <body>
    <h1 class="success">Spotify Connected!</h1>
    <p>Redirecting back to the app...</p>
    <script>
      if (window.opener) {{
        window.opener.postMessage({{ type: 'spotify-code', code: {code}, state: {state} }}, '*');
      }}
      setTimeout(() => {{ window.close(); }}, 2000);
    </script>
  </body>
</html>
"#,
                code = script_literal(code),
                state = script_literal(state),
            );
            (StatusCode::OK, body)
        }
        CallbackOutcome::Error(err) => {
            let body = format!(
                r#"<!DOCTYPE html>
<html>
  <head>
    <title>Spotify Connection Error</title>
    <style>
      body {{ font-family: Arial, sans-serif; text-align: center; padding: 50px; }}
      .error {{ color: #dc3545; }}
    </style>
  </head>
  <body>
    <h1 class="error">Connection Failed</h1>
    <p>Error: {text}</p>
    <script>
      if (window.opener) {{
        window.opener.postMessage({{ type: 'spotify-error', error: {error} }}, '*');
      }}
      setTimeout(() => {{ window.close(); }}, 3000);
    </script>
  </body>
</html>
"#,
                text = escape_html(err),
                error = script_literal(err),
            );
            (StatusCode::BAD_REQUEST, body)
        }
    }
}

pub async fn callback(Query(params): Query<HashMap<String, String>>) -> (StatusCode, Html<String>) {
    let outcome = CallbackOutcome::from_params(&params);
    match &outcome {
        CallbackOutcome::Code { state, .. } => info!(state = %state, "OAuth redirect received"),
        CallbackOutcome::Error(e) => warn!("OAuth redirect carried an error: {}", e),
    }
    let (status, body) = render(&outcome);
    (status, Html(body))
}

pub async fn health() -> &'static str {
    "ok"
}

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health))
        .route(CALLBACK_PATH, get(callback))
}

pub async fn serve(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("parsing callback address {}", addr))?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding callback listener on {}", addr))?;
    info!("OAuth callback listening on http://{}{}", addr, CALLBACK_PATH);
    axum::serve(listener, router())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn outcome_from_params() {
        assert_eq!(
            CallbackOutcome::from_params(&params(&[("code", "c"), ("state", "s")])),
            CallbackOutcome::Code { code: "c".into(), state: "s".into() }
        );
        assert_eq!(
            CallbackOutcome::from_params(&params(&[("code", "c"), ("state", "s"), ("error", "access_denied")])),
            CallbackOutcome::Error("access_denied".into())
        );
        assert_eq!(
            CallbackOutcome::from_params(&params(&[("code", "c")])),
            CallbackOutcome::Error("Missing code or state".into())
        );
    }

    #[test]
    fn error_page_escapes_provider_text() {
        let (status, body) = render(&CallbackOutcome::Error("<script>x</script>".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("&lt;script&gt;x&lt;/script&gt;"));
        assert!(body.contains(r#"error: "<script>x<\/script>""#));
        assert!(body.contains("3000"));
    }

    #[test]
    fn success_page_posts_code_and_state() {
        let (status, body) = render(&CallbackOutcome::Code { code: "abc".into(), state: "user-1".into() });
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"type: 'spotify-code', code: "abc", state: "user-1""#));
        assert!(body.contains("window.close()"));
    }
}
