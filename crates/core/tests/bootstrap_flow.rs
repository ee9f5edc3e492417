//! Bootstrap and token refresh against a local fixture server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::response::Html;
use axum::routing::get;
use msgr::bootstrap::bootstrap_from;
use msgr::refresh::TokenRefresher;
use msgr::{Credentials, Error, SessionCookie, SessionOptions, derive_checksum};
use msgr_runtime::{CookieJar, HttpTransport, RetryPolicy};

const FIRST_TOKEN: &str = "AQzFirstToken:23";
const ROTATED_TOKEN: &str = "AQzRotatedToken:42";

/// Opt-in trace output: `RUST_LOG=debug cargo test`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Renders a page the way the platform embeds its configuration: one
/// structured-data script block with nested declaration arrays.
fn page_html(token: &str) -> String {
    let doc = serde_json::json!({
        "require": [
            ["ScheduledServerJS", "handle", null, [{
                "__bbox": {
                    "require": [
                        ["DTSGInitialData", [], {"token": token}, 3515],
                        ["MqttWebDeviceID", [], {"clientID": "device-fixture"}, 5002],
                        ["MqttWebConfig", [], {
                            "endpoint": "wss://edge-chat.facebook.com/chat?sid=7&region=odn",
                            "appID": 2220391788200892u64
                        }, 3790],
                        ["CurrentUserInitialData", [], {"USER_ID": "100012345"}, 270],
                        ["LSVersion", [], {"version": "7545284382"}, 382]
                    ]
                }
            }]]
        ]
    });
    format!(
        "<!DOCTYPE html><html><head>\
         <script type=\"application/json\">{doc}</script>\
         </head><body></body></html>"
    )
}

async fn spawn_server() -> SocketAddr {
    init_tracing();
    let app = Router::new()
        .route("/", get(|| async { Html(page_html(FIRST_TOKEN)) }))
        .route("/rotated", get(|| async { Html(page_html(ROTATED_TOKEN)) }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn logged_in_jar() -> Arc<CookieJar> {
    let jar = Arc::new(CookieJar::new());
    jar.set(SessionCookie::new("c_user", "100012345"));
    jar.set(SessionCookie::new("xs", "secret-session"));
    jar
}

#[tokio::test]
async fn bootstrap_assembles_the_context_from_the_page() {
    let addr = spawn_server().await;
    let jar = logged_in_jar();
    let options = SessionOptions::default();
    let http = HttpTransport::new(Arc::clone(&jar), &options).unwrap();

    let ctx = bootstrap_from(&http, &jar, &options, &format!("http://{addr}/"))
        .await
        .unwrap();

    assert_eq!(ctx.user_id(), "100012345");
    assert_eq!(ctx.device_id(), "device-fixture");
    assert_eq!(ctx.app_id(), "2220391788200892");
    assert_eq!(ctx.version_id(), "7545284382");
    assert_eq!(
        ctx.realtime_endpoint(),
        "wss://edge-chat.facebook.com/chat?sid=7&region=odn"
    );

    let tokens = ctx.tokens();
    assert_eq!(tokens.anti_forgery, FIRST_TOKEN);
    assert_eq!(tokens.checksum, derive_checksum(FIRST_TOKEN));
}

#[tokio::test]
async fn region_override_rewrites_the_endpoint_parameter() {
    let addr = spawn_server().await;
    let jar = logged_in_jar();
    let options = SessionOptions {
        bypass_region: Some("PRN".into()),
        ..Default::default()
    };
    let http = HttpTransport::new(Arc::clone(&jar), &options).unwrap();

    let ctx = bootstrap_from(&http, &jar, &options, &format!("http://{addr}/"))
        .await
        .unwrap();

    assert!(ctx.realtime_endpoint().contains("region=prn"));
    assert!(!ctx.realtime_endpoint().contains("region=odn"));
}

#[tokio::test]
async fn page_identity_overrides_the_cookie_user() {
    let addr = spawn_server().await;
    let jar = logged_in_jar();
    let options = SessionOptions {
        page_id: Some("200099".into()),
        ..Default::default()
    };
    let http = HttpTransport::new(Arc::clone(&jar), &options).unwrap();

    let ctx = bootstrap_from(&http, &jar, &options, &format!("http://{addr}/"))
        .await
        .unwrap();
    assert_eq!(ctx.user_id(), "200099");
}

#[tokio::test]
async fn missing_identity_cookie_is_an_authentication_error() {
    let addr = spawn_server().await;
    let jar = Arc::new(CookieJar::new());
    let options = SessionOptions::default();
    let http = HttpTransport::new(Arc::clone(&jar), &options).unwrap();

    let result = bootstrap_from(&http, &jar, &options, &format!("http://{addr}/")).await;
    match result {
        Err(Error::Authentication(message)) => {
            assert!(message.contains("c_user"), "actionable message: {message}")
        }
        Err(other) => panic!("expected an authentication error, got {other}"),
        Ok(_) => panic!("bootstrap without identity cookies must not succeed"),
    }
}

#[tokio::test]
async fn refresh_swaps_both_halves_of_the_token_pair() {
    let addr = spawn_server().await;
    let jar = logged_in_jar();
    let options = SessionOptions::default();
    let http = HttpTransport::new(Arc::clone(&jar), &options).unwrap();

    let ctx = bootstrap_from(&http, &jar, &options, &format!("http://{addr}/"))
        .await
        .unwrap();
    assert_eq!(ctx.tokens().anti_forgery, FIRST_TOKEN);

    // the refresher fetches a page carrying a rotated token
    let refresher = TokenRefresher::with_base_url(
        Arc::new(HttpTransport::new(Arc::clone(&jar), &options).unwrap()),
        format!("http://{addr}/rotated"),
    );
    assert!(refresher.refresh(&ctx).await);

    let tokens = ctx.tokens();
    assert_eq!(tokens.anti_forgery, ROTATED_TOKEN);
    assert_eq!(tokens.checksum, derive_checksum(ROTATED_TOKEN));
}

#[tokio::test]
async fn unreachable_refresh_keeps_the_bootstrap_tokens() {
    let addr = spawn_server().await;
    let jar = logged_in_jar();
    let options = SessionOptions::default();
    let http = HttpTransport::new(Arc::clone(&jar), &options).unwrap();

    let ctx = bootstrap_from(&http, &jar, &options, &format!("http://{addr}/"))
        .await
        .unwrap();

    let dead = HttpTransport::new(Arc::clone(&jar), &options)
        .unwrap()
        .with_retry(RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        });
    let refresher =
        TokenRefresher::with_base_url(Arc::new(dead), "http://127.0.0.1:9/".to_string());
    assert!(!refresher.refresh(&ctx).await);
    assert_eq!(ctx.tokens().anti_forgery, FIRST_TOKEN);
}

#[tokio::test]
async fn app_state_login_round_trips_through_serialization() {
    let raw = r#"[
        {"name": "c_user", "value": "100012345", "domain": ".facebook.com"},
        {"name": "xs", "value": "secret-session", "domain": ".facebook.com"}
    ]"#;
    // Credentials are only validated here; no network is involved until
    // the bootstrap fetch.
    let credentials = Credentials::AppState(raw.to_string());
    let Credentials::AppState(state) = credentials else {
        unreachable!()
    };
    let cookies = msgr_runtime::normalize(&state).unwrap();
    let jar = Arc::new(CookieJar::new());
    for cookie in cookies {
        jar.set(cookie);
    }
    let reserialized = jar.serialize();
    let reparsed = msgr_runtime::normalize(&reserialized).unwrap();
    assert!(reparsed.iter().any(|c| c.name == "c_user"));
    assert!(reparsed.iter().any(|c| c.name == "xs"));
}
