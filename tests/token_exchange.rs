use wallet_login_broker as lib;

use lib::auth::flow::{LoginBroker, LoginError};
use lib::auth::mock::MockBrowser;
use lib::auth::session::SessionManager;
use lib::config::Config;
use lib::db;
use lib::models::AuthEvent;
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

fn test_config(dir: &tempfile::TempDir, base_url: &str) -> Config {
    Config {
        wallet_client_id: "portal-web".into(),
        wallet_base_url: base_url.into(),
        locale: "az".into(),
        oauth_scope: "openid profile".into(),
        redirect_origin: "http://localhost:3000".into(),
        login_timeout_secs: 300,
        handshake_ttl_secs: 600,
        allow_plain_challenge: false,
        db_path: dir.path().join("broker.db"),
        log_dir: dir.path().join("logs"),
    }
}

#[test]
fn completing_the_callback_exchanges_the_code() {
    let mut server = Server::new();
    let base = server.url();

    // token endpoint wants the code, the client_id and a 43-char verifier;
    // no client secret anywhere
    let token_mock = server
        .mock("POST", "/oauth/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), "test-code".into()),
            Matcher::UrlEncoded("client_id".into(), "portal-web".into()),
            Matcher::UrlEncoded(
                "redirect_uri".into(),
                "http://localhost:3000/auth/wallet/callback".into(),
            ),
            Matcher::Regex("code_verifier=[A-Za-z0-9_-]{43}".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "access_token": "fresh-access",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "refresh-1",
                "scope": "openid profile"
            })
            .to_string(),
        )
        .create();

    let dir = tempfile::tempdir().expect("tmpdir");
    let broker = Arc::new(LoginBroker::with_launcher(
        test_config(&dir, &base),
        Arc::new(MockBrowser::new()),
    ));

    let rt = tokio::runtime::Runtime::new().expect("rt");
    rt.block_on(async {
        let started = broker.start_login(false).await.expect("start login");
        let state = started.state.clone();
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.wait_for_callback(started).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let redirect = format!(
            "http://localhost:3000/auth/wallet/callback?code=test-code&state={}",
            state
        );
        broker
            .complete_authorization(&redirect)
            .await
            .expect("complete authorization");
        waiter.await.expect("join").expect("login should succeed");
    });
    token_mock.assert();

    let session = rt
        .block_on(broker.sessions().current())
        .expect("load session")
        .expect("a session should be stored");
    assert_eq!(session.access_token, "fresh-access");
    assert_eq!(session.refresh_token.as_deref(), Some("refresh-1"));
    assert!(!session.is_expired());

    // and it survived to disk
    let conn = db::open_or_create(&dir.path().join("broker.db")).expect("open db");
    let raw = db::load_session_raw(&conn, "portal-web")
        .expect("query")
        .expect("row");
    assert!(raw.contains("fresh-access"));
}

#[test]
fn state_mismatch_never_reaches_the_token_endpoint() {
    let mut server = Server::new();
    let base = server.url();
    let token_mock = server.mock("POST", "/oauth/token").expect(0).create();

    let dir = tempfile::tempdir().expect("tmpdir");
    let broker = Arc::new(LoginBroker::with_launcher(
        test_config(&dir, &base),
        Arc::new(MockBrowser::new()),
    ));

    let rt = tokio::runtime::Runtime::new().expect("rt");
    let err = rt.block_on(async {
        let started = broker.start_login(false).await.expect("start login");
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.wait_for_callback(started).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let redirect =
            "http://localhost:3000/auth/wallet/callback?code=test-code&state=not-the-issued-one";
        let err = broker
            .complete_authorization(redirect)
            .await
            .err()
            .expect("mismatched state must fail");
        let waited = waiter.await.expect("join").err().expect("attempt fails");
        assert!(matches!(waited, LoginError::Callback(_)));
        err
    });
    assert!(err.to_string().contains("state mismatch"));
    token_mock.assert();
}

#[test]
fn provider_denial_is_not_an_exchange() {
    let mut server = Server::new();
    let base = server.url();
    let token_mock = server.mock("POST", "/oauth/token").expect(0).create();

    let dir = tempfile::tempdir().expect("tmpdir");
    let broker = Arc::new(LoginBroker::with_launcher(
        test_config(&dir, &base),
        Arc::new(MockBrowser::new()),
    ));

    let rt = tokio::runtime::Runtime::new().expect("rt");
    rt.block_on(async {
        let started = broker.start_login(false).await.expect("start login");
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.wait_for_callback(started).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // the user clicked "deny"; state does not matter for that outcome
        broker
            .complete_authorization(
                "http://localhost:3000/auth/wallet/callback?error=access_denied&state=whatever",
            )
            .await
            .expect("denial is a clean outcome");
        let res = waiter.await.expect("join");
        assert!(matches!(res, Err(LoginError::Denied)));
    });
    token_mock.assert();
}

#[test]
fn failed_exchange_reports_and_errs() {
    let mut server = Server::new();
    let base = server.url();
    let token_mock = server
        .mock("POST", "/oauth/token")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(json!({"error": "invalid_grant"}).to_string())
        .create();

    let dir = tempfile::tempdir().expect("tmpdir");
    let broker = Arc::new(LoginBroker::with_launcher(
        test_config(&dir, &base),
        Arc::new(MockBrowser::new()),
    ));

    let rt = tokio::runtime::Runtime::new().expect("rt");
    rt.block_on(async {
        let started = broker.start_login(false).await.expect("start login");
        let state = started.state.clone();
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.wait_for_callback(started).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let redirect = format!(
            "http://localhost:3000/auth/wallet/callback?code=test-code&state={}",
            state
        );
        let err = broker
            .complete_authorization(&redirect)
            .await
            .err()
            .expect("exchange should fail");
        assert!(err.to_string().contains("token exchange failed"));

        let waited = waiter.await.expect("join").err().expect("attempt fails");
        match waited {
            LoginError::Callback(m) => assert_eq!(m, "token exchange failed"),
            other => panic!("expected a callback error, got {:?}", other),
        }
    });
    token_mock.assert();

    let session = rt.block_on(broker.sessions().current()).expect("load");
    assert!(session.is_none(), "nothing should be stored after a failed exchange");
}

#[test]
fn near_expiry_session_is_refreshed_and_rotated() {
    let mut server = Server::new();
    let base = server.url();
    let token_mock = server
        .mock("POST", "/oauth/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "refresh-old".into()),
            Matcher::UrlEncoded("client_id".into(), "portal-web".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "access_token": "rotated-access",
                "expires_in": 3600,
                "refresh_token": "refresh-new",
                "scope": "openid profile"
            })
            .to_string(),
        )
        .create();

    let dir = tempfile::tempdir().expect("tmpdir");
    let cfg = test_config(&dir, &base);

    let conn = db::open_or_create(&dir.path().join("broker.db")).expect("open db");
    let stale = json!({
        "access_token": "stale",
        "token_type": "Bearer",
        "expires_at": 0,
        "refresh_token": "refresh-old",
        "scope": "openid profile"
    })
    .to_string();
    db::save_session_raw(&conn, "portal-web", &stale).expect("seed session");

    let sessions = SessionManager::new(cfg);
    let rt = tokio::runtime::Runtime::new().expect("rt");
    let token = rt.block_on(sessions.access_token()).expect("access token");
    assert_eq!(token, "rotated-access");
    token_mock.assert();

    let current = rt
        .block_on(sessions.current())
        .expect("load")
        .expect("session");
    assert_eq!(current.refresh_token.as_deref(), Some("refresh-new"));
    assert!(!current.is_expired());

    // rotation reached the disk copy too
    let raw = db::load_session_raw(&conn, "portal-web")
        .expect("query")
        .expect("row");
    assert!(raw.contains("refresh-new"));
}

#[test]
fn refresh_failure_surfaces_the_error() {
    let mut server = Server::new();
    let base = server.url();
    let _m = server
        .mock("POST", "/oauth/token")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(json!({"error": "invalid_grant"}).to_string())
        .create();

    let dir = tempfile::tempdir().expect("tmpdir");
    let cfg = test_config(&dir, &base);

    let conn = db::open_or_create(&dir.path().join("broker.db")).expect("open db");
    let stale = json!({
        "access_token": "stale",
        "token_type": "Bearer",
        "expires_at": 0,
        "refresh_token": "refresh-old"
    })
    .to_string();
    db::save_session_raw(&conn, "portal-web", &stale).expect("seed session");

    let sessions = SessionManager::new(cfg);
    let rt = tokio::runtime::Runtime::new().expect("rt");
    let res = rt.block_on(sessions.ensure_session());
    assert!(res.is_err());
    let e = res.err().map(|e| e.to_string()).unwrap_or_default();
    assert!(
        e.contains("invalid_grant") || e.contains("failed to refresh wallet session"),
        "unexpected error text: {}",
        e
    );
}

#[test]
fn refresh_without_a_session_is_an_error() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let cfg = test_config(&dir, "https://wallet.example.az");
    let sessions = SessionManager::new(cfg);

    let rt = tokio::runtime::Runtime::new().expect("rt");
    let err = rt
        .block_on(sessions.refresh())
        .err()
        .expect("refresh with nothing stored");
    assert!(err.to_string().contains("no stored wallet session"));
}

#[test]
fn logout_clears_the_session_and_announces() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let broker = LoginBroker::with_launcher(
        test_config(&dir, "https://wallet.example.az"),
        Arc::new(MockBrowser::new()),
    );

    let conn = db::open_or_create(&dir.path().join("broker.db")).expect("open db");
    let stored = json!({
        "access_token": "live",
        "token_type": "Bearer",
        "expires_at": 9_999_999_999i64,
        "refresh_token": "refresh-1"
    })
    .to_string();
    db::save_session_raw(&conn, "portal-web", &stored).expect("seed session");

    let mut auth_rx = broker.bus().subscribe_auth_events();
    let rt = tokio::runtime::Runtime::new().expect("rt");
    rt.block_on(broker.logout()).expect("logout");

    assert!(matches!(auth_rx.try_recv(), Ok(AuthEvent::StateChanged)));
    assert!(matches!(auth_rx.try_recv(), Err(TryRecvError::Empty)));

    let current = rt.block_on(broker.sessions().current()).expect("load");
    assert!(current.is_none());
    let raw = db::load_session_raw(&conn, "portal-web").expect("query");
    assert!(raw.is_none(), "the row should be gone after logout");
}
