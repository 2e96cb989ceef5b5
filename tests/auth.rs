mod common;

use std::fs;

use iri_dl::{Authenticator, CredentialStore, DataService, LOGIN_SUCCESS_PHRASE, LoginOutcome};

use common::{Reply, serve};

fn accepted_page() -> String {
    format!("<html><body><p>{LOGIN_SUCCESS_PHRASE}</p></body></html>")
}

#[test]
fn setup_saves_key_after_successful_login() {
    let (base, server) = serve(vec![
        Reply::ok(accepted_page()).header("Set-Cookie", "session=abc; Path=/"),
        Reply::ok(r#"{"key": "fresh-key"}"#),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join(".pycpt_dlauth"));
    let auth = Authenticator::new(base.clone(), store.clone());

    let token = auth.setup_with_password("me@example.com", "hunter2").unwrap();
    assert_eq!(token.as_deref(), Some("fresh-key"));
    assert_eq!(
        fs::read_to_string(store.path()).unwrap(),
        r#"{"key": "fresh-key"}"#
    );

    let seen = server.join().unwrap();
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].path, "/auth/login/local/submit/login");
    assert!(seen[0].body.contains("email=me%40example.com"), "{}", seen[0].body);
    assert!(seen[0].body.contains("password=hunter2"));
    assert!(seen[0].body.contains("redirect="));
    assert_eq!(seen[1].method, "GET");
    assert_eq!(seen[1].path, "/auth/genkey");
    assert_eq!(seen[1].header("cookie"), Some("session=abc"));
}

#[test]
fn setup_writes_nothing_when_login_rejected() {
    let (base, server) = serve(vec![Reply::ok("<html>Login failed</html>")]);
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join(".pycpt_dlauth"));
    let auth = Authenticator::new(base, store.clone());

    let token = auth.setup_with_password("me@example.com", "wrong").unwrap();
    assert_eq!(token, None);
    assert!(!store.exists());
    assert_eq!(server.join().unwrap().len(), 1);
}

#[test]
fn setup_writes_nothing_when_key_is_an_error_page() {
    let (base, server) = serve(vec![
        Reply::ok(accepted_page()),
        Reply::ok("<html><body>Not logged in</body></html>"),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join(".pycpt_dlauth"));
    let auth = Authenticator::new(base, store.clone());

    assert_eq!(auth.setup_with_password("me@example.com", "pw").unwrap(), None);
    assert!(!store.exists());
    server.join().unwrap();
}

#[test]
fn setup_propagates_http_failures() {
    let (base, server) = serve(vec![Reply::status(500, "oops")]);
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join(".pycpt_dlauth"));
    let auth = Authenticator::new(base, store.clone());

    assert!(auth.setup_with_password("me@example.com", "pw").is_err());
    assert!(!store.exists());
    server.join().unwrap();
}

#[test]
fn validation_login_reports_outcome() {
    let (base, server) = serve(vec![
        Reply::ok(accepted_page()),
        Reply::ok("<html>Please log in</html>"),
    ]);
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join(".pycpt_dlauth"));
    let auth = Authenticator::new(base, store.clone());

    assert_eq!(
        auth.login_with_password(DataService::S2s, "me@example.com", "pw").unwrap(),
        LoginOutcome::Accepted
    );
    assert_eq!(
        auth.login_with_password(DataService::C3s, "me@example.com", "pw").unwrap(),
        LoginOutcome::Rejected
    );
    assert!(!store.exists());

    let seen = server.join().unwrap();
    assert!(seen[0].body.contains("S2S"));
    assert!(seen[1].body.contains("C3S"));
}
