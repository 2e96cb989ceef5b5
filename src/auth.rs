//! dlauth credentials: the saved key file and the login flows that create it.

use std::fs;
use std::path::{Path, PathBuf};

use dialoguer::Password;
use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::sources::{
    CREDENTIAL_FILE_NAME, GENKEY_PATH, LOGIN_PATH, PRIVACY_URL, SETUP_REDIRECT_PATH, SIGNUP_URL,
    TERMS_URL, endpoint,
};

/// Marker the login endpoint includes in the redirect target page when the
/// credentials were accepted. The two spaces are part of the upstream text.
pub const LOGIN_SUCCESS_PHRASE: &str = "This dataset has  bytes";

/// Whether a login response body indicates accepted credentials.
pub fn login_succeeded(body: &str) -> bool {
    body.contains(LOGIN_SUCCESS_PHRASE)
}

fn looks_like_html(body: &str) -> bool {
    body.contains("html")
}

/// Reads a password from the terminal without echo.
pub fn prompt_password() -> Result<String> {
    let pswd = Password::new()
        .with_prompt("DLAUTH PASSWORD")
        .allow_empty_password(true)
        .interact()?;
    Ok(pswd.trim().to_string())
}

#[derive(Debug, Deserialize)]
struct CredentialRecord {
    key: String,
}

/// The saved dlauth key file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialStore {
    path: PathBuf,
}

impl Default for CredentialStore {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| {
            debug!("no home directory, using the working directory for {CREDENTIAL_FILE_NAME}");
            PathBuf::new()
        });
        Self::new(home.join(CREDENTIAL_FILE_NAME))
    }
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Returns the saved key, or `None` with a diagnostic when the file is
    /// missing, holds a login error page, or cannot be read.
    pub fn read_token(&self) -> Option<String> {
        if !self.exists() {
            warn!(
                "You need to set up an IRIDLAUTH! Please set up an IRI account here ({SIGNUP_URL}), then use Authenticator::setup(\"your_iri_login_email\") to set up the cookie. This only needs to happen once!"
            );
            return None;
        }

        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unable to read credential file");
                return None;
            }
        };

        if let Ok(record) = serde_json::from_slice::<CredentialRecord>(&bytes) {
            return Some(record.key);
        }

        match std::str::from_utf8(&bytes) {
            Ok(text) if looks_like_html(text) => {
                warn!(
                    path = %self.path.display(),
                    "Your existing credential file looked like an 'incorrect username/password' message!"
                );
                None
            }
            Ok(_) => {
                warn!(
                    path = %self.path.display(),
                    "credential file is not a dlauth key record; delete it and set up again"
                );
                None
            }
            Err(_) => {
                warn!(
                    path = %self.path.display(),
                    "Unable to read text from the credential file - it might be binary spaghetti; broken download? delete it and set up again!"
                );
                None
            }
        }
    }

    /// Writes `bytes` verbatim, creating parent directories as needed.
    pub fn write_raw(&self, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, bytes)?;
        Ok(())
    }
}

/// Gated data collections that require a recorded terms agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataService {
    S2s,
    C3s,
}

impl DataService {
    pub fn name(self) -> &'static str {
        match self {
            DataService::S2s => "S2S",
            DataService::C3s => "C3S",
        }
    }

    /// Page the login endpoint redirects to; it is gated by the service terms.
    pub fn redirect(self) -> &'static str {
        match self {
            DataService::S2s => {
                "/SOURCES/.ECMWF/.S2S/.NCEP/.forecast/.perturbed/.sfc_temperature/.skt/datafiles.html"
            }
            DataService::C3s => {
                "/SOURCES/.EU/.Copernicus/.CDS/.C3S/.DWD/.GCFS2p1/.hindcast/.prcp/datafiles.html"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Accepted,
    Rejected,
}

/// Runs the login protocol against an Ingrid server.
#[derive(Debug, Clone)]
pub struct Authenticator {
    base_url: String,
    store: CredentialStore,
    user_agent: String,
    verify_tls: bool,
}

impl Authenticator {
    pub fn new(base_url: impl Into<String>, store: CredentialStore) -> Self {
        Self {
            base_url: base_url.into(),
            store,
            user_agent: concat!("iri-dl-rs/", env!("CARGO_PKG_VERSION")).to_string(),
            verify_tls: true,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// A fresh cookie-keeping session, dropped at the end of each flow.
    fn session(&self) -> Result<HttpClient> {
        let mut builder = HttpClient::builder()
            .cookie_store(true)
            .user_agent(self.user_agent.clone());
        if !self.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(builder.build()?)
    }

    fn submit_login(
        &self,
        http: &HttpClient,
        email: &str,
        password: &str,
        redirect: &str,
    ) -> Result<String> {
        let url = endpoint(&self.base_url, LOGIN_PATH)?;
        debug!(%url, redirect, "submitting dlauth login");
        let resp = http
            .post(url)
            .form(&[("email", email), ("password", password), ("redirect", redirect)])
            .send()?
            .error_for_status()?;
        Ok(resp.text()?)
    }

    /// Prompts for a password and records the terms agreement for `service`.
    pub fn login(&self, service: DataService, email: &str) -> Result<LoginOutcome> {
        let password = prompt_password()?;
        self.login_with_password(service, email, &password)
    }

    /// Checks the credentials against `service` without storing anything.
    ///
    /// Rejected credentials are reported and returned as
    /// [`LoginOutcome::Rejected`]; only transport failures are errors.
    pub fn login_with_password(
        &self,
        service: DataService,
        email: &str,
        password: &str,
    ) -> Result<LoginOutcome> {
        let http = self.session()?;
        let body = self.submit_login(&http, email, password, service.redirect())?;

        if login_succeeded(&body) {
            info!(
                "You have recorded your agreement to: the {} terms and conditions / privacy policy\nT&C: {TERMS_URL}\nPrivacy: {PRIVACY_URL}",
                service.name()
            );
            Ok(LoginOutcome::Accepted)
        } else {
            warn!(service = service.name(), "Incorrect user or password");
            debug!(%body, "login response");
            Ok(LoginOutcome::Rejected)
        }
    }

    /// First-time setup: prompts for a password, logs in and saves a dlauth key.
    pub fn setup(&self, email: &str) -> Result<Option<String>> {
        if self.store.exists() {
            return Ok(self.existing_token());
        }
        let password = prompt_password()?;
        self.setup_with_password(email, &password)
    }

    /// Logs in and saves the key returned by the key-generation endpoint.
    ///
    /// An existing credential file is never overwritten; its token is
    /// returned instead. Returns `None` when the credentials are rejected.
    pub fn setup_with_password(&self, email: &str, password: &str) -> Result<Option<String>> {
        if self.store.exists() {
            return Ok(self.existing_token());
        }

        let http = self.session()?;
        let redirect = endpoint(&self.base_url, SETUP_REDIRECT_PATH)?;
        let body = self.submit_login(&http, email, password, redirect.as_str())?;
        if !login_succeeded(&body) {
            warn!("Incorrect Username or Password");
            return Ok(None);
        }

        let url = endpoint(&self.base_url, GENKEY_PATH)?;
        debug!(%url, "requesting dlauth key");
        let key = http.get(url).send()?.error_for_status()?.bytes()?;
        if looks_like_html(&String::from_utf8_lossy(&key)) {
            warn!("Incorrect Username or Password");
            return Ok(None);
        }

        self.store.write_raw(&key)?;
        info!(path = %self.store.path().display(), "saved dlauth key");
        Ok(self.store.read_token())
    }

    fn existing_token(&self) -> Option<String> {
        warn!(
            path = %self.store.path().display(),
            "You already have an IRIDLAUTH!"
        );
        self.store.read_token()
    }
}
