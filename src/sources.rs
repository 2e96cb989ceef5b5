use url::Url;

use crate::error::Result;

/// Default Ingrid server.
pub const IRIDL_BASE_URL: &str = "https://iridl.ldeo.columbia.edu";

pub const SIGNUP_URL: &str = "https://iridl.ldeo.columbia.edu/auth/signup";
pub const TERMS_URL: &str = "https://iridl.ldeo.columbia.edu/auth/legal/terms-of-service";
pub const PRIVACY_URL: &str = "https://iridl.ldeo.columbia.edu/auth/legal/privacy-policy";

pub const LOGIN_PATH: &str = "/auth/login/local/submit/login";
pub const GENKEY_PATH: &str = "/auth/genkey";
pub const SETUP_REDIRECT_PATH: &str = "/auth";

/// Name of the cookie carrying the dlauth key on data requests.
pub const DLAUTH_COOKIE: &str = "__dlauth_id";

/// File name of the credential store under the home directory.
pub const CREDENTIAL_FILE_NAME: &str = ".pycpt_dlauth";

/// Joins an absolute endpoint path onto the configured base URL.
///
/// Any path already present on the base is kept, so a server mounted below a
/// prefix (`https://host/dl`) resolves to `https://host/dl/auth/genkey`.
pub fn endpoint(base_url: &str, path: &str) -> Result<Url> {
    let base = Url::parse(base_url)?;
    let joined = format!("{}{}", base.as_str().trim_end_matches('/'), path);
    Ok(Url::parse(&joined)?)
}

pub fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}
