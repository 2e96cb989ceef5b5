use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("template error: {0}")]
    Template(String),

    #[error("{0}")]
    Domain(String),

    #[error(
        "no dlauth key available: run `Authenticator::setup(\"your_email\")` to get a cookie before downloading this data, or set `use_dlauth` to false"
    )]
    MissingCredentials,

    #[error("failed to write file: {}", .0.display())]
    FileNotWritten(PathBuf),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{0} support is not enabled in this build")]
    FormatUnavailable(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("password prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[cfg(feature = "netcdf")]
    #[error("netcdf error: {0}")]
    Netcdf(#[from] netcdf::Error),
}
