#![forbid(unsafe_code)]

//! Rust client for the IRI Data Library.
//!
//! Data requests are Ingrid URLs built from templates: parameters such as the
//! forecast issue date, hindcast years, lead times and spatial extents are
//! substituted into the template, the resulting URL is downloaded, and the
//! file is parsed into a [`Dataset`]. Gated collections need a dlauth key,
//! created once with [`Authenticator::setup`] and sent as a cookie afterwards.
//!
//! **Quick start**
//! ```no_run
//! use chrono::NaiveDate;
//! use iri_dl::{Client, ClientOptions, DownloadOptions, Extent, FileFormat, Params};
//!
//! let client = Client::new(ClientOptions::default())?;
//!
//! // One-time setup; stores ~/.pycpt_dlauth.
//! client.authenticator().setup("me@example.com")?;
//!
//! let params = Params::new()
//!     .filetype(FileFormat::CptV10)
//!     .fdate(NaiveDate::from_ymd_opt(2022, 5, 1).unwrap())
//!     .first_year(1991)
//!     .final_year(2020)
//!     .lead_low(1.5)
//!     .lead_high(3.5)
//!     .predictor_extent(Extent::new(20.0, -10.0, 30.0, -20.0));
//! let ds = client.fetch(
//!     "https://iridl.ldeo.columbia.edu/SOURCES/.Models/.NMME/.SPEAR/.HINDCAST/.MONTHLY/.prec/S/(0000%201%20{fdate.strftime('%b')}%20{first_year}-{final_year})/VALUES/L/{lead_low}/{lead_high}/RANGEEDGES/[L]//keepgrids/average/{'[M]average/' if ensemblemean else ''}Y/{predictor_extent['south']}/{predictor_extent['north']}/RANGEEDGES/X/{predictor_extent['west']}/{predictor_extent['east']}/RANGEEDGES/-999/setmissing_value/[X/Y][S/L/add]cptv10.tsv",
//!     "spear_prec.tsv",
//!     &DownloadOptions::dlauth().verbose(true),
//!     &params,
//! )?;
//! println!("{:?}", ds.data_vars.keys().collect::<Vec<_>>());
//! # Ok::<(), iri_dl::Error>(())
//! ```
//!
//! Notes:
//! - `data.nc` files are read through the system NetCDF library; enable the
//!   `netcdf` feature to use them.
//! - There is no retry or caching: each call downloads again.

mod auth;
mod client;
mod cpt;
mod dataset;
mod date;
mod error;
#[cfg(feature = "netcdf")]
mod nc;
mod params;
mod progress;
mod sources;
mod template;

pub use crate::auth::{
    Authenticator, CredentialStore, DataService, LOGIN_SUCCESS_PHRASE, LoginOutcome,
    login_succeeded, prompt_password,
};
pub use crate::client::{CHUNK_SIZE, Client, ClientOptions, Download, DownloadOptions};
pub use crate::dataset::{Coordinate, CoordinateValues, DataArray, Dataset, load};
pub use crate::date::{
    seasonal_target, seasonal_target_length, seasonal_target_length_monthly, threeletters,
};
pub use crate::error::{Error, Result};
pub use crate::params::{Extent, FileFormat, Params, Value};
pub use crate::progress::ProgressBar;
pub use crate::sources::{CREDENTIAL_FILE_NAME, DLAUTH_COOKIE, IRIDL_BASE_URL};
pub use crate::template::evaluate;

/// Parses CPT v10 text already in memory.
pub use crate::cpt::parse as parse_cpt;
