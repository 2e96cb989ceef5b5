use std::fs::{self, File};
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use reqwest::blocking::Client as HttpClient;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, info};
use url::Url;

use crate::auth::{Authenticator, CredentialStore};
use crate::dataset::{Dataset, load};
use crate::error::{Error, Result as EResult};
use crate::params::{FileFormat, Params, Value};
use crate::progress::ProgressBar;
use crate::sources::{DLAUTH_COOKIE, IRIDL_BASE_URL, is_http_url};
use crate::template::evaluate;

/// Bytes requested from the response body per read.
pub const CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Server used for login and key generation. Data URLs come from templates.
    pub base_url: String,
    /// Location of the dlauth key file; `~/.pycpt_dlauth` when unset.
    pub credential_path: Option<PathBuf>,
    pub verify_tls: bool,
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: IRIDL_BASE_URL.to_string(),
            credential_path: None,
            verify_tls: true,
            user_agent: concat!("iri-dl-rs/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Per-download switches.
///
/// `Default` is a plain anonymous download. Gated IRI data needs
/// [`DownloadOptions::dlauth`], which is what [`Client::fetch`] callers
/// normally pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Print the URL and a progress bar to stderr.
    pub verbose: bool,
    /// Send the saved dlauth key as a cookie.
    pub use_dlauth: bool,
}

impl DownloadOptions {
    /// Authenticated download, the usual choice for [`Client::fetch`].
    pub fn dlauth() -> Self {
        Self {
            verbose: false,
            use_dlauth: true,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// A completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub url: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub chunks: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct Client {
    opts: ClientOptions,
    http: HttpClient,
    store: CredentialStore,
}

impl Client {
    pub fn new(opts: ClientOptions) -> EResult<Self> {
        if !is_http_url(&opts.base_url) {
            return Err(Error::Domain(format!(
                "base_url must be an http(s) URL, got {}",
                opts.base_url
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&opts.user_agent)
                .map_err(|_| Error::Domain(format!("invalid user agent: {}", opts.user_agent)))?,
        );

        let mut builder = HttpClient::builder().default_headers(headers);
        if !opts.verify_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder.build()?;

        let store = match &opts.credential_path {
            Some(p) => CredentialStore::new(p.clone()),
            None => CredentialStore::default(),
        };

        Ok(Self { opts, http, store })
    }

    /// Convenience constructor with the default options.
    pub fn default_client() -> EResult<Self> {
        Self::new(ClientOptions::default())
    }

    pub fn credential_store(&self) -> &CredentialStore {
        &self.store
    }

    /// Login flows against the configured server, sharing this client's
    /// credential file.
    pub fn authenticator(&self) -> Authenticator {
        Authenticator::new(self.opts.base_url.clone(), self.store.clone())
            .with_user_agent(self.opts.user_agent.clone())
            .with_verify_tls(self.opts.verify_tls)
    }

    /// Downloads `url` to `dest` and returns where the file landed.
    ///
    /// The request is a POST with redirects followed; non-2xx statuses are
    /// errors. A 2xx error page is written like any other body.
    pub fn download(
        &self,
        url: &str,
        dest: impl AsRef<Path>,
        opts: &DownloadOptions,
    ) -> EResult<Download> {
        if opts.verbose {
            eprintln!("URL: {url}\n");
        }

        let cookie = if opts.use_dlauth {
            let token = self
                .store
                .read_token()
                .ok_or(Error::MissingCredentials)?;
            Some(format!("{DLAUTH_COOKIE}={token}"))
        } else {
            None
        };

        let parsed = Url::parse(url)?;
        debug!(url = %parsed, dlauth = cookie.is_some(), "requesting");
        let mut req = self.http.post(parsed);
        if let Some(cookie) = cookie {
            req = req.header(COOKIE, cookie);
        }
        let resp = req.send()?.error_for_status()?;

        let path = resolve_destination(dest.as_ref())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let started = Instant::now();
        let (size_bytes, chunks) = {
            let mut file = BufWriter::new(File::create(&path)?);
            let counts = if opts.verbose {
                let mut bar = ProgressBar::stderr();
                stream_body(resp, &mut file, Some(&mut bar))?
            } else {
                stream_body(resp, &mut file, None::<&mut ProgressBar<io::Stderr>>)?
            };
            file.flush()?;
            counts
        };

        if !path.is_file() {
            return Err(Error::FileNotWritten(path));
        }

        let elapsed = started.elapsed();
        info!(url, path = %path.display(), size_bytes, chunks, "download complete");
        Ok(Download {
            url: url.to_string(),
            path,
            size_bytes,
            chunks,
            elapsed,
        })
    }

    /// Evaluates `template` with `params`, downloads the result to `dest` and
    /// parses it according to the `filetype` parameter.
    ///
    /// The dlauth cookie is only sent when `opts.use_dlauth` is set; pass
    /// [`DownloadOptions::dlauth`] rather than `DownloadOptions::default()`
    /// for gated datasets.
    ///
    /// ```no_run
    /// use iri_dl::{Client, DownloadOptions, Extent, FileFormat, Params};
    ///
    /// let client = Client::default_client()?;
    /// let params = Params::new()
    ///     .filetype(FileFormat::CptV10)
    ///     .first_year(1982)
    ///     .final_year(2018)
    ///     .predictand_extent(Extent::new(15.0, -5.0, 10.0, -20.0));
    /// let ds = client.fetch(
    ///     "https://iridl.ldeo.columbia.edu/SOURCES/.NOAA/.NCEP/.CPC/.CMAP/.V0310/.monthly/.prcp/T/(Jan%20{first_year})/(Dec%20{final_year})/RANGE/Y/{predictand_extent['south']}/{predictand_extent['north']}/RANGEEDGES/X/{predictand_extent['west']}/{predictand_extent['east']}/RANGEEDGES/-999/setmissing_value/[X/Y][T]cptv10.tsv",
    ///     "obs.tsv",
    ///     &DownloadOptions::dlauth(),
    ///     &params,
    /// )?;
    /// println!("{:?}", ds.data_vars.keys().collect::<Vec<_>>());
    /// # Ok::<(), iri_dl::Error>(())
    /// ```
    pub fn fetch(
        &self,
        template: &str,
        dest: impl AsRef<Path>,
        opts: &DownloadOptions,
        params: &Params,
    ) -> EResult<Dataset> {
        let format = requested_format(params)?;

        let url = evaluate(template, params).map_err(|e| {
            Error::Domain(format!(
                "You must pass all the required arguments for this URL as parameters to fetch(...).\n URL: {template}\n ARGS: {params}\n CAUSE: {e}"
            ))
        })?;

        let download = self.download(&url, dest, opts)?;

        load(&download.path, format).map_err(|e| {
            Error::Domain(format!(
                "Please check what's downloaded from here, it may be broken: {url}\n CAUSE: {e}"
            ))
        })
    }
}

fn requested_format(params: &Params) -> EResult<FileFormat> {
    let tag = match params.get("filetype") {
        Some(Value::Str(tag)) => tag.as_str(),
        Some(other) => {
            return Err(Error::Domain(format!("invalid download format: {other}")));
        }
        None => {
            return Err(Error::Domain(
                "Required keyword argument missing: 'filetype'".to_string(),
            ));
        }
    };
    FileFormat::from_tag(tag)
        .ok_or_else(|| Error::Domain(format!("invalid download format: {tag}")))
}

/// Expands a leading `~` and makes the path absolute.
fn resolve_destination(dest: &Path) -> EResult<PathBuf> {
    let expanded = match dest.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => dest.to_path_buf(),
        },
        Err(_) => dest.to_path_buf(),
    };
    Ok(std::path::absolute(expanded)?)
}

/// Copies `body` to `out` in reads of at most [`CHUNK_SIZE`] bytes, ticking
/// `progress` once per chunk. Returns `(bytes, chunks)`.
fn stream_body<R: Read, W: Write, P: Write>(
    mut body: R,
    out: &mut W,
    mut progress: Option<&mut ProgressBar<P>>,
) -> io::Result<(u64, usize)> {
    if let Some(bar) = progress.as_deref_mut() {
        bar.start()?;
    }

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;
    let mut chunks = 0usize;
    loop {
        let n = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        out.write_all(&buf[..n])?;
        total += n as u64;
        chunks += 1;
        if let Some(bar) = progress.as_deref_mut() {
            bar.tick(n)?;
        }
    }

    if let Some(bar) = progress {
        bar.finish()?;
    }
    Ok((total, chunks))
}
