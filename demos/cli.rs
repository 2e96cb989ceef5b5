use std::env;

use iri_dl::{Client, ClientOptions, DataService, DownloadOptions, Params, Value, evaluate};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage:
  cargo run --example cli -- setup <email>
  cargo run --example cli -- login <s2s|c3s> <email>
  cargo run --example cli -- url <template> [key=value ...]
  cargo run --example cli -- download <url> <dest> [--dlauth]
  cargo run --example cli -- fetch <template> <dest> [key=value ...]

Example (CMAP observations as CPT v10):
  cargo run --example cli -- fetch \\
    'https://iridl.ldeo.columbia.edu/SOURCES/.NOAA/.NCEP/.CPC/.CMAP/.V0310/.monthly/.prcp/T/(Jan%20{first_year})/(Dec%20{final_year})/RANGE/[X/Y][T]cptv10.tsv' \\
    obs.tsv filetype=cptv10.tsv first_year=1982 final_year=2018

Notes:
- Values are typed automatically: 1982 -> int, 1.5 -> float, 2022-05-01 -> date, True/False -> bool.
- Set RUST_LOG=debug for request details.";

fn params_from(args: &[String]) -> Params {
    args.iter()
        .filter_map(|a| a.split_once('='))
        .map(|(k, v)| (k.to_string(), Value::parse_auto(v)))
        .collect()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("{USAGE}");
        return;
    }

    let client = match Client::new(ClientOptions::default()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("create client failed: {e}");
            std::process::exit(1);
        }
    };

    let outcome = match args[1].as_str() {
        "setup" => client.authenticator().setup(&args[2]).map(|token| {
            if token.is_some() {
                println!("dlauth key saved to {}", client.credential_store().path().display());
            }
        }),
        "login" if args.len() >= 4 => {
            let service = match args[2].to_ascii_lowercase().as_str() {
                "s2s" => DataService::S2s,
                "c3s" => DataService::C3s,
                other => {
                    eprintln!("unknown service {other:?}; use s2s or c3s");
                    std::process::exit(2);
                }
            };
            client
                .authenticator()
                .login(service, &args[3])
                .map(|outcome| println!("{outcome:?}"))
        }
        "url" => evaluate(&args[2], &params_from(&args[3..])).map(|url| println!("{url}")),
        "download" if args.len() >= 4 => {
            let opts = DownloadOptions {
                verbose: true,
                use_dlauth: args[4..].iter().any(|a| a == "--dlauth"),
            };
            client.download(&args[2], &args[3], &opts).map(|dl| {
                println!("Downloaded {} bytes to {}", dl.size_bytes, dl.path.display());
            })
        }
        "fetch" if args.len() >= 4 => {
            let params = params_from(&args[4..]);
            client
                .fetch(&args[2], &args[3], &DownloadOptions::dlauth().verbose(true), &params)
                .map(|ds| {
                    for (name, arr) in &ds.data_vars {
                        println!("{name}: dims={:?} shape={:?}", arr.dims, arr.shape);
                    }
                })
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(e) = outcome {
        eprintln!("{} failed: {e}", args[1]);
        std::process::exit(1);
    }
}
