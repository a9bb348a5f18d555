use marksheetd::ipc;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    // stdout carries the protocol; logs go to stderr.
    let filter = EnvFilter::try_from_env("MARKSHEETD_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    dotenvy::dotenv().ok();
    init_logging();

    let mut state = ipc::AppState::default();

    if let Some(path) = std::env::var_os("MARKSHEETD_WORKSPACE").map(PathBuf::from) {
        if let Err(e) = ipc::open_workspace(&mut state, &path) {
            warn!(workspace = %path.display(), error = %e, "could not open startup workspace");
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "marksheetd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                // Can't reply with an id.
                warn!(error = %e, "unparseable request line");
                ipc::bad_json(e.to_string())
            }
        };

        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
