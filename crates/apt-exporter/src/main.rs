mod background;
mod handlers;
mod state;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use clap::Parser;
use prometheus::Registry;
use tower_http::compression::CompressionLayer;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use apt_exporter_core::collector::{AptLister, RealFs};
use apt_exporter_core::config::{DEFAULT_HISTORY_LOG, DEFAULT_PERIODIC_DIR, DEFAULT_REBOOT_MARKER};
use apt_exporter_core::{AptMetrics, AptPaths, RefreshTrigger, SnapshotCache, VERSION};

use background::Refresher;
use state::{SharedState, WebAppInner};

// ============================================================
// CLI
// ============================================================

#[derive(Parser, Debug)]
#[command(
    name = "apt-exporter",
    about = "Prometheus exporter for APT package state",
    version = VERSION
)]
struct Args {
    /// Address on which to expose metrics and web interface.
    #[arg(
        long = "web.listen-address",
        default_value = ":9509",
        env = "APT_EXPORTER_LISTEN_ADDRESS",
        value_parser = parse_listen_address
    )]
    listen_address: SocketAddr,

    /// Path under which to expose metrics.
    #[arg(
        long = "web.telemetry-path",
        default_value = "/metrics",
        env = "APT_EXPORTER_TELEMETRY_PATH",
        value_parser = parse_telemetry_path
    )]
    telemetry_path: String,

    /// apt binary used to list packages.
    #[arg(
        long = "apt.binary",
        default_value = AptLister::DEFAULT_BINARY,
        env = "APT_EXPORTER_APT_BINARY"
    )]
    apt_binary: PathBuf,

    /// Log appended to by every package operation.
    #[arg(
        long = "apt.history-log",
        default_value = DEFAULT_HISTORY_LOG,
        env = "APT_EXPORTER_HISTORY_LOG"
    )]
    history_log: PathBuf,

    /// Directory holding the periodic update stamps.
    #[arg(
        long = "apt.periodic-dir",
        default_value = DEFAULT_PERIODIC_DIR,
        env = "APT_EXPORTER_PERIODIC_DIR"
    )]
    periodic_dir: PathBuf,

    /// File whose existence means a restart is pending.
    #[arg(
        long = "apt.reboot-marker",
        default_value = DEFAULT_REBOOT_MARKER,
        env = "APT_EXPORTER_REBOOT_MARKER"
    )]
    reboot_marker: PathBuf,

    /// Seconds between checks of the watched paths.
    #[arg(
        long = "watch.interval",
        default_value = "2",
        env = "APT_EXPORTER_WATCH_INTERVAL",
        value_parser = parse_interval
    )]
    watch_interval: Duration,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Accepts `host:port`, `[v6]:port` or the bare `:port` form (all IPv4 interfaces).
fn parse_listen_address(s: &str) -> Result<SocketAddr, String> {
    let s = s.trim();
    if let Some(port) = s.strip_prefix(':') {
        let port: u16 = port
            .parse()
            .map_err(|e| format!("invalid port '{}': {}", port, e))?;
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
    }
    s.parse()
        .map_err(|e| format!("invalid listen address '{}': {}", s, e))
}

/// The landing page owns `/`, so metrics need a path of their own.
/// Route captures and wildcards are rejected: the path is matched literally.
fn parse_telemetry_path(s: &str) -> Result<String, String> {
    if !s.starts_with('/') {
        return Err(format!("telemetry path '{}' must start with '/'", s));
    }
    if s == "/" {
        return Err("telemetry path must not be '/'".to_string());
    }
    let dynamic = s.contains(['{', '}'])
        || s.split('/').any(|seg| seg.starts_with(':') || seg.starts_with('*'));
    if dynamic {
        return Err(format!("telemetry path '{}' must be a plain path", s));
    }
    Ok(s.to_string())
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .trim()
        .parse()
        .map_err(|e| format!("invalid interval '{}': {}", s, e))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("interval must be positive, got '{}'", s));
    }
    Ok(Duration::from_secs_f64(secs))
}

impl Args {
    fn apt_paths(&self) -> AptPaths {
        AptPaths {
            history_log: self.history_log.clone(),
            periodic_dir: self.periodic_dir.clone(),
            reboot_marker: self.reboot_marker.clone(),
        }
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["apt_exporter", "apt_exporter_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };
    runtime.block_on(async_main(args));
}

async fn async_main(args: Args) {
    info!(
        version = VERSION,
        os = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        "starting apt-exporter"
    );
    let paths = args.apt_paths();
    info!(
        listen = %args.listen_address,
        telemetry_path = %args.telemetry_path,
        apt = %args.apt_binary.display(),
        reboot_marker = %paths.reboot_marker.display(),
        "config"
    );

    let cache = SnapshotCache::new();
    let trigger = Arc::new(RefreshTrigger::new(
        AptLister::new(&args.apt_binary),
        cache.clone(),
        paths.clone(),
    ));

    let refresher = match Refresher::start(trigger, args.watch_interval) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "startup failed");
            process::exit(1);
        }
    };

    let registry = Registry::new();
    let registered = AptMetrics::new(cache.clone(), RealFs::new(), &paths.reboot_marker)
        .and_then(|metrics| registry.register(Box::new(metrics)));
    if let Err(e) = registered {
        error!(error = %e, "failed to register metrics");
        process::exit(1);
    }

    let state: SharedState = Arc::new(WebAppInner {
        registry,
        telemetry_path: args.telemetry_path.clone(),
        cache,
    });
    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(args.listen_address).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %args.listen_address, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(addr = %args.listen_address, "listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(background::shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        process::exit(1);
    }

    refresher.stop().await;
    info!("stopped");
}

fn build_router(state: SharedState) -> Router {
    Router::new()
        .route(&state.telemetry_path, get(handlers::handle_metrics))
        .route("/", get(handlers::handle_landing))
        .with_state(state)
        .layer(CompressionLayer::new())
}
