mod access_log;
mod background;
mod handlers;
mod hub;
mod openapi;
mod state;

use std::net::SocketAddr;
use std::process;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use clap::Parser;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use hostmon_core::collector::HostProbe;
#[cfg(target_os = "linux")]
use hostmon_core::collector::RealFs;
#[cfg(not(target_os = "linux"))]
use hostmon_core::collector::mock::MockFs;
use hostmon_core::collector::ProcfsProbe;

use access_log::AccessLogLayer;
use background::{Sampler, SamplerConfig, SharedProbe};
use hub::{BroadcastHub, HubConfig};
use openapi::ApiDoc;
use state::{AppState, SamplerStats, SnapshotStore};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(name = "hostmon-web", about = "Host CPU/memory monitor with HTTP and WebSocket API", version = hostmon_core::VERSION)]
struct Args {
    /// Listen host.
    #[arg(long, default_value = "0.0.0.0", env = "HOSTMON_HOST")]
    host: String,

    /// Listen port.
    #[arg(long, default_value_t = 7070, env = "PORT")]
    port: u16,

    /// Sampling interval in milliseconds.
    #[arg(long, default_value_t = 1000, env = "HOSTMON_INTERVAL_MS", value_parser = clap::value_parser!(u64).range(1..))]
    interval_ms: u64,

    /// Longest a single probe may take before the tick is skipped.
    #[arg(long, default_value_t = 800, env = "HOSTMON_PROBE_TIMEOUT_MS", value_parser = clap::value_parser!(u64).range(1..))]
    probe_timeout_ms: u64,

    /// Frames buffered per stream subscriber.
    #[arg(long, default_value_t = 16, env = "HOSTMON_QUEUE_CAPACITY", value_parser = clap::value_parser!(u64).range(1..))]
    queue_capacity: u64,

    /// Consecutive dropped frames before a slow subscriber is disconnected.
    #[arg(long, default_value_t = 8, env = "HOSTMON_MAX_OVERFLOWS", value_parser = clap::value_parser!(u32).range(1..))]
    max_overflows: u32,

    /// Server ping period on idle streams, in seconds.
    #[arg(long, default_value_t = 30, env = "HOSTMON_PING_INTERVAL_SECS", value_parser = clap::value_parser!(u64).range(1..))]
    ping_interval_secs: u64,

    /// Longest a stream write may block before the client is disconnected.
    #[arg(long, default_value_t = 10_000, env = "HOSTMON_WRITE_TIMEOUT_MS", value_parser = clap::value_parser!(u64).range(1..))]
    write_timeout_ms: u64,

    /// Path to /proc filesystem.
    #[arg(long, default_value = "/proc")]
    proc_path: String,
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hostmon_web=info")),
        )
        .init();

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
    let addr: SocketAddr = match format!("{}:{}", args.host, args.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(host = %args.host, port = args.port, error = %e, "invalid listen address");
            process::exit(1);
        }
    };

    info!(version = hostmon_core::VERSION, proc_path = %args.proc_path, "starting");

    // A probe that cannot read the host now will not be able to later either.
    // This also seeds the CPU counters so the first tick reports a real delta.
    let mut probe = create_probe(&args);
    match probe.sample() {
        Ok(reading) => info!(
            cores = reading.cores.len(),
            brand = %reading.cpu.brand,
            "host probe ready"
        ),
        Err(e) => {
            error!(error = %e, "host probe failed at startup");
            process::exit(1);
        }
    }
    let probe: SharedProbe = Arc::new(Mutex::new(probe));

    let interval = Duration::from_millis(args.interval_ms);
    let store = Arc::new(SnapshotStore::new());
    let hub = Arc::new(BroadcastHub::new(HubConfig {
        queue_capacity: args.queue_capacity as usize,
        max_overflows: args.max_overflows,
    }));
    let stats = Arc::new(SamplerStats::default());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sampler = Sampler::new(
        probe,
        store.clone(),
        hub.clone(),
        stats.clone(),
        SamplerConfig {
            interval,
            probe_timeout: Duration::from_millis(args.probe_timeout_ms),
        },
    );
    let sampler_task = tokio::spawn(sampler.run(shutdown_rx));

    let state = AppState {
        store,
        hub: hub.clone(),
        stats,
        interval,
        ping_interval: Duration::from_secs(args.ping_interval_secs),
        write_timeout: Duration::from_millis(args.write_timeout_ms),
    };
    let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(%addr, interval_ms = args.interval_ms, "listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
            // Open streams hold their connections; end them so graceful shutdown can finish
            let closed = hub.close_all();
            info!(closed, "closed stream subscribers");
        })
        .await;

    if let Err(e) = served {
        error!(error = %e, "server error");
        process::exit(1);
    }
    if let Err(e) = sampler_task.await {
        error!(error = %e, "sampler task failed");
    }
    info!("stopped");
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::handle_health))
        .route("/api/health", get(handlers::handle_health))
        .route("/api/status", get(handlers::handle_status))
        .route("/api/cpus", get(handlers::handle_cpus))
        .route("/api/cpus/cores", get(handlers::handle_cpu_cores))
        .route("/api/memory", get(handlers::handle_memory))
        .route("/realtime/cpus", get(handlers::handle_realtime_cpus))
        .route("/realtime/memory", get(handlers::handle_realtime_memory))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
        .layer(AccessLogLayer)
        .layer(CorsLayer::permissive())
}

fn create_probe(args: &Args) -> Box<dyn HostProbe> {
    #[cfg(target_os = "linux")]
    {
        Box::new(ProcfsProbe::new(RealFs::new(), &args.proc_path))
    }
    #[cfg(not(target_os = "linux"))]
    {
        warn!("no procfs on this platform, serving a simulated host");
        Box::new(ProcfsProbe::new(MockFs::typical_system(), &args.proc_path))
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
