//! Quern — local iOS development debugging daemon.
//!
//! Ingests logs from multiple sources into a bounded in-memory ring,
//! exposes query/stream/summary endpoints over an authenticated local HTTP
//! API, supervises a small set of long-lived worker subprocesses, and
//! mediates exclusive access to a shared device pool.
//!
//! This file owns component A/B: discovering an already-running instance,
//! binding the HTTP listeners, wiring every other component's shared state
//! together, and the ordered startup/shutdown sequence.

mod adapters;
mod api;
mod classifier;
mod cli;
mod config;
mod devices;
mod error;
mod logging;
mod model;
mod proxy;
mod ring;
mod state;
mod summarizer;
mod util;
mod watchdog;

use adapters::crash_watcher::CrashWatcher;
use adapters::supervisor::{RestartPolicy, Supervisor};
use adapters::Pipeline;
use anyhow::{Context, Result};
use api::AppState;
use chrono::Utc;
use config::Config;
use devices::{DevicePool, StubScanner};
use logging::{BufferLogLayer, LogBuffer};
use proxy::addon::MitmproxyAddon;
use proxy::intercept::InterceptRegistry;
use proxy::mocks::MockRegistry;
use proxy::FlowStore;
use ring::Ring;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Reserved device-pool owner tag for claims the daemon makes on its own
/// behalf, released best-effort at shutdown (spec §4.B).
const INTERNAL_DEVICE_OWNER: &str = "quernd";

/// Plain synchronous entry point: CLI/config/already-running checks run
/// here, and — critically — `daemonize()` forks before any tokio runtime
/// exists. `fork()` only duplicates the calling thread, so a runtime
/// built (and tasks spawned on it) beforehand would simply vanish from
/// the detached child; everything that needs to survive into the daemon
/// is built after the fork, inside `run()`.
fn main() -> Result<()> {
    let cli = cli::Cli::parse_args();

    if let Some(home) = &cli.home {
        std::env::set_var("QUERN_HOME", home);
    }

    if cli.stop {
        let rt = tokio::runtime::Runtime::new().context("failed to start runtime")?;
        return rt.block_on(stop_running_instance());
    }

    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.foreground {
        config.daemonize = false;
    }
    let config = Arc::new(config);

    Config::ensure_config_exists(&config.state_dir);

    // Scoped so the probe runtime (and its worker threads) is fully torn
    // down before a possible fork below.
    {
        let rt = tokio::runtime::Runtime::new().context("failed to start runtime")?;
        if let Some(existing) = state::read_state(&config.state_file_path()) {
            let alive = rt.block_on(async {
                state::pid_is_alive(existing.pid)
                    && state::check_health(existing.http_port, Duration::from_secs(3)).await
            });
            if alive {
                eprintln!(
                    "quernd: already running (pid {}, port {})",
                    existing.pid, existing.http_port
                );
                std::process::exit(2);
            }
            eprintln!("quernd: stale state file (pid {}), ignoring", existing.pid);
        }
    }

    if config.daemonize {
        daemonize()?;
    }

    // Logging is initialized only now: its non-blocking writer spawns a
    // background flush thread that, like a runtime's worker threads,
    // would not survive a fork performed after it started.
    init_logging(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: Arc<Config>) -> Result<()> {
    let (listener, bound_port) = match bind_with_scan(config.port, config.port_scan_tries).await {
        Some(pair) => pair,
        None => {
            eprintln!("quernd: no free port found scanning from {}", config.port);
            std::process::exit(3);
        }
    };

    let ring = Arc::new(Ring::new(config.ring.capacity));
    let pipeline = Pipeline::new(ring.clone(), Duration::from_secs(config.ring.dedup_window_secs));
    let restart_policy = RestartPolicy {
        min_backoff: Duration::from_secs(config.adapters.restart_backoff_min_secs),
        max_backoff: Duration::from_secs(config.adapters.restart_backoff_max_secs),
        reset_after: Duration::from_secs(config.adapters.backoff_reset_after_secs),
    };
    let supervisor = Arc::new(Supervisor::new(pipeline.clone(), restart_policy));
    let flows = Arc::new(FlowStore::new(config.proxy.max_flows));
    let intercepts = Arc::new(InterceptRegistry::new(Duration::from_secs(config.proxy.hold_timeout_secs)));
    let mocks = Arc::new(MockRegistry::new());
    let addon = Arc::new(
        MitmproxyAddon::new(&config.state_dir.join("proxy-secret"), config.proxy.port)
            .context("failed to initialize mitmproxy addon")?,
    );
    let devices = Arc::new(DevicePool::new(config.device_pool_path(), Box::new(StubScanner)));
    let api_key = Arc::new(
        state::load_or_create_api_key(&config.api_key_path()).context("failed to load API key")?,
    );

    // idb/xcrun simctl/pymobiledevice3/WebDriverAgent are external
    // collaborators this daemon never shells out to directly; only the
    // crash watcher (no external tool dependency) is auto-registered.
    let crash_watcher = Arc::new(CrashWatcher::new(config.crash_dir()));
    supervisor
        .register(crash_watcher, Duration::from_secs(config.adapters.stop_deadline_secs))
        .await
        .context("failed to start crash watcher")?;

    let state = AppState {
        config: config.clone(),
        ring: ring.clone(),
        pipeline: pipeline.clone(),
        supervisor: supervisor.clone(),
        flows,
        intercepts,
        mocks,
        addon: addon.clone(),
        devices: devices.clone(),
        log_buffer: LogBuffer::new(),
        api_key: api_key.clone(),
        start_time: Utc::now(),
        last_build: Arc::new(Mutex::new(None)),
    };

    let router = api::build_router(state.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("HTTP server error: {e}");
        }
    });
    let watchdog = Arc::new(watchdog::Watchdog::new(
        supervisor.clone(),
        addon.clone(),
        pipeline.clone(),
        Duration::from_secs(config.adapters.watchdog_interval_secs),
    ));
    let watchdog_handle = tokio::spawn(watchdog.run(shutdown_rx));

    let server_state = state::ServerState {
        pid: std::process::id(),
        http_port: bound_port,
        proxy_port: config.proxy.port,
        proxy_enabled: false,
        proxy_status: "stopped".to_string(),
        start_time: Utc::now(),
        api_key: (*api_key).clone(),
        active_device_udids: Vec::new(),
    };
    state::write_state_atomic(&config.state_file_path(), &server_state)
        .context("failed to write state file")?;

    tracing::info!(port = bound_port, pid = server_state.pid, "quernd started");

    wait_for_shutdown_signal().await;
    tracing::info!("shutting down");

    let _ = shutdown_tx.send(true);
    http_handle.abort();
    let _ = watchdog_handle.await;

    supervisor.shutdown_all().await;
    addon.stop(Duration::from_secs(5)).await;
    if let Err(e) = devices.release_owned_by(INTERNAL_DEVICE_OWNER) {
        tracing::warn!("failed to release device claims on shutdown: {e}");
    }
    state::delete_state(&config.state_file_path());

    tracing::info!("shutdown complete");
    Ok(())
}

fn init_logging(config: &Config) {
    let default_filter = format!("quern={},tower_http=info,axum=info", config.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    std::fs::create_dir_all(&config.state_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&config.state_dir, "server.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Leaked intentionally: the guard must outlive the process for the
    // non-blocking writer to flush on exit, and main() never returns early.
    std::mem::forget(guard);

    let log_buffer = LogBuffer::new();
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(BufferLogLayer::new(log_buffer));

    if config.daemonize {
        registry.init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Bind the HTTP listener, scanning upward from `start_port` for up to
/// `tries` ports (spec §4.B). Loopback-only: Quern is a local-host daemon.
async fn bind_with_scan(start_port: u16, tries: u16) -> Option<(TcpListener, u16)> {
    for offset in 0..tries {
        let port = start_port.saturating_add(offset);
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        if let Ok(listener) = TcpListener::bind(addr).await {
            return Some((listener, port));
        }
    }
    None
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Single fork into the background: the parent exits immediately and the
/// child calls `setsid` to detach from the controlling terminal. Minimal
/// raw FFI rather than a dedicated daemonizing crate, matching the
/// unsafe-extern-C style already used for `kill` elsewhere in this binary.
#[cfg(unix)]
fn daemonize() -> Result<()> {
    extern "C" {
        fn fork() -> i32;
        fn setsid() -> i32;
    }
    match unsafe { fork() } {
        pid if pid < 0 => anyhow::bail!("fork() failed"),
        0 => {
            unsafe { setsid() };
            Ok(())
        }
        _parent_pid => std::process::exit(0),
    }
}

#[cfg(not(unix))]
fn daemonize() -> Result<()> {
    anyhow::bail!("daemonize is only supported on unix; run with --foreground")
}

/// `--stop`: read the state file, signal the owning process, and wait
/// briefly for it to clean up after itself.
async fn stop_running_instance() -> Result<()> {
    let config = Config::from_env();
    let Some(existing) = state::read_state(&config.state_file_path()) else {
        println!("quernd: not running");
        return Ok(());
    };
    if !state::pid_is_alive(existing.pid) {
        println!("quernd: stale state file (pid {} not running)", existing.pid);
        state::delete_state(&config.state_file_path());
        return Ok(());
    }

    #[cfg(unix)]
    {
        extern "C" {
            fn kill(pid: i32, sig: i32) -> i32;
        }
        const SIGTERM: i32 = 15;
        unsafe { kill(existing.pid as i32, SIGTERM) };
    }

    for _ in 0..50 {
        if !state::pid_is_alive(existing.pid) {
            println!("quernd: stopped (pid {})", existing.pid);
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    eprintln!("quernd: pid {} did not exit within 5s", existing.pid);
    std::process::exit(1);
}
