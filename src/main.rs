mod activity;
mod backoff;
mod capability;
mod config;
mod dispatcher;
mod errors;
mod gate;
mod http;
mod keepalive;
mod logging;
mod protocol;
mod session;
mod supervisor;
mod tls;

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use activity::ActivityClock;
use capability::UnimplementedCapability;
use config::{Cli, Command, ConfigFile, JoinArgs, StartArgs};
use gate::KeepaliveGate;
use http::Router;
use supervisor::SupervisorHandle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let cli = Cli::parse();

    let code = match cli.command {
        Command::Join(args) => run_join(args).await?,
        Command::Start(args) => run_start(args).await?,
    };

    std::process::exit(code);
}

fn new_router() -> Arc<Router> {
    // §1 Non-goals: no real screen/input/shell/file backend ships with this
    // crate. UnimplementedCapability answers truthfully until a
    // platform-specific backend is wired in.
    Arc::new(
        Router::new()
            .with_screen(Arc::new(UnimplementedCapability))
            .with_input(Arc::new(UnimplementedCapability)),
    )
}

async fn run_start(args: StartArgs) -> anyhow::Result<i32> {
    logging::init("info", false);
    info!(version = env!("CARGO_PKG_VERSION"), port = args.port, "cyberdriver starting (local surface only)");

    let router = new_router();
    let shutdown = CancellationToken::new();

    let server_shutdown = shutdown.clone();
    let server_router = Arc::clone(&router);
    let server = tokio::spawn(async move { http::server::run(server_router, args.port, server_shutdown).await });

    let interrupted = wait_for_shutdown_or_cancel(&shutdown).await;
    info!("shutdown signal received");
    shutdown.cancel();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "local http surface exited with an error"),
        Err(e) => error!(error = %e, "local http surface task panicked"),
    }

    Ok(if interrupted { 130 } else { 0 })
}

async fn run_join(args: JoinArgs) -> anyhow::Result<i32> {
    if let Err(e) = args.validate() {
        eprintln!("invalid configuration: {e}");
        std::process::exit(2);
    }

    logging::init("info", false);

    let config_path = ConfigFile::default_path().unwrap_or_else(|_| std::path::PathBuf::from(".cyberdriver/config.json"));
    let config_file = match ConfigFile::load_or_init(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load or create config file: {e}");
            std::process::exit(2);
        }
    };
    let fingerprint = config_file.fingerprint.to_string();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        fingerprint = %fingerprint,
        host = %args.host,
        "cyberdriver starting (tunnel mode)"
    );

    let router = new_router();
    let gate = Arc::new(KeepaliveGate::new());
    let activity = Arc::new(ActivityClock::new());
    let shutdown = CancellationToken::new();

    let session_config = session::SessionConfig {
        host: args.host.clone(),
        secret: args.secret.clone(),
        fingerprint,
        version: env!("CARGO_PKG_VERSION").to_string(),
        keepalive_for: args.register_as_keepalive_for.clone(),
        tls_trust: args.tls_trust(),
        ca_file: args.ca_file.clone(),
        max_frame_bytes: args.max_frame_bytes,
    };

    let (supervisor_handle, supervisor_join) = supervisor::run(
        session_config,
        Arc::clone(&router),
        Arc::clone(&gate),
        Arc::clone(&activity),
        shutdown.clone(),
    )
    .await;

    let server_shutdown = shutdown.clone();
    let server_router = Arc::clone(&router);
    let server = tokio::spawn(async move { http::server::run(server_router, args.port, server_shutdown).await });

    let keepalive_pause = if args.keepalive {
        let (pause_tx, pause_rx) = tokio::sync::watch::channel(false);
        let keepalive_config = keepalive::KeepaliveConfig {
            threshold: std::time::Duration::from_secs_f64(args.keepalive_threshold_minutes * 60.0),
            click_x: args.keepalive_click_x,
            click_y: args.keepalive_click_y,
        };
        let screen = router
            .screen
            .clone()
            .unwrap_or_else(|| Arc::new(UnimplementedCapability));
        let input = router
            .input
            .clone()
            .unwrap_or_else(|| Arc::new(UnimplementedCapability));
        let activity = Arc::clone(&activity);
        let gate = Arc::clone(&gate);
        tokio::spawn(async move {
            keepalive::run(keepalive_config, activity, gate, screen, input, pause_rx).await;
        });
        Some(pause_tx)
    } else {
        None
    };

    if args.interactive {
        spawn_interactive_loop(supervisor_handle.clone(), keepalive_pause.clone(), shutdown.clone());
    }

    let interrupted = wait_for_shutdown_or_cancel(&shutdown).await;
    info!("shutdown signal received, closing tunnel");
    shutdown.cancel();

    let _ = server.await;

    match supervisor_join.await {
        Ok(Ok(())) => Ok(if interrupted { 130 } else { 0 }),
        Ok(Err(e)) => {
            error!(error = %e, "tunnel supervisor exited fatally");
            Ok(3)
        }
        Err(e) => {
            error!(error = %e, "tunnel supervisor task panicked");
            Ok(1)
        }
    }
}

/// `--interactive`'s line-oriented stdin loop (§6): `enable`/`disable` drive
/// C7's toggle (and, transitively, pause C5), `status` reports it, `quit`
/// requests process shutdown. A minimal analogue of the teacher's TUI setup
/// wizard, scoped to the one toggle this crate actually needs.
fn spawn_interactive_loop(
    supervisor: SupervisorHandle,
    keepalive_pause: Option<tokio::sync::watch::Sender<bool>>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "failed to read interactive command");
                    break;
                }
            };

            match line.trim() {
                "enable" => {
                    supervisor.set_enabled(true);
                    if let Some(tx) = &keepalive_pause {
                        let _ = tx.send(false);
                    }
                    println!("enabled");
                }
                "disable" => {
                    supervisor.set_enabled(false);
                    if let Some(tx) = &keepalive_pause {
                        let _ = tx.send(true);
                    }
                    println!("disabled");
                }
                "status" => {
                    println!("{}", if supervisor.is_enabled() { "enabled" } else { "disabled" });
                }
                "quit" => {
                    shutdown.cancel();
                    break;
                }
                "" => {}
                other => println!("unknown command: {other}"),
            }
        }
    });
}

/// Wait for either an OS interrupt/terminate signal or `shutdown` being
/// cancelled by some other path (the interactive `quit` command). Returns
/// `true` only for the signal case, so the caller can pick exit code 130
/// (§6: "130 on interrupt") versus a clean 0.
async fn wait_for_shutdown_or_cancel(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = wait_for_signal() => true,
        _ = shutdown.cancelled() => false,
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
