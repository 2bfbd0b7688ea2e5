//! Stub Node - a minimal daemon speaking the nodeharness IPC protocol.
//!
//! Accepts the command line `NodeConfig` renders, binds the requested P2P
//! and RPC listeners, reports the bound addresses over the `--pipetx`
//! descriptor and exits cleanly once the `--piperx` descriptor reaches EOF
//! or SIGINT arrives. Used to exercise the harness end to end without a
//! real chain daemon.

use anyhow::{bail, Context, Result};
use clap::Parser;
use nodeharness::ipc::{write_message, IpcEvent, LifetimePhase};
use std::fs::{self, File, OpenOptions};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Lifetime action byte reported alongside every phase.
const ACTION_NONE: u8 = 0;

#[derive(Parser, Debug)]
#[command(name = "stubnode")]
#[command(about = "Reference daemon for the nodeharness IPC protocol")]
struct Args {
    /// Username for RPC connections
    #[arg(long)]
    rpcuser: Option<String>,

    /// Password for RPC connections
    #[arg(long)]
    rpcpass: Option<String>,

    /// P2P listen address
    #[arg(long, default_value = "127.0.0.1:0")]
    listen: SocketAddr,

    /// RPC listen address
    #[arg(long, default_value = "127.0.0.1:0")]
    rpclisten: SocketAddr,

    /// Address of a wallet RPC server to connect to
    #[arg(long)]
    rpcconnect: Option<String>,

    /// RPC server certificate file
    #[arg(long)]
    rpccert: Option<PathBuf>,

    /// RPC server key file
    #[arg(long)]
    rpckey: Option<PathBuf>,

    /// Maintain a full transaction index
    #[arg(long)]
    txindex: bool,

    /// Directory to store data
    #[arg(long)]
    datadir: Option<PathBuf>,

    /// Directory to log output
    #[arg(long)]
    logdir: Option<PathBuf>,

    /// Port for the HTTP profiling server
    #[arg(long)]
    profile: Option<u16>,

    /// Logging level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    debuglevel: Level,

    /// Allow mining templates while not synced
    #[arg(long)]
    allowunsyncedmining: bool,

    /// Descriptor watched for EOF as the shutdown request
    #[arg(long)]
    piperx: Option<u32>,

    /// Descriptor IPC events are written to
    #[arg(long)]
    pipetx: Option<u32>,

    /// Report bound listener addresses over --pipetx
    #[arg(long)]
    boundaddrevents: bool,

    /// Use the simulation test network
    #[arg(long)]
    simnet: bool,

    /// Address paid by mined blocks
    #[arg(long, value_parser = parse_mining_addr)]
    miningaddr: Option<String>,

    /// Milliseconds to wait before binding listeners
    #[arg(long, default_value = "0")]
    startdelay: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the listener announcements.
    FmtSubscriber::builder()
        .with_max_level(args.debuglevel)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    info!("Starting stub node (simnet: {})", args.simnet);
    debug!(
        "rpcuser={:?} rpcconnect={:?} profile={:?} txindex={} allowunsyncedmining={}",
        args.rpcuser, args.rpcconnect, args.profile, args.txindex, args.allowunsyncedmining
    );
    if let Some(ref addr) = args.miningaddr {
        info!("Mining address: {}", addr);
    }

    for dir in [&args.datadir, &args.logdir].into_iter().flatten() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }
    for file in [&args.rpccert, &args.rpckey].into_iter().flatten() {
        if !file.exists() {
            warn!("RPC TLS file {} does not exist", file.display());
        }
    }

    let mut events = args.pipetx.map(open_events_pipe).transpose()?;
    let mut shutdown = Box::pin(wait_for_shutdown_pipe(
        args.piperx.map(open_shutdown_pipe).transpose()?,
    ));

    send_event(
        &mut events,
        IpcEvent::Lifetime {
            phase: LifetimePhase::Startup,
            action: ACTION_NONE,
        },
    )
    .await;

    if args.startdelay > 0 {
        debug!("Delaying startup by {}ms", args.startdelay);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(args.startdelay)) => {}
            _ = &mut shutdown => {
                info!("Shutdown requested during startup delay");
                return Ok(());
            }
            _ = sigint.recv() => {
                info!("Interrupted during startup delay");
                return Ok(());
            }
        }
    }

    let p2p = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind P2P listener on {}", args.listen))?;
    let rpc = TcpListener::bind(args.rpclisten)
        .await
        .with_context(|| format!("Failed to bind RPC listener on {}", args.rpclisten))?;
    let p2p_addr = p2p.local_addr()?;
    let rpc_addr = rpc.local_addr()?;

    if args.boundaddrevents {
        send_event(&mut events, IpcEvent::P2pListenAddr(p2p_addr.to_string())).await;
        send_event(&mut events, IpcEvent::RpcListenAddr(rpc_addr.to_string())).await;
    }
    send_event(
        &mut events,
        IpcEvent::Lifetime {
            phase: LifetimePhase::StartupComplete,
            action: ACTION_NONE,
        },
    )
    .await;

    // Listener announcements are read by the harness log (intentional stdout)
    println!("P2P server listening on {}", p2p_addr);
    println!("RPC server listening on {}", rpc_addr);

    let accept_p2p = tokio::spawn(accept_loop("P2P", p2p));
    let accept_rpc = tokio::spawn(accept_loop("RPC", rpc));

    tokio::select! {
        _ = &mut shutdown => info!("Shutdown pipe closed, exiting"),
        _ = sigint.recv() => info!("Interrupt received, exiting"),
    }

    accept_p2p.abort();
    accept_rpc.abort();

    send_event(
        &mut events,
        IpcEvent::Lifetime {
            phase: LifetimePhase::Shutdown,
            action: ACTION_NONE,
        },
    )
    .await;
    println!("Shutdown complete");

    Ok(())
}

/// Accept and immediately drop connections.
async fn accept_loop(name: &'static str, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((_, peer)) => debug!("{} connection from {}", name, peer),
            Err(e) => {
                warn!("{} accept failed: {}", name, e);
                return;
            }
        }
    }
}

/// Resolve when the shutdown pipe reaches EOF. Never resolves without one.
async fn wait_for_shutdown_pipe(pipe: Option<pipe::Receiver>) {
    let Some(mut pipe) = pipe else {
        return std::future::pending().await;
    };
    let mut buf = [0u8; 64];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => return,
            Ok(_) => continue,
            Err(e) => {
                warn!("Shutdown pipe read failed: {}", e);
                return;
            }
        }
    }
}

/// Write an event if an events pipe is open. Failures close the pipe.
async fn send_event(events: &mut Option<pipe::Sender>, event: IpcEvent) {
    let Some(sender) = events.as_mut() else {
        return;
    };
    if let Err(e) = write_message(sender, &event).await {
        warn!("Failed to write {} event: {}", event.msg_type(), e);
        *events = None;
    }
}

// The inherited descriptors are reopened through /dev/fd so they can be
// wrapped without taking ownership of a raw descriptor number.
fn open_events_pipe(fd: u32) -> Result<pipe::Sender> {
    let path = format!("/dev/fd/{}", fd);
    let file = OpenOptions::new()
        .write(true)
        .open(&path)
        .with_context(|| format!("Failed to open events pipe {}", path))?;
    pipe::Sender::from_file(file).with_context(|| format!("{} is not a pipe", path))
}

fn open_shutdown_pipe(fd: u32) -> Result<pipe::Receiver> {
    let path = format!("/dev/fd/{}", fd);
    let file = File::open(&path).with_context(|| format!("Failed to open shutdown pipe {}", path))?;
    pipe::Receiver::from_file(file).with_context(|| format!("{} is not a pipe", path))
}

fn parse_mining_addr(addr: &str) -> Result<String> {
    if !(26..=36).contains(&addr.len()) {
        bail!("mining address must be 26 to 36 characters, got {}", addr.len());
    }
    if let Some(c) = addr.chars().find(|c| !BASE58_ALPHABET.contains(*c)) {
        bail!("mining address contains invalid character {:?}", c);
    }
    Ok(addr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mining_addr_validation() {
        assert!(parse_mining_addr("SsWKp7wtdTZYabYFYSc9cnxhwFEjA5g4pFc").is_ok());
        assert!(parse_mining_addr("this-is-an-invalid-addr").is_err());
        assert!(parse_mining_addr("SsWKp7wtdTZYabYFYSc9cnxhwFEjA5g4pF0").is_err());
    }

    #[test]
    fn test_parses_rendered_arguments() {
        let args = Args::try_parse_from([
            "stubnode",
            "--rpcuser=user",
            "--rpcpass=pass",
            "--listen=127.0.0.1:0",
            "--rpclisten=127.0.0.1:0",
            "--rpccert=/tmp/rpc.cert",
            "--rpckey=/tmp/rpc.key",
            "--txindex",
            "--datadir=/tmp/data",
            "--logdir=/tmp/logs",
            "--allowunsyncedmining",
            "--piperx=5",
            "--pipetx=8",
            "--boundaddrevents",
            "--simnet",
        ])
        .unwrap();

        assert_eq!(args.piperx, Some(5));
        assert_eq!(args.pipetx, Some(8));
        assert!(args.boundaddrevents);
        assert_eq!(args.debuglevel, Level::INFO);
        assert_eq!(args.startdelay, 0);
    }

    #[test]
    fn test_rejects_unknown_flags_and_bad_addresses() {
        assert!(Args::try_parse_from(["stubnode", "--notaflag"]).is_err());
        assert!(Args::try_parse_from(["stubnode", "--listen=not-an-addr"]).is_err());
        assert!(Args::try_parse_from(["stubnode", "--miningaddr=this-is-an-invalid-addr"]).is_err());
    }
}
