//! Kinect bridge server executable.
//!
//! Usage: kinect-bridge [OPTIONS]
//!
//! Options:
//!   --mock           Generate synthetic frames; no device required
//!   --port <int>     WebSocket port (default: 8765)
//!   --help, -h       Print this help
//!
//! Exit codes:
//!   0  clean shutdown
//!   1  generic error
//!   2  no device detected
//!   3  device initialization failed

use std::env;
use std::process::ExitCode;

use kinect_bridge::bridge_server::BridgeServer;

const DEFAULT_PORT: u16 = 8765;

const EXIT_GENERIC: u8 = 1;
const EXIT_NO_DEVICE: u8 = 2;
#[cfg(feature = "freenect")]
const EXIT_INIT_FAILED: u8 = 3;

struct Args {
    mock: bool,
    port: u16,
}

enum Parsed {
    Run(Args),
    Help,
    Invalid,
}

fn parse_args() -> Parsed {
    let args: Vec<String> = env::args().collect();

    let mut mock = false;
    let mut port = DEFAULT_PORT;
    let mut i = 1;

    while i < args.len() {
        let arg = &args[i];

        if arg == "--mock" {
            mock = true;
            i += 1;
            continue;
        }

        if arg == "--port" {
            if i + 1 < args.len() {
                match args[i + 1].parse::<u16>() {
                    Ok(p) => port = p,
                    Err(_) => {
                        eprintln!("Error: --port requires an integer argument");
                        return Parsed::Invalid;
                    }
                }
                i += 2;
                continue;
            } else {
                eprintln!("Error: --port requires an integer argument");
                return Parsed::Invalid;
            }
        }

        if arg == "--help" || arg == "-h" {
            return Parsed::Help;
        }

        eprintln!("Error: unknown argument {arg:?}");
        return Parsed::Invalid;
    }

    Parsed::Run(Args { mock, port })
}

fn print_usage() {
    println!("Usage: kinect-bridge [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --mock           Generate synthetic frames; no device required");
    println!("  --port <int>     WebSocket port (default: {DEFAULT_PORT})");
    println!("  --help, -h       Print this help");
    println!();
    println!("Clients connect to ws://<host>:<port>/kinect");
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kinect_bridge=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let args = match parse_args() {
        Parsed::Run(args) => args,
        Parsed::Help => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Parsed::Invalid => {
            print_usage();
            return ExitCode::from(EXIT_GENERIC);
        }
    };

    let mut server = if args.mock {
        tracing::info!("mock mode: synthesizing frames, no device required");
        BridgeServer::new_mock()
    } else {
        match build_device_server() {
            Ok(server) => server,
            Err(code) => return code,
        }
    };

    if let Err(e) = server.start(args.port).await {
        eprintln!("failed to start bridge server: {e}");
        return ExitCode::from(EXIT_GENERIC);
    }

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received");
    server.stop().await;
    ExitCode::SUCCESS
}

#[cfg(feature = "freenect")]
fn build_device_server() -> Result<BridgeServer, ExitCode> {
    match BridgeServer::new_device() {
        Ok(server) => Ok(server),
        Err(kinect_bridge::device::DeviceError::DeviceNotFound) => {
            eprintln!("no kinect device detected (use --mock to run without one)");
            Err(ExitCode::from(EXIT_NO_DEVICE))
        }
        Err(e) => {
            eprintln!("device initialization failed: {e}");
            Err(ExitCode::from(EXIT_INIT_FAILED))
        }
    }
}

#[cfg(not(feature = "freenect"))]
fn build_device_server() -> Result<BridgeServer, ExitCode> {
    eprintln!("built without the freenect feature; no device support (use --mock)");
    Err(ExitCode::from(EXIT_NO_DEVICE))
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
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
