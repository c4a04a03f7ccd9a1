//! Entry point: parse configuration, assemble the guest CPU, front the
//! emulator with SSH/SFTP/HTTP, and drive the runner on its own thread
//! (design §4.7 — the CPU role owns the interpreter exclusively and must
//! not be tied to the tokio event loop).

use anyhow::{anyhow, Context as _, Result};
use clap::Parser;
use mpm2em::access_log::AccessLog;
use mpm2em::boot;
use mpm2em::config::{self, Cli};
use mpm2em::context::Context;
use mpm2em::cpu::Cpu;
use mpm2em::host::http;
use mpm2em::host::ssh::{SshConfig, SshServer};
use mpm2em::memory::sysdat::SysDat;
use mpm2em::memory::BankMemory;
use mpm2em::runner::{Runner, StopReason};
use mpm2em::xios::Xios;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const DEFAULT_CONSOLE_COUNT: usize = 4;
const EXIT_CLEAN: i32 = 0;
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_GUEST_FAULT: i32 = 2;

fn main() {
    tracing_subscriber::fmt::with_max_level(tracing::Level::INFO).init();
    let cli = Cli::parse();
    let code = match start(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("mpm2emd: {err}");
            EXIT_CONFIG_ERROR
        }
    };
    std::process::exit(code);
}

#[tokio::main]
async fn start(cli: Cli) -> Result<i32> {
    let sys_image = cli.sys.as_ref().map(std::fs::read).transpose().context("reading system image")?;
    let console_count = match &sys_image {
        Some(bytes) => (SysDat::parse(bytes)?.nmb_cns as usize).max(1),
        None => DEFAULT_CONSOLE_COUNT,
    };

    let context = Arc::new(Context::new(console_count));
    {
        let mut disks = context.disks.lock().unwrap();
        for spec in &cli.disks {
            let disk = config::parse_disk_spec(spec)?;
            disks
                .mount(disk.drive as usize, &disk.path, false)
                .with_context(|| format!("mounting disk image {}", disk.path.display()))?;
        }
    }

    let mut cpu = Cpu::new(BankMemory::with_defaults());
    let mut xios = Xios::new(context.clone(), console_count);

    if let Some(boot_path) = &cli.boot {
        let mut disks = context.disks.lock().unwrap();
        disks
            .mount(0, boot_path, false)
            .with_context(|| format!("mounting boot image {}", boot_path.display()))?;
        boot::cold_boot(&mut cpu, &mut disks, 0)?;
    } else if let Some(image) = &sys_image {
        let sysdat = SysDat::parse(image)?;
        let segments = boot::split_segments(image, &sysdat)?;
        boot::direct_load(&mut cpu, &mut xios, image, &segments)?;
    } else {
        return Err(anyhow!("no boot image: supply --boot or --sys"));
    }

    let access_log = Arc::new(AccessLog::open(cli.log.as_deref()).context("opening access log")?);

    if cli.local {
        spawn_local_console_mirror(context.clone());
    }

    let ssh_config = SshConfig {
        no_auth: cli.no_auth,
        authorized_keys: config::load_authorized_keys(cli.authorized_keys.as_deref())?,
    };
    let host_key = config::load_host_key(cli.key.as_deref())?;
    let mut russh_config = russh::server::Config::default();
    russh_config.keys.push(host_key);
    let russh_config = Arc::new(russh_config);
    let ssh_addr = config::parse_listen_address(&cli.port.to_string(), cli.port)?;
    let ssh_server = SshServer::new(context.clone(), ssh_config, access_log.clone());
    let ssh_handle = tokio::spawn(run_ssh(russh_config, ssh_addr, ssh_server));

    let http_handle = if cli.http != 0 {
        let http_addr = config::parse_listen_address(&cli.http.to_string(), cli.http)?;
        let router = http::router(context.clone(), access_log.clone());
        Some(tokio::spawn(run_http(router, http_addr)))
    } else {
        None
    };

    let timeout = if cli.timeout == 0 { None } else { Some(Duration::from_secs(cli.timeout)) };
    let runner_context = context.clone();
    let runner_result = tokio::task::spawn_blocking(move || {
        let mut runner = Runner::new(runner_context);
        runner.run(&mut cpu, &mut xios, timeout)
    })
    .await
    .context("runner thread panicked")?;

    context.request_stop();
    ssh_handle.abort();
    if let Some(handle) = http_handle {
        handle.abort();
    }

    match runner_result {
        Ok(StopReason::Requested) | Ok(StopReason::TimedOut) => {
            info!("shutting down cleanly");
            Ok(EXIT_CLEAN)
        }
        Ok(StopReason::Fault) => Ok(EXIT_GUEST_FAULT),
        Err(fault) => {
            error!(pc = format!("{:#06x}", fault.pc), op = format!("{:#04x}", fault.op), "guest fault");
            Ok(EXIT_GUEST_FAULT)
        }
    }
}

async fn run_ssh(config: Arc<russh::server::Config>, addr: SocketAddr, mut server: SshServer) -> Result<()> {
    use russh::server::Server as _;
    info!(%addr, "ssh listening");
    server.run_on_address(config, addr).await.map_err(|e| anyhow!("ssh server error: {e}"))
}

async fn run_http(router: axum::Router, addr: SocketAddr) -> Result<()> {
    info!(%addr, "http listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| anyhow!("http server error: {e}"))
}

/// `-l/--local`: mirror console 0 onto the process's own stdio, matching
/// the design's one-way byte-queue contract (host stdin pushes into the
/// input ring, console output drains to stdout).
fn spawn_local_console_mirror(context: Arc<Context>) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let input_context = context.clone();
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 256];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Some(console) = input_context.consoles.get(0) {
                        for &b in &buf[..n] {
                            if !console.push_input(b) {
                                warn!("local console input dropped, queue full");
                            }
                        }
                    }
                }
            }
        }
    });

    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        let mut ticker = tokio::time::interval(Duration::from_millis(20));
        loop {
            ticker.tick().await;
            let Some(console) = context.consoles.get(0) else { break };
            let mut batch = Vec::new();
            while let Some(b) = console.pop_output() {
                batch.push(b);
            }
            if !batch.is_empty() && stdout.write_all(&batch).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });
}
