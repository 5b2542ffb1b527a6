//! `memline-cli` – interactive shell over the unified memory timeline.
//!
//! This binary:
//!
//! 1. Checks for `~/.memline/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Starts a timeline session against the configured gateway: the three
//!    memory feeds are fetched concurrently and `/events` is followed live.
//! 3. Drops the user into an **interactive REPL** with slash-commands
//!    (`/play`, `/filter`, `/select`, `/list`, `/status`, `/help`, ...).
//! 4. Intercepts **Ctrl-C** to close the session and exit cleanly.

mod config;
mod repl;

use std::io::BufRead;
use std::sync::Arc;

use colored::Colorize;
use memline_feed::GatewayClient;
use memline_runtime::SessionDriver;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

fn main() {
    // Logs go to stderr; MEMLINE_LOG_FORMAT=json switches to JSON lines and
    // OTEL_EXPORTER_OTLP_ENDPOINT adds span export.
    let _telemetry = memline_runtime::init_tracing("memline");

    print_banner();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – closing the session …".yellow().bold());
        let _ = shutdown_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use /quit to exit");
    }

    // ── First-Run Wizard ──────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let client = match GatewayClient::new(&cfg.gateway_url) {
        Ok(client) => client.with_limit(cfg.fetch_limit),
        Err(e) => {
            eprintln!("{}: {}", "Invalid gateway URL".red(), e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start the async runtime".red(), e);
            std::process::exit(1);
        }
    };

    println!(
        "\n  Following {} (tick {} ms, {}x)",
        cfg.gateway_url.dimmed(),
        cfg.tick_period_ms,
        cfg.speed_multiplier
    );
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    let lines = spawn_stdin_reader();

    runtime.block_on(async move {
        let events_url = client.events_url();
        let handle = SessionDriver::new(cfg.session_config(), Arc::new(client))
            .with_stream_url(events_url, cfg.reconnect_delay())
            .spawn();
        info!(gateway = %cfg.gateway_url, "timeline session started");

        // ── Interactive REPL ──────────────────────────────────────────────
        repl::run(handle, lines, shutdown_rx).await;
    });
}

/// Forward stdin lines to the async REPL; the channel closes on EOF.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      memline First-Run Wizard        ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up memline.\n");

    let mut cfg = config::Config::default();

    cfg.gateway_url = prompt_line(
        &format!("  Gateway URL [{}]: ", cfg.gateway_url),
        &cfg.gateway_url,
    );

    let tick = prompt_line(
        &format!("  Playback tick period in ms [{}]: ", cfg.tick_period_ms),
        &cfg.tick_period_ms.to_string(),
    );
    if let Ok(ms) = tick.trim().parse::<u64>()
        && ms > 0
    {
        cfg.tick_period_ms = ms;
    }

    let follow = prompt_line("  Select live events as they arrive? [Y/n]: ", "y");
    cfg.auto_select_live = !matches!(follow.trim().to_ascii_lowercase().as_str(), "n" | "no");

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }

    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"                        __ _          "#.bold().cyan());
    println!("{}", r#"   ____ ___  ___  ____ ___  / (_)___  ___ "#.bold().cyan());
    println!("{}", r#"  / __ `__ \/ _ \/ __ `__ \/ / / __ \/ _ \"#.bold().cyan());
    println!("{}", r#" / / / / / /  __/ / / / / / / / / / /  __/"#.bold().cyan());
    println!("{}", r#"/_/ /_/ /_/\___/_/ /_/ /_/_/_/_/ /_/\___/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "memline".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Unified Memory Timeline");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::Write;
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
