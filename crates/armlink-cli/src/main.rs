//! `armlink-cli` – interactive jog pendant
//!
//! 1. Loads `~/.armlink/config.toml` (falling back to defaults plus
//!    `ARMLINK_*` overrides).
//! 2. Optionally connects the motion group named on the command line or in
//!    `ARMLINK_MOTION_GROUP`.
//! 3. Drops the user into a REPL with slash-commands to inspect state and
//!    jog the robot (`/help` lists them).
//! 4. Intercepts **Ctrl-C** to stop any running jog before exiting.

mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use armlink_client::{CellClient, ClientConfig, config};

fn main() {
    let _telemetry = armlink_client::telemetry::init_tracing("armlink-cli");

    print_banner();

    let cfg = match config::load_or_default() {
        Ok(cfg) => {
            println!(
                "  Config: {} (cell {})",
                config::config_path().display().to_string().bold(),
                cfg.cell_id.yellow()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            ClientConfig::default()
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    let client = match CellClient::new(cfg) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{}: {}", "Invalid configuration".red(), e);
            std::process::exit(1);
        }
    };
    println!("  Instance: {}", client.instance_url().as_str().dimmed());

    let mut shell = repl::Shell::new(client, runtime.handle().clone());

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    // The REPL thread is usually parked in read_line, so the handler stops
    // the jog itself and exits the process.
    let guard = shell.jog_guard();
    let handle = runtime.handle().clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping motion …".yellow().bold());
        match handle.block_on(guard.halt()) {
            Ok(true) => println!("{}", "  ✓ Jog stopped.".green()),
            Ok(false) => println!("{}", "  ✓ No jog was running.".green()),
            Err(e) => println!("  {} {}", "Stop failed:".red(), e),
        }
        println!("{}", "  ✓ Exiting armlink.".green());
        shutdown_clone.store(true, Ordering::SeqCst);
        std::process::exit(130);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not stop a running jog");
    }

    // ── Initial motion group ──────────────────────────────────────────────
    let initial = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ARMLINK_MOTION_GROUP").ok());
    if let Some(group) = initial {
        shell.connect(&group);
    }

    println!();
    println!(
        "  Type {} for a list of commands.\n",
        "/help".bold().cyan()
    );

    repl::run(&mut shell, shutdown);
    shell.disconnect();
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"    _              _ _       _    "#.bold().cyan());
    println!("{}", r#"   /_\  _ _ _ __  | (_)_ _  | |__ "#.bold().cyan());
    println!("{}", r#"  / _ \| '_| '  \ | | | ' \ | / / "#.bold().cyan());
    println!("{}", r#" /_/ \_\_| |_|_|_||_|_|_||_||_\_\ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "armlink".bold(),
        env!("CARGO_PKG_VERSION").dimmed()
    );
    println!("  Live motion-group state and jogging for robot cells.");
    println!();
}
