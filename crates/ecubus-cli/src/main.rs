//! `ecubus` – node launcher and operator shell.
//!
//! This binary brings one ECU node up and keeps it running.  It:
//!
//! 1. Loads `~/.ecubus/node.toml` (or `$ECUBUS_CONFIG`); writes the default
//!    config on first run.
//! 2. Builds the data plane, native pins, node bridge and lifecycle manager,
//!    then installs and loads every plugin listed in the config.
//! 3. Drops the operator into an **interactive REPL** with slash-commands
//!    (`/install`, `/uninstall`, `/plugins`, `/ecus`, `/help`, ...).
//! 4. Intercepts **Ctrl-C** to uninstall every plugin, release the native
//!    pins and exit.

mod config;
mod node;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

use ecubus_types::AckStatus;

use crate::node::Node;

fn main() {
    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => write_default_config(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // ── Structured logging ────────────────────────────────────────────────
    // Spans go out through the simple OTLP exporter, which needs no async
    // runtime, so this runs before the node's runtime is built.
    let _tracing = ecubus_runtime::init_tracing(&cfg.telemetry());

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    // ── Node ──────────────────────────────────────────────────────────────
    let node = match rt.block_on(Node::start(&cfg)) {
        Ok(node) => Arc::new(node),
        Err(e) => {
            eprintln!("{}: {}", "Failed to start node".red(), e);
            std::process::exit(1);
        }
    };
    if let Some(addr) = node.local_addr {
        println!("  Bridge listening on {}", addr.to_string().bold());
    }

    for (install, load) in rt.block_on(node.install_configured(&cfg)) {
        let status = load.map(|l| l.status).unwrap_or(install.status);
        match status {
            AckStatus::Success => println!("  {} {}", "✓".green(), install.plugin_name.bold()),
            AckStatus::Failure { reason } => {
                println!("  {} {}: {}", "✗".red(), install.plugin_name.bold(), reason.red())
            }
        }
    }

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    let node_ctrlc = Arc::clone(&node);
    let handle = rt.handle().clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting the node down …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);

        let acks = handle.block_on(node_ctrlc.shutdown());
        println!("{}", format!("  ✓ {} plugin(s) uninstalled.", acks.len()).green());
        println!("{}", "  ✓ Native pins released.".green());
        std::process::exit(0);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; plugins will not be stopped on Ctrl-C");
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&node, rt.handle(), shutdown.clone());

    // Stdin closed without /quit: keep serving until Ctrl-C.
    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    rt.block_on(node.shutdown());
}

fn write_default_config() -> config::Config {
    let mut cfg = config::Config::default();
    match config::save(&cfg) {
        Ok(()) => println!(
            "  {} No configuration found; defaults written to {}",
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
    println!("{}", r#"   ___ ____ _   _ ___  _   _ ____  "#.bold().cyan());
    println!("{}", r#"  | __/ ___| | | | _ )| | | / ___| "#.bold().cyan());
    println!("{}", r#"  | _| (__| |_| | _ \| |_| \___ \ "#.bold().cyan());
    println!("{}", r#"  |___\____|\___/|___/ \___/|____/ "#.bold().cyan());
    println!();
    println!("  {} {}",
        "ecubus".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  ECU port-bus node");
    println!();
}
