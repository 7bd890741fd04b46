//! REPL – Read-Eval-Print Loop for the ecubus node shell.
//!
//! Supported slash-commands:
//!   /install <plugin> [STRATEGY] [key=value ...] – install and load a plugin
//!   /uninstall <plugin> [reference]               – stop and remove a plugin
//!   /id           – hand out a fresh identifier
//!   /plugins      – list plugin records
//!   /ecus         – show the ECU pool and remaining budgets
//!   /pins         – show native pin levels
//!   /publish <key|value> – push text onto the publish bus
//!   /help         – show this list
//!   /quit | /exit – uninstall everything and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ecubus_types::{
    AckStatus, AllocationStrategy, InstallRequest, PortId, ResourceDemand, UninstallRequest,
};
use tokio::runtime::Handle;

use crate::node::Node;

/// One parsed shell line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Install(InstallRequest),
    Uninstall { plugin: String, reference: i32 },
    RequestId,
    Plugins,
    Ecus,
    Pins,
    Publish(String),
    Quit,
}

/// Parse a shell line into a [`Command`].
///
/// `/install` options:
///
/// | Token | Meaning |
/// |---|---|
/// | `MAX_MEMORY` etc. | allocation strategy (default `MAX_MEMORY`) |
/// | `ref=<plugin>` | reference component for `SAME_ECU` / `DIFF_ECU` |
/// | `ecu=<name>` | target ECU for `SPECIFIC` |
/// | `mem=`, `cpu=`, `storage=` | resource demand |
/// | `<port>=<id>` | port binding |
pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = words.collect();

    match head {
        "/help" => Ok(Command::Help),
        "/install" => parse_install(&args).map(Command::Install),
        "/uninstall" => {
            let plugin = args.first().ok_or("usage: /uninstall <plugin> [reference]")?;
            let reference = match args.get(1) {
                Some(r) => r.parse().map_err(|_| format!("reference '{r}' is not an integer"))?,
                None => 0,
            };
            Ok(Command::Uninstall {
                plugin: plugin.to_string(),
                reference,
            })
        }
        "/id" => Ok(Command::RequestId),
        "/plugins" => Ok(Command::Plugins),
        "/ecus" => Ok(Command::Ecus),
        "/pins" => Ok(Command::Pins),
        "/publish" if !args.is_empty() => Ok(Command::Publish(args.join(" "))),
        "/publish" => Err("usage: /publish <key|value>".to_string()),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("unknown command '{other}'")),
    }
}

fn parse_install(args: &[&str]) -> Result<InstallRequest, String> {
    let (plugin, rest) = args
        .split_first()
        .ok_or("usage: /install <plugin> [STRATEGY] [key=value ...]")?;

    let mut request = InstallRequest {
        plugin_name: plugin.to_string(),
        strategy: AllocationStrategy::MaxMemory,
        reference_component: None,
        target_ecu: None,
        bindings: Vec::new(),
        demand: ResourceDemand::default(),
    };

    for token in rest {
        let Some((key, value)) = token.split_once('=') else {
            request.strategy = token.parse().map_err(|e| format!("{e}"))?;
            continue;
        };
        let amount = || value.parse::<u64>().map_err(|_| format!("{key} '{value}' is not a number"));
        match key {
            "ref" => request.reference_component = Some(value.to_string()),
            "ecu" => request.target_ecu = Some(value.to_string()),
            "mem" => request.demand.memory = amount()?,
            "cpu" => request.demand.cpu = amount()?,
            "storage" => request.demand.storage = amount()?,
            port => {
                request.bindings.push(port.to_string());
                request.bindings.push(value.to_string());
            }
        }
    }
    Ok(request)
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
/// Lifecycle calls are driven to completion on `rt`.
pub fn run(node: &Node, rt: &Handle, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", format!("{}>", node.name).bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(cmd) => execute(node, rt, cmd),
            Err(e) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                e.yellow(),
                "/help".bold()
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn execute(node: &Node, rt: &Handle, cmd: Command) {
    match cmd {
        Command::Help => cmd_help(node),
        Command::Install(request) => cmd_install(node, rt, request),
        Command::Uninstall { plugin, reference } => cmd_uninstall(node, rt, plugin, reference),
        Command::RequestId => {
            let ack = node.lifecycle.request_id();
            println!("  id {}", ack.id.to_string().bold());
        }
        Command::Plugins => cmd_plugins(node),
        Command::Ecus => cmd_ecus(node),
        Command::Pins => cmd_pins(node),
        Command::Publish(raw) => {
            let reached = node.lifecycle.publish_bus().publish(&raw);
            println!("  delivered to {} subscriber(s)", reached.to_string().bold());
        }
        Command::Quit => {}
    }
}

fn cmd_help(node: &Node) {
    println!();
    println!("{}", "ecubus Commands".bold().underline());
    println!("  {}  – install and load a plugin", "/install <plugin> [STRATEGY] [port=id ...]".bold().cyan());
    println!("      options: ref=<plugin> ecu=<name> mem=N cpu=N storage=N");
    println!("  {}  – stop and remove a plugin", "/uninstall <plugin> [ref]".bold().cyan());
    println!("  {}                    – fresh identifier", "/id".bold().cyan());
    println!("  {}               – plugin records", "/plugins".bold().cyan());
    println!("  {}                  – ECU pool", "/ecus".bold().cyan());
    println!("  {}                  – native pins", "/pins".bold().cyan());
    println!("  {}   – publish telemetry", "/publish <key|value>".bold().cyan());
    println!("  {}          – uninstall everything and exit", "/quit  /exit".bold().cyan());
    println!();
    let catalog: Vec<&str> = node.lifecycle.catalog().names().collect();
    println!("  Catalog: {}", catalog.join(", ").yellow());
    println!();
}

fn print_status(label: &str, status: &AckStatus) {
    match status {
        AckStatus::Success => println!("  {} {}", "✓".green(), label),
        AckStatus::Failure { reason } => println!("  {} {}: {}", "✗".red(), label, reason.red()),
    }
}

fn cmd_install(node: &Node, rt: &Handle, request: InstallRequest) {
    let (install, load) = rt.block_on(node.lifecycle.install_and_load(request));
    let placed = match (install.plugin_id, install.ecu) {
        (Some(id), Some(ecu)) => format!(" (id {id}, ecu {ecu})"),
        _ => String::new(),
    };
    print_status(&format!("install {}{}", install.plugin_name.bold(), placed), &install.status);
    if let Some(load) = load {
        print_status(&format!("load {}", load.plugin_name.bold()), &load.status);
    }
}

fn cmd_uninstall(node: &Node, rt: &Handle, plugin: String, reference: i32) {
    let ack = rt.block_on(node.lifecycle.uninstall(UninstallRequest {
        sending_port: PortId(0),
        callback_port: PortId(0),
        reference,
        plugin_name: plugin,
    }));
    print_status(
        &format!("uninstall {} (ref {})", ack.plugin_name.bold(), ack.reference),
        &ack.status,
    );
}

fn cmd_plugins(node: &Node) {
    let records = node.lifecycle.plugins();
    if records.is_empty() {
        println!("  {}", "no plugins installed".dimmed());
        return;
    }
    for r in records {
        let ecu = r.ecu.map(|e| e.to_string()).unwrap_or_else(|| "-".into());
        let ports: Vec<String> = r.ports.iter().map(|p| format!("{}={}", p.name, p.id)).collect();
        println!(
            "  {:>4}  {:<16} {:<12} ecu {:<4} {}",
            r.id.to_string().dimmed(),
            r.name.bold(),
            r.state.to_string().yellow(),
            ecu,
            ports.join(" ")
        );
    }
}

fn cmd_ecus(node: &Node) {
    for ecu in node.lifecycle.ecus() {
        let left = ecu.remaining();
        let residents: Vec<&str> = ecu.residents().collect();
        println!(
            "  {:>3} {:<10} mem {:>6}  cpu {:>4}  storage {:>6}  {}",
            ecu.id.to_string().dimmed(),
            ecu.name.bold(),
            left.memory,
            left.cpu,
            left.storage,
            residents.join(", ").cyan()
        );
    }
}

fn cmd_pins(node: &Node) {
    let pins = node.pins.pins();
    if pins.is_empty() {
        println!("  {}", "no native pins configured".dimmed());
        return;
    }
    for pin in pins {
        if let Some(level) = node.pins.level(pin) {
            println!("  pin {:>4}  actuator  level {}", pin, level.to_string().bold());
        } else if let Some(on) = node.pins.state(pin) {
            let state = if on { "on".green() } else { "off".dimmed() };
            println!("  pin {:>4}  relay     {}", pin, state);
        }
    }
}
