// bin/rpc_session.rs - Protocol Conformance CLI
//
//! Drive and inspect protocol sessions from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Show the built-in RPC protocol and each role's local view
//! rpc-session describe
//!
//! # Check a declaration file
//! rpc-session validate protocols/rpc.json
//!
//! # Run one call: `role:label` sends, `role?label` receives
//! rpc-session run requester:request provider:accept provider:inform
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use rpc_conformance::observability::{init_metrics, init_tracing, TracingFormat};
use rpc_conformance::protocol::{build, project_all, rpc, ProtocolDecl, RpcState};
use rpc_conformance::session::{
    ConformanceEngine, EngineError, Event, SessionReaper, SessionSnapshot,
};
use rpc_conformance::EngineConfig;

/// Protocol conformance CLI
#[derive(Parser, Debug)]
#[command(name = "rpc-session")]
#[command(author = "SavageS")]
#[command(version)]
#[command(about = "Session-type conformance engine - describe, validate and run protocol sessions")]
#[command(long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides `log_filter`
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty, compact, json); overrides `log_format`
    #[arg(long, global = true)]
    log_format: Option<TracingFormat>,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text", global = true)]
    format: OutputFormat,

    /// Print Prometheus metrics before exiting
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the protocol tree, its paths and each role's local view
    Describe {
        /// Declaration file (defaults to the built-in RPC protocol)
        #[arg(short, long)]
        protocol: Option<PathBuf>,
    },

    /// Check that a declaration file builds
    Validate {
        /// Declaration file
        file: PathBuf,
    },

    /// Drive a single session through a sequence of events
    Run {
        /// Declaration file (defaults to the built-in RPC protocol)
        #[arg(short, long)]
        protocol: Option<PathBuf>,

        /// Session identifier (generated if omitted)
        #[arg(long)]
        id: Option<String>,

        /// Abort the session with this reason after the events
        #[arg(long)]
        abort: Option<String>,

        /// Stop at the first violation
        #[arg(long)]
        strict: bool,

        /// Events: `role:label` for a send, `role?label` for a receive
        events: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = EngineConfig::load(args.config.as_deref()).context("Failed to load config")?;
    init_tracing(config.tracing_with(args.log_level.as_deref(), args.log_format.clone()))
        .context("Failed to initialize tracing")?;

    let metrics = if args.metrics {
        Some(init_metrics().context("Failed to install metrics recorder")?)
    } else {
        None
    };

    match &args.command {
        Commands::Describe { protocol } => cmd_describe(&args, protocol.as_deref())?,
        Commands::Validate { file } => cmd_validate(&args, file)?,
        Commands::Run {
            protocol,
            id,
            abort,
            strict,
            events,
        } => {
            let engine = ConformanceEngine::from_declaration(
                &load_declaration(protocol.as_deref())?,
                &config,
            )?;
            let _reaper = config
                .session_timeout()
                .map(|_| SessionReaper::spawn(engine.clone(), config.reaper_interval()));
            cmd_run(&args, &engine, id.clone(), abort.as_deref(), *strict, events)?;
        }
    }

    if let Some(handle) = metrics {
        println!("{}", handle.render());
    }
    Ok(())
}

fn load_declaration(path: Option<&Path>) -> Result<ProtocolDecl> {
    match path {
        None => Ok(rpc::declaration()),
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            ProtocolDecl::from_json(&json)
                .with_context(|| format!("Failed to parse {}", path.display()))
        }
    }
}

/// Parse `role:label` (send) or `role?label` (receive)
fn parse_event(spec: &str) -> Result<Event> {
    if let Some((role, label)) = spec.split_once(':') {
        return Ok(Event::send(role, label));
    }
    if let Some((role, label)) = spec.split_once('?') {
        return Ok(Event::receive(role, label));
    }
    bail!("Invalid event '{spec}': expected role:label or role?label")
}

// =============================================================================
// Command Handlers
// =============================================================================

fn cmd_describe(args: &Args, protocol: Option<&Path>) -> Result<()> {
    let tree = build(&load_declaration(protocol)?)?;

    if args.format == OutputFormat::Json {
        let paths: Vec<Vec<String>> = tree
            .paths()
            .iter()
            .map(|path| path.iter().map(ToString::to_string).collect())
            .collect();
        let locals: serde_json::Map<String, serde_json::Value> = project_all(&tree)
            .into_iter()
            .map(|(role, local)| (role.to_string(), local.to_string().into()))
            .collect();
        let out = serde_json::json!({
            "protocol": tree.name(),
            "roles": tree.roles(),
            "paths": paths,
            "local_types": locals,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", format!("Protocol {}", tree.name()).bold().cyan());
    println!("{}", "─".repeat(40));
    print!("{}", tree.render());

    println!();
    println!("{}", "Paths".bold());
    for path in tree.paths() {
        let steps: Vec<String> = path.iter().map(ToString::to_string).collect();
        println!("  {}", steps.join(" → "));
    }

    println!();
    println!("{}", "Local types".bold());
    for (role, local) in project_all(&tree) {
        println!("  {:<12} {}", role.to_string().yellow(), local);
    }
    Ok(())
}

fn cmd_validate(args: &Args, file: &Path) -> Result<()> {
    let decl = load_declaration(Some(file))?;
    match build(&decl) {
        Ok(tree) => {
            if args.format == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::json!({ "valid": true, "protocol": tree.name() })
                );
            } else {
                println!(
                    "{} {} ({} nodes, {} choices)",
                    "✓".green(),
                    tree.name(),
                    tree.node_count(),
                    tree.choice_count()
                );
            }
            Ok(())
        }
        Err(e) => {
            if args.format == OutputFormat::Json {
                println!(
                    "{}",
                    serde_json::json!({ "valid": false, "error": e.to_string() })
                );
            } else {
                println!("{} {}", "✗".red(), e);
            }
            Err(e).context(format!("{} is malformed", file.display()))
        }
    }
}

fn cmd_run(
    args: &Args,
    engine: &ConformanceEngine,
    id: Option<String>,
    abort: Option<&str>,
    strict: bool,
    events: &[String],
) -> Result<()> {
    let session = match id {
        Some(id) => engine.create_session_with_id(id)?,
        None => engine.create_session(),
    };
    if args.format == OutputFormat::Text {
        println!("{} {}", "Session".bold(), session.to_string().cyan());
    }

    let mut violations = 0usize;
    for spec in events {
        let event = parse_event(spec)?;
        let result = engine.attempt(&session, event);

        if args.format == OutputFormat::Json {
            let line = match &result {
                Ok(snapshot) => serde_json::json!({ "event": spec, "ok": true, "step": snapshot.step }),
                Err(e) => serde_json::json!({ "event": spec, "ok": false, "error": e.to_string() }),
            };
            println!("{line}");
        } else {
            match &result {
                Ok(snapshot) => println!("  {} {:<24} {}", "✓".green(), spec, state_label(snapshot)),
                Err(e) => println!("  {} {:<24} {}", "✗".red(), spec, e.to_string().red()),
            }
        }

        if let Err(e) = result {
            violations += 1;
            if strict || matches!(e, EngineError::UnknownSession(_)) {
                break;
            }
        }
    }

    if let Some(reason) = abort {
        match engine.abort(&session, reason) {
            Ok(_) => {}
            Err(e) if args.format == OutputFormat::Text => {
                println!("  {} abort: {}", "✗".red(), e.to_string().red())
            }
            Err(e) => println!("{}", serde_json::json!({ "abort": reason, "error": e.to_string() })),
        }
    }

    let snapshot = engine.current_state(&session)?;
    if args.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("{}", "─".repeat(40));
        println!("Final state: {}", state_label(&snapshot).bold());
        println!("Violations:  {violations}");
    }

    if violations > 0 && strict {
        bail!("{violations} protocol violation(s)");
    }
    Ok(())
}

fn state_label(snapshot: &SessionSnapshot) -> String {
    match RpcState::from_snapshot(snapshot) {
        Some(state) => state.to_string(),
        None if snapshot.is_closed() => snapshot.status.to_string(),
        None => {
            let labels: Vec<String> = snapshot
                .expected_labels()
                .iter()
                .map(ToString::to_string)
                .collect();
            format!("awaiting {}", labels.join(" | "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_conformance::session::Direction;

    #[test]
    fn test_parse_event() {
        let send = parse_event("requester:request").unwrap();
        assert_eq!(send.direction, Direction::Send);
        assert_eq!(send.role.as_str(), "requester");

        let recv = parse_event("requester?accept").unwrap();
        assert_eq!(recv.direction, Direction::Receive);
        assert_eq!(recv.label.as_str(), "accept");

        assert!(parse_event("request").is_err());
    }
}
