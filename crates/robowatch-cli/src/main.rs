//! `robowatch` – terminal fleet monitor.
//!
//! This binary:
//!
//! 1. Checks for `~/.robowatch/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Probes the fleet API and reports how many robots are registered.
//! 3. Starts the fleet reconciler and alarm engine on a Tokio runtime and
//!    prints alarms as they are admitted.
//! 4. Drops the user into an **interactive REPL** with slash-commands
//!    (`/robots`, `/alarms`, `/add`, `/state`, `/help`, …).
//! 5. Intercepts **Ctrl-C** to stop the monitor and exit.

mod config;
mod probe;
mod repl;

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use colored::Colorize;
use robowatch_engine::{FleetMonitor, init_tracing};
use robowatch_middleware::{HttpSource, RegistryWriter, SimSource, TelemetrySource, Topic};
use robowatch_types::{EventPayload, OperationState, Robot};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::config::{Config, SourceKind};

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"); ROBOWATCH_LOG_FORMAT=json switches to
    // JSON lines.  User-facing output still goes through println!.
    let _tracing = init_tracing("robowatch");

    print_banner();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || request_shutdown(&shutdown_clone)) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── First-Run Wizard ──────────────────────────────────────────────────
    match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(_)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
        }
    }
    let cfg = config::load_or_default().unwrap_or_else(|_| config::env_defaults());

    // ── Runtime ───────────────────────────────────────────────────────────
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start async runtime".red(), e);
            return;
        }
    };

    // ── Fleet source ──────────────────────────────────────────────────────
    let sources = match cfg.source {
        SourceKind::Http => {
            probe_api(&cfg);
            match http_sources(&cfg) {
                Ok(sources) => sources,
                Err(e) => {
                    println!("{}: {}", "Cannot use the fleet API".red(), e);
                    return;
                }
            }
        }
        SourceKind::Sim => {
            println!("\n  Using the {} (no backend required).", "simulated fleet".bold());
            let sim = Arc::new(demo_fleet());
            spawn_simulation(&runtime, Arc::clone(&sim), Duration::from_millis(cfg.reconcile_interval_ms));
            Sources {
                read: sim.clone(),
                write: sim,
            }
        }
    };

    // ── Monitor ───────────────────────────────────────────────────────────
    let monitor = FleetMonitor::new(Arc::clone(&sources.read), sources.write, cfg.monitor_config());
    let mut handle = {
        let _enter = runtime.enter();
        monitor.start()
    };
    spawn_alarm_printer(&runtime, &monitor);

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    let session = repl::Session {
        runtime: runtime.handle().clone(),
        monitor: &monitor,
        source: sources.read,
    };
    repl::run(shutdown, &session);

    handle.stop();
}

/// Ctrl-C: flag the REPL to stop.  `main` then stops the monitor and the
/// tracing guard flushes on drop.
fn request_shutdown(shutdown: &AtomicBool) {
    println!();
    println!("{}", "⚠  Ctrl-C received – stopping the monitor …".yellow().bold());
    println!("{}", "  Press Enter to exit robowatch.".green());
    shutdown.store(true, Ordering::SeqCst);
}

// ─────────────────────────────────────────────────────────────────────────────
// Sources
// ─────────────────────────────────────────────────────────────────────────────

struct Sources {
    read: Arc<dyn TelemetrySource>,
    write: Arc<dyn RegistryWriter>,
}

fn http_sources(cfg: &Config) -> Result<Sources, String> {
    let client = reqwest::Client::builder()
        .timeout(cfg.request_timeout())
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
    let http = HttpSource::new(&cfg.api_base_url)
        .map_err(|e| e.to_string())?
        .with_client(client)
        .with_session(cfg.session());
    let http = Arc::new(http);
    Ok(Sources {
        read: http.clone(),
        write: http,
    })
}

fn probe_api(cfg: &Config) {
    print!("\n  Probing fleet API at {} … ", cfg.api_base_url.dimmed());
    std::io::stdout().flush().ok();
    match probe::registry_size(&cfg.api_base_url, cfg.request_timeout()) {
        Ok(count) => println!("{} ({} robot(s) registered)", "online".green(), count),
        Err(e) => {
            println!("{}", "offline".yellow());
            println!("  {}", e.dimmed());
            println!(
                "  {}  The monitor keeps retrying; set {} to try the simulator.",
                "No fleet API detected.".dimmed(),
                "source = \"sim\"".bold()
            );
        }
    }
}

fn demo_fleet() -> SimSource {
    let mut arm = Robot::new("ARM-01", OperationState::Running);
    arm.description = "Welding arm, cell 3".to_string();
    let mut agv = Robot::new("AGV-07", OperationState::Idle);
    agv.description = "Pallet carrier".to_string();
    let mut picker = Robot::new("PICK-12", OperationState::Maintenance);
    picker.description = "Bin picker".to_string();
    SimSource::new().with_robot(arm).with_robot(agv).with_robot(picker)
}

fn spawn_simulation(runtime: &tokio::runtime::Runtime, sim: Arc<SimSource>, step: Duration) {
    runtime.spawn(async move {
        let mut interval = tokio::time::interval(step.max(Duration::from_millis(1)));
        loop {
            interval.tick().await;
            sim.advance();
        }
    });
}

fn spawn_alarm_printer(runtime: &tokio::runtime::Runtime, monitor: &FleetMonitor) {
    let mut alarms = monitor.bus().subscribe_to(Topic::Alarms);
    runtime.spawn(async move {
        loop {
            match alarms.recv().await {
                Ok(event) => {
                    if let EventPayload::AlarmAdmitted(alarm) = event.payload {
                        repl::print_alarm(&alarm);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "alarm printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      robowatch First-Run Wizard      ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up robowatch.\n");

    let mut cfg = Config::default();

    println!("  Where should fleet data come from?");
    println!("    1) Fleet REST API  (default)");
    println!("    2) Built-in simulator");
    let choice = repl::prompt_str("  Enter choice [1]: ", "1");
    cfg.source = match choice.trim() {
        "2" => SourceKind::Sim,
        _ => SourceKind::Http,
    };

    if cfg.source == SourceKind::Http {
        cfg.api_base_url = repl::prompt_str(
            &format!("  Fleet API base URL [{}]: ", cfg.api_base_url),
            &cfg.api_base_url,
        );
        let token = repl::prompt_str("  CSRF token for write requests (optional): ", "");
        if !token.is_empty() {
            cfg.csrf_token = Some(token);
        }
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"           _                        _       _     "#.bold().cyan());
    println!("{}", r#"  _ __ ___| |__   _____      ____ _| |_ ___| |__  "#.bold().cyan());
    println!("{}", r#" | '__/ _ \ '_ \ / _ \ \ /\ / / _` | __/ __| '_ \ "#.bold().cyan());
    println!("{}", r#" | | | (_) | |_) | (_) \ V  V / (_| | || (__| | | |"#.bold().cyan());
    println!("{}", r#" |_|  \___/|_.__/ \___/ \_/\_/ \__,_|\__\___|_| |_|"#.bold().cyan());
    println!();
    println!("  {} {}", "robowatch".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Robot fleet status and alarm monitor");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_c_only_raises_the_shutdown_flag() {
        let shutdown = AtomicBool::new(false);
        request_shutdown(&shutdown);
        assert!(shutdown.load(Ordering::SeqCst));
    }

    #[test]
    fn demo_fleet_registers_three_robots() {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let robots = runtime.block_on(demo_fleet().list_robots()).unwrap();
        let ids: Vec<_> = robots.iter().map(|r| r.robot_id.as_str()).collect();
        assert_eq!(ids, ["ARM-01", "AGV-07", "PICK-12"]);
    }
}
