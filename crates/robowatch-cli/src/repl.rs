//! REPL – the interactive robowatch shell.
//!
//! Supported slash-commands:
//!   /robots                    – show the current fleet snapshot
//!   /alarms                    – show the active alarms
//!   /history [page]            – page through the full alarm history
//!   /add <id> [description]    – register a robot
//!   /describe <id> [text]      – change or clear a robot's description
//!   /state <id> <state>        – set running | idle | maintenance | error
//!   /remove <id>               – delete a robot with its data and alarms
//!   /dismiss <alarm_id>        – hide an active alarm before it expires
//!   /settings                  – edit `~/.robowatch/config.toml`
//!   /help                      – show this list
//!   /quit | /exit              – stop the monitor and exit

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::{ColoredString, Colorize};
use robowatch_engine::{CommandError, FleetMonitor, FleetSnapshot};
use robowatch_middleware::TelemetrySource;
use robowatch_types::{Alarm, AlarmSeverity, OperationState, RobotView};
use tokio::runtime::Handle;

use crate::config::{self, Config, SourceKind};

const HISTORY_PAGE_SIZE: u32 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// One parsed line of operator input.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Help,
    Robots,
    Alarms,
    History { page: u32 },
    Add { robot_id: String, description: String },
    Describe { robot_id: String, description: String },
    State { robot_id: String, state: OperationState },
    Remove { robot_id: String },
    Dismiss { alarm_id: String },
    Settings,
    Quit,
}

fn usage(form: &str) -> String {
    format!("usage: {form}")
}

/// Parse one input line.  `Ok(None)` for a blank line.
pub fn parse(line: &str) -> Result<Option<ReplCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let (first, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let tail = tail.trim();

    let command = match name {
        "/help" => ReplCommand::Help,
        "/robots" => ReplCommand::Robots,
        "/alarms" => ReplCommand::Alarms,
        "/history" => {
            let page = if first.is_empty() {
                1
            } else {
                first
                    .parse::<u32>()
                    .ok()
                    .filter(|p| *p >= 1)
                    .ok_or_else(|| usage("/history [page ≥ 1]"))?
            };
            ReplCommand::History { page }
        }
        "/add" if !first.is_empty() => ReplCommand::Add {
            robot_id: first.to_string(),
            description: tail.to_string(),
        },
        "/add" => return Err(usage("/add <id> [description]")),
        "/describe" if !first.is_empty() => ReplCommand::Describe {
            robot_id: first.to_string(),
            description: tail.to_string(),
        },
        "/describe" => return Err(usage("/describe <id> [description]")),
        "/state" if !first.is_empty() && !tail.is_empty() => ReplCommand::State {
            robot_id: first.to_string(),
            state: tail.parse().map_err(|e| format!("{e}"))?,
        },
        "/state" => return Err(usage("/state <id> <running|idle|maintenance|error>")),
        "/remove" if !first.is_empty() => ReplCommand::Remove {
            robot_id: first.to_string(),
        },
        "/remove" => return Err(usage("/remove <id>")),
        "/dismiss" if !first.is_empty() => ReplCommand::Dismiss {
            alarm_id: first.to_string(),
        },
        "/dismiss" => return Err(usage("/dismiss <alarm_id>")),
        "/settings" => ReplCommand::Settings,
        "/quit" | "/exit" => ReplCommand::Quit,
        other => return Err(format!("Unknown command '{other}'")),
    };
    Ok(Some(command))
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// What the REPL needs from the running monitor.
pub struct Session<'a> {
    pub runtime: Handle,
    pub monitor: &'a FleetMonitor,
    /// Used for history paging, which bypasses the engines.
    pub source: Arc<dyn TelemetrySource>,
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(shutdown: Arc<AtomicBool>, session: &Session<'_>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "robowatch>".bold().cyan());
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

        let command = match parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{} Type {} for available commands.", e.red(), "/help".bold());
                continue;
            }
        };

        match command {
            ReplCommand::Help => cmd_help(),
            ReplCommand::Robots => print_fleet(&session.monitor.reconciler().snapshot()),
            ReplCommand::Alarms => cmd_alarms(session),
            ReplCommand::History { page } => cmd_history(session, page),
            ReplCommand::Add { robot_id, description } => report(
                session
                    .runtime
                    .block_on(session.monitor.dispatcher().add_robot(&robot_id, &description)),
                &format!("Robot {robot_id} added"),
            ),
            ReplCommand::Describe { robot_id, description } => report(
                session
                    .runtime
                    .block_on(session.monitor.dispatcher().update_description(&robot_id, &description)),
                &format!("Description of {robot_id} updated"),
            ),
            ReplCommand::State { robot_id, state } => report(
                session
                    .runtime
                    .block_on(session.monitor.dispatcher().update_operation_state(&robot_id, state)),
                &format!("{robot_id} set to {state}"),
            ),
            ReplCommand::Remove { robot_id } => report(
                session
                    .runtime
                    .block_on(session.monitor.dispatcher().remove_robot(&robot_id)),
                &format!("Robot {robot_id} removed"),
            ),
            ReplCommand::Dismiss { alarm_id } => {
                if session.monitor.alarms().dismiss(&alarm_id) {
                    println!("{} {}", "✓ Dismissed".green(), alarm_id.bold());
                } else {
                    println!("{} '{}'", "No active alarm".yellow(), alarm_id);
                }
            }
            ReplCommand::Settings => cmd_settings(),
            ReplCommand::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "robowatch Commands".bold().underline());
    println!("  {}                  – current fleet status", "/robots".bold().cyan());
    println!("  {}                  – active alarms", "/alarms".bold().cyan());
    println!("  {}          – full alarm history", "/history [page]".bold().cyan());
    println!("  {}  – register a robot", "/add <id> [description]".bold().cyan());
    println!("  {}    – change a description", "/describe <id> [text]".bold().cyan());
    println!("  {}     – running | idle | maintenance | error", "/state <id> <state>".bold().cyan());
    println!("  {}             – delete a robot", "/remove <id>".bold().cyan());
    println!("  {}       – hide an active alarm", "/dismiss <alarm_id>".bold().cyan());
    println!("  {}                – edit ~/.robowatch/config.toml", "/settings".bold().cyan());
    println!("  {}            – exit", "/quit  /exit".bold().cyan());
    println!();
}

fn report(result: Result<FleetSnapshot, CommandError>, success: &str) {
    match result {
        Ok(snapshot) => {
            println!("{} {}", "✓".green().bold(), success);
            print_fleet(&snapshot);
        }
        Err(CommandError::Invalid(e)) => println!("{}: {}", "Invalid command".red(), e),
        Err(CommandError::Rejected(e)) => println!("{}: {}", "Request failed".red(), e),
    }
}

fn cmd_alarms(session: &Session<'_>) {
    let active = session.monitor.alarms().active();
    if active.is_empty() {
        println!("  {}", "No active alarms.".dimmed());
        return;
    }
    println!("{}", "Active Alarms".bold().underline());
    for alarm in &active {
        println!("  {}", severity_colored(alarm, alarm_line(alarm)));
    }
}

fn cmd_history(session: &Session<'_>, page: u32) {
    match session
        .runtime
        .block_on(session.source.alarm_page(page, HISTORY_PAGE_SIZE))
    {
        Ok(history) => {
            let pages = history.total.div_ceil(u64::from(HISTORY_PAGE_SIZE)).max(1);
            println!(
                "{} {}",
                "Alarm History".bold().underline(),
                format!("(page {} of {}, {} total)", history.page, pages, history.total).dimmed()
            );
            if history.alarms.is_empty() {
                println!("  {}", "Nothing on this page.".dimmed());
            }
            for alarm in &history.alarms {
                println!("  {}", severity_colored(alarm, alarm_line(alarm)));
            }
        }
        Err(e) => println!("{}: {}", "Failed to load alarm history".red(), e),
    }
}

fn cmd_settings() {
    let mut cfg = match config::load() {
        Ok(Some(c)) => c,
        Ok(None) => Config::default(),
        Err(e) => {
            println!("{}: {}", "Error loading config".red(), e);
            return;
        }
    };

    println!("{}", "Settings Editor".bold().underline());
    println!("  (press Enter to keep the current value; changes apply on restart)");

    cfg.api_base_url = prompt_str(&format!("  API base URL          [{}]: ", cfg.api_base_url), &cfg.api_base_url);

    let current = cfg.source;
    let source = prompt_str(&format!("  Source (http / sim)   [{}]: ", current), &current.to_string());
    cfg.source = source.parse::<SourceKind>().unwrap_or_else(|e| {
        println!("  {} {}, keeping {}", "Warning:".yellow(), e, current);
        current
    });

    cfg.reconcile_interval_ms = prompt_u64("  Fleet refresh (ms)    ", cfg.reconcile_interval_ms);
    cfg.alarm_poll_interval_ms = prompt_u64("  Alarm poll (ms)       ", cfg.alarm_poll_interval_ms);
    cfg.alarm_horizon_secs = prompt_u64("  Alarm horizon (s)     ", cfg.alarm_horizon_secs);
    cfg.alarm_display_ms = prompt_u64("  Alarm display (ms)    ", cfg.alarm_display_ms);

    match config::save(&cfg) {
        Ok(()) => println!(
            "{} {}",
            "✓ Settings saved to".green(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rendering
// ─────────────────────────────────────────────────────────────────────────────

fn state_colored(state: OperationState) -> ColoredString {
    let label = state.as_str();
    match state {
        OperationState::Running => label.green(),
        OperationState::Idle => label.normal(),
        OperationState::Maintenance => label.yellow(),
        OperationState::Error => label.red().bold(),
    }
}

/// One robot as a single status line, without colours.
pub(crate) fn robot_line(robot: &RobotView) -> String {
    let mut line = format!(
        "{:<12} temp {:>5.1}°C  battery {:>5.1}%  speed {:>5.1} m/s  pos ({:.1}, {:.1}, {:.1})  motor {}",
        robot.robot_id,
        robot.temperature,
        robot.battery_level,
        robot.speed,
        robot.position.x,
        robot.position.y,
        robot.position.z,
        robot.motor_status,
    );
    if !robot.description.is_empty() {
        line.push_str(&format!("  – {}", robot.description));
    }
    line
}

pub fn print_fleet(snapshot: &FleetSnapshot) {
    if snapshot.robots.is_empty() {
        let note = if snapshot.sequence == 0 {
            "Fleet not loaded yet."
        } else {
            "No robots registered."
        };
        println!("  {}", note.dimmed());
        return;
    }
    for robot in &snapshot.robots {
        println!("  {:<12} {}", state_colored(robot.operation_state), robot_line(robot));
    }
    if let Some(at) = snapshot.refreshed_at {
        println!("  {}", format!("refreshed {}", at.format("%H:%M:%S")).dimmed());
    }
}

/// One alarm as a single line, without colours.
pub(crate) fn alarm_line(alarm: &Alarm) -> String {
    format!(
        "[{}] {} {}: {} ({})",
        alarm.timestamp.format("%Y-%m-%d %H:%M:%S"),
        alarm.robot_id,
        alarm_label(alarm),
        alarm.message,
        alarm.id,
    )
}

fn alarm_label(alarm: &Alarm) -> &'static str {
    match alarm.severity() {
        AlarmSeverity::Error => "ERROR",
        AlarmSeverity::Warning => "WARNING",
    }
}

fn severity_colored(alarm: &Alarm, text: String) -> ColoredString {
    match alarm.severity() {
        AlarmSeverity::Error => text.red().bold(),
        AlarmSeverity::Warning => text.yellow(),
    }
}

/// Print an alarm as it is admitted, above the prompt.
pub fn print_alarm(alarm: &Alarm) {
    println!();
    println!("  {} {}", "⚠".bold(), severity_colored(alarm, alarm_line(alarm)));
    print!("{} ", "robowatch>".bold().cyan());
    io::stdout().flush().ok();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Prompt for a u64 value.  Returns `default` when the user presses Enter.
fn prompt_u64(label: &str, default: u64) -> u64 {
    let raw = prompt_str(&format!("{label}[{default}]: "), &default.to_string());
    match raw.parse::<u64>() {
        Ok(v) => v,
        Err(_) => {
            println!("  {} '{}' is not a number, keeping {}", "Warning:".yellow(), raw, default);
            default
        }
    }
}

/// Prompt for a string value.  Returns `default` when the user presses Enter.
pub(crate) fn prompt_str(msg: &str, default: &str) -> String {
    print!("{}", msg);
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() {
                default.to_string()
            } else {
                trimmed
            }
        }
        Err(_) => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use robowatch_types::{AlarmType, Position};

    #[test]
    fn blank_line_is_ignored() {
        assert_eq!(parse("   \n"), Ok(None));
    }

    #[test]
    fn add_keeps_multi_word_description() {
        assert_eq!(
            parse("/add R9  paint shop  arm\n"),
            Ok(Some(ReplCommand::Add {
                robot_id: "R9".into(),
                description: "paint shop  arm".into(),
            }))
        );
        assert_eq!(
            parse("/add R9"),
            Ok(Some(ReplCommand::Add {
                robot_id: "R9".into(),
                description: String::new(),
            }))
        );
        assert!(parse("/add").is_err());
    }

    #[test]
    fn describe_without_text_clears_description() {
        assert_eq!(
            parse("/describe R1 cell 4 welder"),
            Ok(Some(ReplCommand::Describe {
                robot_id: "R1".into(),
                description: "cell 4 welder".into(),
            }))
        );
        assert_eq!(
            parse("/describe R1"),
            Ok(Some(ReplCommand::Describe {
                robot_id: "R1".into(),
                description: String::new(),
            }))
        );
        assert!(parse("/describe").is_err());
    }

    #[test]
    fn run_returns_once_shutdown_is_flagged() {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let sim = Arc::new(robowatch_middleware::SimSource::new());
        let monitor = {
            let _enter = runtime.enter();
            FleetMonitor::new(sim.clone(), sim.clone(), robowatch_engine::MonitorConfig::default())
        };
        let session = Session {
            runtime: runtime.handle().clone(),
            monitor: &monitor,
            source: sim,
        };
        let shutdown = Arc::new(AtomicBool::new(true));

        run(Arc::clone(&shutdown), &session);

        assert!(shutdown.load(Ordering::SeqCst));
    }

    #[test]
    fn state_is_validated_before_dispatch() {
        assert_eq!(
            parse("/state R1 Maintenance"),
            Ok(Some(ReplCommand::State {
                robot_id: "R1".into(),
                state: OperationState::Maintenance,
            }))
        );
        assert!(parse("/state R1 sleeping").is_err());
        assert!(parse("/state R1").is_err());
    }

    #[test]
    fn history_defaults_to_first_page() {
        assert_eq!(parse("/history"), Ok(Some(ReplCommand::History { page: 1 })));
        assert_eq!(parse("/history 3"), Ok(Some(ReplCommand::History { page: 3 })));
        assert!(parse("/history 0").is_err());
        assert!(parse("/history last").is_err());
    }

    #[test]
    fn unknown_command_is_an_error() {
        let err = parse("/reboot").unwrap_err();
        assert!(err.contains("/reboot"));
        assert_eq!(parse("/exit"), Ok(Some(ReplCommand::Quit)));
    }

    #[test]
    fn robot_line_shows_telemetry_and_description() {
        let view = RobotView {
            robot_id: "R1".into(),
            description: "welder".into(),
            operation_state: OperationState::Running,
            position: Position::new(1.0, 2.5, 0.0),
            speed: 3.25,
            temperature: 61.0,
            battery_level: 48.5,
            motor_status: "running".into(),
            telemetry_at: None,
        };
        let line = robot_line(&view);
        assert!(line.contains("61.0°C"));
        assert!(line.contains("48.5%"));
        assert!(line.contains("pos (1.0, 2.5, 0.0)"));
        assert!(line.ends_with("– welder"));
    }

    #[test]
    fn alarm_line_carries_severity_and_id() {
        let alarm = Alarm {
            id: "665f".into(),
            robot_id: "R2".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            alarm_type: AlarmType::SystemError,
            message: "Motor fault detected".into(),
            temperature: None,
            battery_level: None,
        };
        assert_eq!(
            alarm_line(&alarm),
            "[2024-05-01 12:30:00] R2 ERROR: Motor fault detected (665f)"
        );
    }
}
