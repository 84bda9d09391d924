//! REPL – Read-Eval-Print Loop for the armlink jog pendant.
//!
//! Supported slash-commands:
//!   /help                          – show this list
//!   /groups                        – list controllers and motion groups
//!   /connect <motion-group>        – connect a motion group (`0@controller`)
//!   /disconnect                    – release the connected motion group
//!   /info                          – static metadata of the motion group
//!   /state                         – current reconciled state
//!   /watch [seconds]               – print state changes as they arrive
//!   /mode <joint|cartesian|off>    – switch the jogging mode
//!   /jog <axis> <+|-> [velocity]   – start jogging one axis
//!   /stop                          – stop the running jog
//!   /velocity [deg/s]              – show or set the default velocity
//!   /quit | /exit                  – stop motion and exit the CLI

use colored::Colorize;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Mutex;

use armlink_client::{CellClient, ConnectedMotionGroup};
use armlink_jogging::{CommandChannel, JoggingSession, degrees_to_radians, radians_to_degrees};
use armlink_types::{ArmError, Direction, JogCommand, JoggingMode, Pose};

type Session = JoggingSession<Box<dyn CommandChannel>>;

const DEFAULT_WATCH: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Command parsing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Groups,
    Connect(String),
    Disconnect,
    Info,
    State,
    Watch(Duration),
    Mode(JoggingMode),
    /// `axis` is zero-based; the prompt takes one-based axis numbers.
    Jog {
        axis: usize,
        direction: Direction,
        velocity: Option<f64>,
    },
    Stop,
    Velocity(Option<f64>),
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandError {
    Unknown(String),
    Usage(&'static str),
    Invalid(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Unknown(name) => write!(f, "unknown command '{name}'"),
            CommandError::Usage(usage) => write!(f, "usage: {usage}"),
            CommandError::Invalid(msg) => write!(f, "{msg}"),
        }
    }
}

/// Parse one non-empty input line.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let mut parts = line.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match (name, args.as_slice()) {
        ("/help", []) => Ok(Command::Help),
        ("/groups", []) => Ok(Command::Groups),
        ("/connect", [id]) => Ok(Command::Connect(id.to_string())),
        ("/connect", _) => Err(CommandError::Usage("/connect <motion-group>")),
        ("/disconnect", []) => Ok(Command::Disconnect),
        ("/info", []) => Ok(Command::Info),
        ("/state", []) => Ok(Command::State),
        ("/watch", []) => Ok(Command::Watch(DEFAULT_WATCH)),
        ("/watch", [secs]) => {
            let secs = parse_number(secs)?;
            Ok(Command::Watch(Duration::from_secs_f64(secs)))
        }
        ("/watch", _) => Err(CommandError::Usage("/watch [seconds]")),
        ("/mode", [mode]) => mode
            .parse()
            .map(Command::Mode)
            .map_err(|e: ArmError| CommandError::Invalid(e.to_string())),
        ("/mode", _) => Err(CommandError::Usage("/mode <joint|cartesian|off>")),
        ("/jog", [axis, direction, rest @ ..]) if rest.len() <= 1 => {
            let axis = match axis.parse::<usize>() {
                Ok(n) if n >= 1 => n - 1,
                _ => {
                    return Err(CommandError::Invalid(format!(
                        "axis must be a number starting at 1, got '{axis}'"
                    )));
                }
            };
            let direction = direction
                .parse::<Direction>()
                .map_err(|e| CommandError::Invalid(e.to_string()))?;
            let velocity = rest.first().map(|v| parse_number(v)).transpose()?;
            Ok(Command::Jog {
                axis,
                direction,
                velocity,
            })
        }
        ("/jog", _) => Err(CommandError::Usage("/jog <axis> <+|-> [velocity]")),
        ("/stop", []) => Ok(Command::Stop),
        ("/velocity", []) => Ok(Command::Velocity(None)),
        ("/velocity", [v]) => Ok(Command::Velocity(Some(parse_number(v)?))),
        ("/velocity", _) => Err(CommandError::Usage("/velocity [deg/s]")),
        ("/quit" | "/exit", []) => Ok(Command::Quit),
        (other, _) => Err(CommandError::Unknown(other.to_string())),
    }
}

fn parse_number(raw: &str) -> Result<f64, CommandError> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(CommandError::Invalid(format!(
            "'{raw}' is not a non-negative number"
        ))),
    }
}

/// Build the jog for `axis` at `velocity`.
///
/// Joint axes and cartesian rotation axes take degrees per second; cartesian
/// translation axes take millimetres per second.
pub fn jog_command(mode: JoggingMode, axis: usize, direction: Direction, velocity: f64) -> JogCommand {
    let velocity = match mode {
        JoggingMode::Cartesian if axis < 3 => velocity,
        _ => degrees_to_radians(velocity),
    };
    JogCommand {
        axis,
        direction,
        velocity,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shell state
// ─────────────────────────────────────────────────────────────────────────────

/// Shared handle to the active jogging session, usable from the Ctrl-C
/// handler while the REPL owns everything else.
#[derive(Clone, Default)]
pub struct JogGuard {
    session: Arc<Mutex<Option<Session>>>,
}

impl JogGuard {
    /// Stop the running jog.  `Ok(false)` when nothing was moving.
    pub async fn halt(&self) -> Result<bool, ArmError> {
        let mut slot = self.session.lock().await;
        match slot.as_mut() {
            Some(session) if session.is_moving() => {
                session.stop().await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

pub struct Shell {
    client: CellClient,
    runtime: Handle,
    group: Option<ConnectedMotionGroup>,
    guard: JogGuard,
}

impl Shell {
    pub fn new(client: CellClient, runtime: Handle) -> Self {
        Self {
            client,
            runtime,
            group: None,
            guard: JogGuard::default(),
        }
    }

    pub fn jog_guard(&self) -> JogGuard {
        self.guard.clone()
    }

    /// Connect `motion_group`, replacing any current connection.
    pub fn connect(&mut self, motion_group: &str) {
        self.disconnect();

        print!("  Connecting {} … ", motion_group.bold());
        io::stdout().flush().ok();
        let connected = self
            .runtime
            .block_on(self.client.connect_motion_group(motion_group));
        let group = match connected {
            Ok(group) => group,
            Err(e) => {
                println!("{}: {}", "FAILED".red(), e);
                return;
            }
        };
        let session = match group.jogging_session() {
            Ok(session) => session,
            Err(e) => {
                println!("{}: {}", "FAILED".red(), e);
                return;
            }
        };
        println!(
            "{} ({} joints, {})",
            "OK".green(),
            group.joint_count(),
            if group.is_virtual() { "virtual" } else { "physical" }
        );
        self.runtime.block_on(async {
            *self.guard.session.lock().await = Some(session);
        });
        self.group = Some(group);
    }

    /// Close the jogging session and dispose the motion group.
    pub fn disconnect(&mut self) {
        self.runtime.block_on(async {
            if let Some(mut session) = self.guard.session.lock().await.take() {
                session.close().await;
            }
        });
        if let Some(group) = self.group.take() {
            let _enter = self.runtime.enter();
            group.dispose();
            println!("  Disconnected {}.", group.id().to_string().bold());
        }
    }

    /// Run one command.  Returns `false` once the REPL should exit.
    pub fn execute(&mut self, command: Command) -> bool {
        match command {
            Command::Help => cmd_help(),
            Command::Groups => self.cmd_groups(),
            Command::Connect(id) => self.connect(&id),
            Command::Disconnect => self.disconnect(),
            Command::Info => self.cmd_info(),
            Command::State => self.cmd_state(),
            Command::Watch(duration) => self.cmd_watch(duration),
            Command::Mode(mode) => self.cmd_mode(mode),
            Command::Jog {
                axis,
                direction,
                velocity,
            } => self.cmd_jog(axis, direction, velocity),
            Command::Stop => self.cmd_stop(),
            Command::Velocity(v) => self.cmd_velocity(v),
            Command::Quit => {
                self.cmd_stop();
                println!("{}", "Goodbye.".green());
                return false;
            }
        }
        true
    }

    fn connected(&self) -> Option<&ConnectedMotionGroup> {
        if self.group.is_none() {
            println!(
                "  {} Use {} first.",
                "No motion group connected.".yellow(),
                "/connect <motion-group>".bold()
            );
        }
        self.group.as_ref()
    }

    fn cmd_groups(&self) {
        match self.runtime.block_on(self.client.metadata().controllers()) {
            Ok(controllers) if controllers.is_empty() => {
                println!("  {}", "No controllers in this cell.".dimmed());
            }
            Ok(controllers) => {
                println!("{}", "Motion groups".bold().underline());
                for controller in &controllers {
                    println!("  {}", controller.controller.bold());
                    for group in &controller.motion_groups {
                        println!(
                            "    • {}  {}",
                            group.motion_group.cyan(),
                            group.model_from_controller.as_deref().unwrap_or("").dimmed()
                        );
                    }
                }
            }
            Err(e) => println!("{}: {}", "Failed to list controllers".red(), e),
        }
    }

    fn cmd_info(&self) {
        let Some(group) = self.connected() else { return };
        println!("{}", format!("Motion group {}", group.id()).bold().underline());
        println!("  Controller:   {}", group.controller_id().yellow());
        println!(
            "  Model:        {}",
            group.model_from_controller().unwrap_or("unknown").yellow()
        );
        println!("  Script id:    {}", group.script_identifier());
        println!(
            "  Controller:   {}",
            if group.is_virtual() { "virtual".cyan() } else { "physical".cyan() }
        );
        println!("  Joints:       {}", group.joint_count());
        println!("  DH links:     {}", group.dh_parameters().len());
        println!("  Safety zones: {}", group.safety_zones().len());
        if group.tcps().is_empty() {
            println!("  TCPs:         {}", "none".dimmed());
        } else {
            println!("  TCPs:");
            for tcp in group.tcps() {
                println!("    • {}  {}", tcp.id.cyan(), format_pose(&tcp.pose).dimmed());
            }
        }
    }

    fn cmd_state(&self) {
        let Some(group) = self.connected() else { return };
        let snapshot = group.snapshot();
        println!("{}", format!("State #{}", snapshot.sequence_number).bold().underline());
        println!("  Time:   {}", snapshot.timestamp.to_rfc3339());
        println!("  Joints: {}", format_joints(&snapshot.joint_position));
        match &snapshot.tcp_pose {
            Some(pose) => println!(
                "  TCP:    {} {}",
                format_pose(pose),
                snapshot.tcp.as_deref().unwrap_or("").dimmed()
            ),
            None => println!("  TCP:    {}", "unknown".dimmed()),
        }
        if let Some(standstill) = snapshot.standstill {
            println!("  Standstill: {standstill}");
        }
        if let Some(e) = group.telemetry_error() {
            println!("  {} {}", "Telemetry stopped:".red(), e);
        }
    }

    fn cmd_watch(&self, duration: Duration) {
        let Some(group) = self.connected() else { return };
        let mut updates = group.subscribe();
        println!("  Watching for {:.1}s …", duration.as_secs_f64());
        let changes = self.runtime.block_on(async {
            let deadline = tokio::time::Instant::now() + duration;
            let mut changes = 0usize;
            while let Ok(Ok(())) = tokio::time::timeout_at(deadline, updates.changed()).await {
                let snapshot = updates.borrow_and_update().clone();
                changes += 1;
                println!(
                    "  #{:<8} {}",
                    snapshot.sequence_number,
                    format_joints(&snapshot.joint_position)
                );
            }
            changes
        });
        println!("  {} change(s).", changes);
    }

    fn cmd_mode(&self, mode: JoggingMode) {
        if self.connected().is_none() {
            return;
        }
        let result = self.runtime.block_on(async {
            let mut slot = self.guard.session.lock().await;
            let session = slot.as_mut().ok_or(ArmError::Closed)?;
            session.set_mode(mode).await?;
            Ok::<_, ArmError>(session.mode())
        });
        match result {
            Ok(mode) => println!("  Jogging mode: {}", mode.to_string().cyan()),
            Err(e) => println!("{}: {}", "Mode change failed".red(), e),
        }
    }

    fn cmd_jog(&self, axis: usize, direction: Direction, velocity: Option<f64>) {
        let Some(group) = self.connected() else { return };
        let velocity = velocity.unwrap_or_else(|| group.jogging_velocity());
        let result = self.runtime.block_on(async {
            let mut slot = self.guard.session.lock().await;
            let session = slot.as_mut().ok_or(ArmError::Closed)?;
            let command = jog_command(session.mode(), axis, direction, velocity);
            session.start(command).await?;
            Ok::<_, ArmError>(command)
        });
        match result {
            Ok(command) => println!(
                "  {} axis {} {}",
                "Jogging".green().bold(),
                command.axis + 1,
                match command.direction {
                    Direction::Positive => "+",
                    Direction::Negative => "-",
                }
            ),
            Err(ArmError::JoggingDisabled) => println!(
                "  {} Select one with {}.",
                "Jogging is disabled.".yellow(),
                "/mode <joint|cartesian>".bold()
            ),
            Err(e) => println!("{}: {}", "Jog failed".red(), e),
        }
    }

    fn cmd_stop(&self) {
        match self.runtime.block_on(self.guard.halt()) {
            Ok(true) => println!("  {}", "Stopped.".green()),
            Ok(false) => {}
            Err(e) => println!("{}: {}", "Stop failed".red(), e),
        }
    }

    fn cmd_velocity(&mut self, velocity: Option<f64>) {
        let Some(group) = self.group.as_mut() else {
            self.connected();
            return;
        };
        if let Some(v) = velocity
            && let Err(e) = group.set_jogging_velocity(v)
        {
            println!("{}: {}", "Invalid velocity".red(), e);
            return;
        }
        println!(
            "  Default jogging velocity: {} deg/s",
            format!("{:.1}", group.jogging_velocity()).yellow()
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────────────────────────────────────

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(shell: &mut Shell, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "armlink>".bold().cyan());
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
            Ok(command) => {
                if !shell.execute(command) {
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }
            }
            Err(CommandError::Unknown(other)) => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
            Err(e) => println!("  {}", e.to_string().yellow()),
        }
    }
}

fn cmd_help() {
    println!("{}", "Available commands:".bold().underline());
    let rows = [
        ("/help", "Show this help message"),
        ("/groups", "List controllers and motion groups"),
        ("/connect <group>", "Connect a motion group, e.g. 0@controller"),
        ("/disconnect", "Release the connected motion group"),
        ("/info", "Show model, TCPs and safety setup"),
        ("/state", "Show the current joint and TCP state"),
        ("/watch [seconds]", "Print state changes as they arrive"),
        ("/mode <mode>", "Jogging mode: joint, cartesian or off"),
        ("/jog <axis> <+|-> [v]", "Jog an axis (deg/s, mm/s for X/Y/Z)"),
        ("/stop", "Stop the running jog"),
        ("/velocity [deg/s]", "Show or set the default jog velocity"),
        ("/quit, /exit", "Stop motion and exit"),
    ];
    for (cmd, desc) in rows {
        println!("  {:<24} {}", cmd.cyan(), desc);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Formatting
// ─────────────────────────────────────────────────────────────────────────────

/// Joint positions in degrees, two decimals.
fn format_joints(joints: &[f64]) -> String {
    let values: Vec<String> = joints
        .iter()
        .map(|rad| format!("{:.2}", radians_to_degrees(*rad)))
        .collect();
    format!("[{}]°", values.join(", "))
}

fn format_pose(pose: &Pose) -> String {
    let [x, y, z] = pose.position;
    let [rx, ry, rz] = pose.orientation;
    format!("pos [{x:.1}, {y:.1}, {z:.1}] mm  rot [{rx:.4}, {ry:.4}, {rz:.4}]")
}
