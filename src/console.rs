//! Console Frontend
//!
//! Zeilenbasierte Kommandos von stdin und eine Statuszeile, die nur bei
//! Änderungen neu ausgegeben wird.

use crate::call_engine::{format_elapsed, list_devices, AudioDevice, CallController};
use std::io::BufRead;
use thiserror::Error;
use tokio::sync::mpsc;

const HELP: &str = "\
Commands:
  call <id>   start a call
  accept      accept the incoming call
  reject      reject the incoming call
  hangup      end or cancel the current call (aliases: end, cancel)
  mute        toggle the microphone
  users       list online users
  devices     list audio devices
  status      show the current call state
  help        show this help
  quit        exit";

// ============================================================================
// COMMANDS
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0} (try 'help')")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Call(String),
    Accept,
    Reject,
    HangUp,
    Mute,
    Users,
    Devices,
    Status,
    Help,
    Quit,
}

impl Command {
    /// Parst eine Eingabezeile; leere Zeilen ergeben `None`
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let mut parts = line.split_whitespace();
        let Some(word) = parts.next() else {
            return Ok(None);
        };
        let arg = parts.next();

        let command = match word.to_ascii_lowercase().as_str() {
            "call" => match (arg, parts.next()) {
                (Some(id), None) => Command::Call(id.to_string()),
                _ => return Err(CommandError::Usage("call <id>")),
            },
            "accept" | "answer" => Command::Accept,
            "reject" | "decline" => Command::Reject,
            "hangup" | "end" | "cancel" => Command::HangUp,
            "mute" => Command::Mute,
            "users" | "who" => Command::Users,
            "devices" => Command::Devices,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };

        Ok(Some(command))
    }
}

/// Liest stdin zeilenweise in einem eigenen Thread
///
/// Ein Thread statt `tokio::io::stdin`, damit ein blockierendes `read_line`
/// das Beenden der Runtime nicht aufhält.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    rx
}

/// Führt ein Kommando aus. `false` beendet die Event-Loop.
pub async fn execute(controller: &mut CallController, command: Command) -> bool {
    let result = match command {
        Command::Call(peer_id) => controller.call(&peer_id).await,
        Command::Accept => controller.accept().await,
        Command::Reject => controller.reject(),
        Command::HangUp => controller.hang_up().await,
        Command::Mute => controller.toggle_mute().map(|muted| {
            println!("{}", if muted { "Microphone muted" } else { "Microphone on" });
        }),
        Command::Users => {
            print_users(controller);
            Ok(())
        }
        Command::Devices => {
            print_devices().await;
            Ok(())
        }
        Command::Status => {
            print_status(controller);
            Ok(())
        }
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Quit => return false,
    };

    if let Err(e) = result {
        println!("Error: {e}");
    }
    true
}

fn print_users(controller: &CallController) {
    let roster = controller.roster();
    if roster.is_empty() {
        println!("No other users online");
        return;
    }
    println!("Online users ({}):", roster.len());
    for peer in roster.peers() {
        println!("  {peer}");
    }
}

fn print_status(controller: &CallController) {
    let session = controller.session();
    println!("Id:     {}", session.local_id().unwrap_or("-"));
    println!("Status: {}", status_line(controller));
    println!("Phase:  {}", session.phase().name());
    if let Some(peer) = session.peer_id() {
        println!("Peer:   {peer}");
    }
    if session.is_active() {
        let (input, output) = session.audio_levels();
        println!("Levels: in {input:.2} / out {output:.2}");
    }
}

async fn print_devices() {
    // Geräte-Enumeration kann blockieren
    let devices = match tokio::task::spawn_blocking(list_devices).await {
        Ok(devices) => devices,
        Err(e) => {
            println!("Error: {e}");
            return;
        }
    };

    match devices {
        Ok((inputs, outputs)) => {
            print_device_list("Input devices", &inputs);
            print_device_list("Output devices", &outputs);
        }
        Err(e) => println!("Error: {e}"),
    }
}

fn print_device_list(title: &str, devices: &[AudioDevice]) {
    println!("{title}:");
    if devices.is_empty() {
        println!("  (none)");
    }
    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        println!(" {marker} {}", device.name);
    }
}

// ============================================================================
// STATUS LINE
// ============================================================================

/// Statuszeile inkl. Gesprächsdauer und Mute-Markierung
pub fn status_line(controller: &CallController) -> String {
    let session = controller.session();
    let mut line = controller.status().to_string();

    if session.is_active() {
        line.push(' ');
        line.push_str(&format_elapsed(session.elapsed_seconds()));
    }
    if session.is_muted() {
        line.push_str(" [muted]");
    }

    line
}

/// Gibt die Statuszeile aus, wenn sie sich geändert hat
#[derive(Debug, Default)]
pub struct StatusView {
    last: Option<String>,
}

impl StatusView {
    /// Gibt die neue Zeile zurück, falls sie sich geändert hat
    pub fn update(&mut self, controller: &CallController) -> Option<&str> {
        let line = status_line(controller);
        if self.last.as_deref() == Some(line.as_str()) {
            return None;
        }
        self.last = Some(line);
        self.last.as_deref()
    }

    pub fn refresh(&mut self, controller: &CallController) {
        if let Some(line) = self.update(controller) {
            println!("[{line}]");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::testing::Harness;
    use crate::signaling::{SessionDescription, SignalingEvent};

    #[test]
    fn parses_commands_and_aliases() {
        assert_eq!(
            Command::parse("call abc123"),
            Ok(Some(Command::Call("abc123".into())))
        );
        assert_eq!(Command::parse("  ACCEPT "), Ok(Some(Command::Accept)));
        assert_eq!(Command::parse("cancel"), Ok(Some(Command::HangUp)));
        assert_eq!(Command::parse("end"), Ok(Some(Command::HangUp)));
        assert_eq!(Command::parse("quit"), Ok(Some(Command::Quit)));
        assert_eq!(Command::parse(""), Ok(None));
        assert_eq!(Command::parse("   "), Ok(None));
    }

    #[test]
    fn call_requires_exactly_one_target() {
        assert_eq!(
            Command::parse("call"),
            Err(CommandError::Usage("call <id>"))
        );
        assert_eq!(
            Command::parse("call a b"),
            Err(CommandError::Usage("call <id>"))
        );
    }

    #[test]
    fn unknown_command_is_reported() {
        assert_eq!(
            Command::parse("dance"),
            Err(CommandError::Unknown("dance".into()))
        );
    }

    #[tokio::test]
    async fn status_view_reports_only_changes() {
        let mut harness = Harness::connected("me").await;
        let mut view = StatusView::default();

        assert_eq!(view.update(&harness.controller), Some("Online"));
        assert_eq!(view.update(&harness.controller), None);

        harness
            .controller
            .handle_signaling_event(SignalingEvent::Offer {
                from: "bob".into(),
                offer: SessionDescription::offer("v=0"),
            })
            .await;
        assert_eq!(
            view.update(&harness.controller),
            Some("Incoming call from bob")
        );
    }

    #[tokio::test]
    async fn active_status_includes_elapsed_time() {
        let mut harness = Harness::connected("me").await;
        harness
            .controller
            .handle_signaling_event(SignalingEvent::Offer {
                from: "bob".into(),
                offer: SessionDescription::offer("v=0"),
            })
            .await;
        harness.controller.accept().await.unwrap();
        for _ in 0..65 {
            harness.controller.tick();
        }

        assert_eq!(status_line(&harness.controller), "On call with bob 01:05");

        harness.controller.toggle_mute().unwrap();
        assert_eq!(
            status_line(&harness.controller),
            "On call with bob 01:05 [muted]"
        );
    }

    #[tokio::test]
    async fn quit_stops_the_loop() {
        let mut harness = Harness::connected("me").await;
        assert!(!execute(&mut harness.controller, Command::Quit).await);
        assert!(execute(&mut harness.controller, Command::Status).await);
    }

    #[tokio::test]
    async fn failed_command_keeps_running() {
        let mut harness = Harness::connected("me").await;
        assert!(execute(&mut harness.controller, Command::Accept).await);
        assert!(harness.controller.session().is_idle());
    }
}
