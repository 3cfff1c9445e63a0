//! Text command parsing
//!
//! Maps inbound chat text to engine operations. Parse errors carry the
//! corrective usage text as their Display message, so the handler can
//! reply with them directly. Parsing never mutates state.

use thiserror::Error;

/// A parsed user command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// On-demand cycle, reply with the full reading
    Balance,
    Subscribe,
    Unsubscribe,
    Status,
    SetThreshold(f64),
    SetInterval(u64),
    MonitorOn,
    MonitorOff,
    /// On-demand cycle, reply with a low-balance warning when applicable
    CheckNow,
    Help,
}

/// Rejected user input. The Display text is the reply.
#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("Unknown command \"{0}\". Send \"help\" for usage.")]
    Unknown(String),

    #[error("Usage: threshold <number> — the value must be a non-negative number.")]
    InvalidThreshold,

    #[error("Usage: interval <minutes> — the value must be at least 1.")]
    InvalidInterval,

    #[error("Usage: monitor on | monitor off")]
    InvalidMonitorToggle,
}

/// Static usage text for the `help` command.
pub fn help_text() -> &'static str {
    "Available commands:\n\
     balance — query the current balance\n\
     subscribe / unsubscribe — toggle notifications for this session\n\
     status — show monitor configuration and state\n\
     threshold <number> — set the low-balance alert threshold\n\
     interval <minutes> — set the check interval\n\
     monitor on / monitor off — toggle automatic checking\n\
     check — run a check right now\n\
     help — this text"
}

/// Parse one line of chat text into a command.
pub fn parse(text: &str) -> Result<Command, CommandError> {
    let mut parts = text.split_whitespace();
    let keyword = parts
        .next()
        .ok_or_else(|| CommandError::Unknown(String::new()))?
        .to_lowercase();

    match keyword.as_str() {
        "balance" => Ok(Command::Balance),
        "subscribe" => Ok(Command::Subscribe),
        "unsubscribe" => Ok(Command::Unsubscribe),
        "status" => Ok(Command::Status),
        "check" => Ok(Command::CheckNow),
        "help" => Ok(Command::Help),
        "threshold" => {
            let value: f64 = parts
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or(CommandError::InvalidThreshold)?;
            if !value.is_finite() || value < 0.0 {
                return Err(CommandError::InvalidThreshold);
            }
            Ok(Command::SetThreshold(value))
        }
        "interval" => {
            let minutes: u64 = parts
                .next()
                .and_then(|v| v.parse().ok())
                .ok_or(CommandError::InvalidInterval)?;
            if minutes == 0 {
                return Err(CommandError::InvalidInterval);
            }
            Ok(Command::SetInterval(minutes))
        }
        "monitor" => match parts.next().map(str::to_lowercase).as_deref() {
            Some("on") => Ok(Command::MonitorOn),
            Some("off") => Ok(Command::MonitorOff),
            _ => Err(CommandError::InvalidMonitorToggle),
        },
        other => Err(CommandError::Unknown(other.to_string())),
    }
}
