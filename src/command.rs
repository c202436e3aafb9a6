//! Operator and bridge command grammar.
//!
//! The first whitespace-delimited token selects the command; the remainder
//! of the line, with a single leading space stripped, is the argument text.

/// Static command summary returned by `help`.
pub const HELP_TEXT: &str = "Available commands: message_all <text>, message_single <ip> <text>, \
show_ips, kill_switch, stop, help";

/// A parsed operator or bridge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `message_all <text>`: send `MSG:<text>` to every alive session.
    BroadcastMessage(String),
    /// `message_single <addr> <text>`: send `MSG:<text>` to one session.
    UnicastMessage {
        /// Address of the target session.
        target: String,
        /// Message body.
        text: String,
    },
    /// `show_ips`: list alive sessions.
    Enumerate,
    /// `kill_switch`: disconnect every agent.
    KillSwitch,
    /// `stop`: notify agents and shut the server down.
    Shutdown,
    /// `help`: command summary.
    Help,
    /// A known verb with unusable arguments.
    Malformed {
        /// The verb that was recognised.
        verb: String,
        /// Why the arguments were rejected.
        reason: String,
    },
    /// Anything else, verbatim.
    Unrecognized(String),
}

impl Command {
    /// Parse one input line.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        let trimmed = line.trim_start();
        let verb_end = trimmed
            .find(char::is_whitespace)
            .unwrap_or(trimmed.len());
        let (verb, rest) = trimmed.split_at(verb_end);
        let args = rest.strip_prefix(' ').unwrap_or(rest);

        match verb {
            "message_all" => Self::BroadcastMessage(args.to_owned()),
            "message_single" => parse_unicast(args),
            "show_ips" => Self::Enumerate,
            "kill_switch" => Self::KillSwitch,
            "stop" => Self::Shutdown,
            "help" => Self::Help,
            _ => Self::Unrecognized(line.trim().to_owned()),
        }
    }

    /// Verb used in logs and events.
    #[must_use]
    pub fn verb(&self) -> &str {
        match self {
            Self::BroadcastMessage(_) => "message_all",
            Self::UnicastMessage { .. } => "message_single",
            Self::Enumerate => "show_ips",
            Self::KillSwitch => "kill_switch",
            Self::Shutdown => "stop",
            Self::Help => "help",
            Self::Malformed { verb, .. } => verb,
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

fn parse_unicast(args: &str) -> Command {
    let Some((target, text)) = args.split_once(' ') else {
        return Command::Malformed {
            verb: "message_single".into(),
            reason: "expected: message_single <ip> <text>".into(),
        };
    };

    if target.is_empty() {
        return Command::Malformed {
            verb: "message_single".into(),
            reason: "missing target address".into(),
        };
    }

    Command::UnicastMessage {
        target: target.to_owned(),
        text: text.to_owned(),
    }
}
