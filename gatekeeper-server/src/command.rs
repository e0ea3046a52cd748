//! Parsing of bot commands (`/start`, `/approve`, ...).
use std::fmt;

/// A recognised bot command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// Begin (or resume) the join survey.
    Start,
    Help,
    /// Approve the request whose summary is being replied to.
    Approve,
    /// Reject the request whose summary is being replied to.
    Reject { reason: Option<String> },
    /// Request counts per state.
    Stats,
    /// List requests waiting for a decision.
    Pending,
}

/// Result of parsing a message for commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    /// Plain text, not a command.
    NotACommand,
    /// Looks like a command but is not one we know, or is addressed to another bot.
    UnrecognizedCommand { attempted: String },
    Command(BotCommand),
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotCommand::Start => write!(f, "/start"),
            BotCommand::Help => write!(f, "/help"),
            BotCommand::Approve => write!(f, "/approve"),
            BotCommand::Reject { reason: None } => write!(f, "/reject"),
            BotCommand::Reject {
                reason: Some(reason),
            } => write!(f, "/reject {}", reason),
            BotCommand::Stats => write!(f, "/stats"),
            BotCommand::Pending => write!(f, "/pending"),
        }
    }
}

/// Parse a message text.
///
/// `bot_username` is used to accept `/cmd@botname` and ignore commands meant
/// for other bots in group chats. Matching is case-insensitive on the command
/// word only; the rejection reason keeps its case.
pub fn parse_command(text: &str, bot_username: Option<&str>) -> ParseResult {
    let text = text.trim();
    let Some(rest) = text.strip_prefix('/') else {
        return ParseResult::NotACommand;
    };

    let (word, args) = match rest.split_once(char::is_whitespace) {
        Some((word, args)) => (word, args.trim()),
        None => (rest, ""),
    };

    let word = match word.split_once('@') {
        Some((word, addressee)) => {
            let ours = bot_username
                .map(|name| name.trim_start_matches('@').eq_ignore_ascii_case(addressee))
                .unwrap_or(false);
            if !ours {
                return ParseResult::UnrecognizedCommand {
                    attempted: rest.to_string(),
                };
            }
            word
        }
        None => word,
    };

    let command = match word.to_lowercase().as_str() {
        "start" => BotCommand::Start,
        "help" => BotCommand::Help,
        "approve" => BotCommand::Approve,
        "reject" => BotCommand::Reject {
            reason: (!args.is_empty()).then(|| args.to_string()),
        },
        "stats" => BotCommand::Stats,
        "pending" => BotCommand::Pending,
        _ => {
            return ParseResult::UnrecognizedCommand {
                attempted: word.to_string(),
            }
        }
    };
    ParseResult::Command(command)
}

/// Help text for private chats.
pub fn requester_help() -> &'static str {
    "Send /start to request access to the group. \
     I will ask a few questions and forward your answers to the admins."
}

/// Help text for the admin chat.
pub fn admin_help() -> &'static str {
    "Use the buttons under a request, or reply to it with /approve or /reject <reason>.\n\
     /pending lists requests waiting for a decision.\n\
     /stats shows request counts."
}
