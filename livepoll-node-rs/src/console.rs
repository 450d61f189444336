//! Operator console: line commands read from stdin.
//!
//! Parsing is pure and lives here with its tests; [`execute`] runs a parsed
//! command against the engine and renders the outcome as text.

use chrono::Duration;
use livepoll_core::{
    LedgerError, OptionId, PollEdit, PollEngine, PollId, PollStatus, PollView,
};
use thiserror::Error;
use uuid::Uuid;

pub const HELP: &str = "\
Commands:
  create <starts_in> <duration> <question> | <opt> | <opt> | <opt> [| ...]
  list [not_started|in_progress|finished]
  show <poll>
  rename <poll> <question>
  reschedule <poll> <starts_in> <duration>
  add <poll> <text>
  remove <poll> <option>
  vote <poll> <option>
  delete <poll>
  help
  quit

Durations: 90, 90s, 15m, 2h, 1d. Options are given by id or by 1-based position.";

/// Reference to an option, either by id or by its position in the poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionRef {
    Id(OptionId),
    Position(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Create {
        starts_in: Duration,
        duration: Duration,
        question: String,
        options: Vec<String>,
    },
    List(Option<PollStatus>),
    Show(PollId),
    Rename {
        poll: PollId,
        question: String,
    },
    Reschedule {
        poll: PollId,
        starts_in: Duration,
        duration: Duration,
    },
    Add {
        poll: PollId,
        text: String,
    },
    Remove {
        poll: PollId,
        option: OptionRef,
    },
    Vote {
        poll: PollId,
        option: OptionRef,
    },
    Delete(PollId),
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("not a valid id: {0}")]
    InvalidId(String),

    #[error("not a valid duration: {0} (use 90, 90s, 15m, 2h or 1d)")]
    InvalidDuration(String),

    #[error("{0}")]
    InvalidStatus(String),
}

/// Split off the first whitespace-delimited word
fn next_word(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    match input.find(char::is_whitespace) {
        Some(end) => Some((&input[..end], input[end..].trim_start())),
        None => Some((input, "")),
    }
}

fn parse_id(word: &str) -> Result<Uuid, CommandError> {
    Uuid::parse_str(word).map_err(|_| CommandError::InvalidId(word.to_string()))
}

fn parse_option(word: &str) -> Result<OptionRef, CommandError> {
    match word.parse::<usize>() {
        Ok(position) if position > 0 => Ok(OptionRef::Position(position)),
        _ => parse_id(word).map(OptionRef::Id),
    }
}

/// Parse `90`, `90s`, `15m`, `2h` or `1d`
pub fn parse_duration(word: &str) -> Result<Duration, CommandError> {
    let invalid = || CommandError::InvalidDuration(word.to_string());

    let (digits, unit) = match word.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&word[..i], c),
        _ => (word, 's'),
    };
    let value: i64 = digits.parse().map_err(|_| invalid())?;
    if value < 0 {
        return Err(invalid());
    }

    match unit {
        's' => Duration::try_seconds(value),
        'm' => Duration::try_minutes(value),
        'h' => Duration::try_hours(value),
        'd' => Duration::try_days(value),
        _ => None,
    }
    .ok_or_else(invalid)
}

/// Parse one console line
pub fn parse(line: &str) -> Result<Command, CommandError> {
    let (verb, rest) = next_word(line).ok_or(CommandError::Empty)?;

    match verb {
        "create" => {
            const USAGE: &str = "create <starts_in> <duration> <question> | <opt> | <opt> | <opt>";
            let (starts_in, rest) = next_word(rest).ok_or(CommandError::Usage(USAGE))?;
            let (duration, rest) = next_word(rest).ok_or(CommandError::Usage(USAGE))?;

            let mut parts = rest.split('|').map(str::trim);
            let question = parts.next().unwrap_or_default().to_string();
            let options: Vec<String> = parts.map(str::to_string).collect();
            if question.is_empty() || options.is_empty() {
                return Err(CommandError::Usage(USAGE));
            }

            Ok(Command::Create {
                starts_in: parse_duration(starts_in)?,
                duration: parse_duration(duration)?,
                question,
                options,
            })
        }
        "list" | "ls" => match next_word(rest) {
            None => Ok(Command::List(None)),
            Some((status, _)) => status
                .parse::<PollStatus>()
                .map(|s| Command::List(Some(s)))
                .map_err(CommandError::InvalidStatus),
        },
        "show" => {
            let (poll, _) = next_word(rest).ok_or(CommandError::Usage("show <poll>"))?;
            Ok(Command::Show(parse_id(poll)?))
        }
        "rename" => {
            const USAGE: &str = "rename <poll> <question>";
            let (poll, question) = next_word(rest).ok_or(CommandError::Usage(USAGE))?;
            if question.is_empty() {
                return Err(CommandError::Usage(USAGE));
            }
            Ok(Command::Rename {
                poll: parse_id(poll)?,
                question: question.trim_end().to_string(),
            })
        }
        "reschedule" => {
            const USAGE: &str = "reschedule <poll> <starts_in> <duration>";
            let (poll, rest) = next_word(rest).ok_or(CommandError::Usage(USAGE))?;
            let (starts_in, rest) = next_word(rest).ok_or(CommandError::Usage(USAGE))?;
            let (duration, _) = next_word(rest).ok_or(CommandError::Usage(USAGE))?;
            Ok(Command::Reschedule {
                poll: parse_id(poll)?,
                starts_in: parse_duration(starts_in)?,
                duration: parse_duration(duration)?,
            })
        }
        "add" => {
            const USAGE: &str = "add <poll> <text>";
            let (poll, text) = next_word(rest).ok_or(CommandError::Usage(USAGE))?;
            if text.is_empty() {
                return Err(CommandError::Usage(USAGE));
            }
            Ok(Command::Add {
                poll: parse_id(poll)?,
                text: text.trim_end().to_string(),
            })
        }
        "remove" | "vote" => {
            let usage = if verb == "vote" {
                "vote <poll> <option>"
            } else {
                "remove <poll> <option>"
            };
            let (poll, rest) = next_word(rest).ok_or(CommandError::Usage(usage))?;
            let (option, _) = next_word(rest).ok_or(CommandError::Usage(usage))?;
            let (poll, option) = (parse_id(poll)?, parse_option(option)?);

            Ok(if verb == "vote" {
                Command::Vote { poll, option }
            } else {
                Command::Remove { poll, option }
            })
        }
        "delete" => {
            let (poll, _) = next_word(rest).ok_or(CommandError::Usage("delete <poll>"))?;
            Ok(Command::Delete(parse_id(poll)?))
        }
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

fn resolve_option(
    engine: &PollEngine,
    poll_id: PollId,
    option: OptionRef,
) -> Result<OptionId, LedgerError> {
    match option {
        OptionRef::Id(id) => Ok(id),
        OptionRef::Position(position) => {
            let poll = engine.get_poll(poll_id)?;
            position
                .checked_sub(1)
                .and_then(|i| poll.options.get(i))
                .map(|o| o.id)
                .ok_or_else(|| {
                    LedgerError::Validation(format!(
                        "poll has {} options, there is no option {}",
                        poll.options.len(),
                        position
                    ))
                })
        }
    }
}

pub fn render_poll(poll: &PollView) -> String {
    let mut out = format!(
        "{} [{}] {}\n  {} .. {}  ({} votes)",
        poll.id,
        poll.status,
        poll.question,
        poll.starts_at.format("%Y-%m-%d %H:%M:%S"),
        poll.ends_at.format("%Y-%m-%d %H:%M:%S"),
        poll.total_votes()
    );
    for (i, option) in poll.options.iter().enumerate() {
        out.push_str(&format!(
            "\n  {:>2}. {}  {:<24} {}",
            i + 1,
            option.id,
            option.text,
            option.votes
        ));
    }
    out
}

/// Run a command against the engine. `Help` and `Quit` are handled by the caller.
pub fn execute(engine: &PollEngine, command: Command) -> Result<String, LedgerError> {
    match command {
        Command::Create {
            starts_in,
            duration,
            question,
            options,
        } => {
            let poll = engine.schedule_poll(question, starts_in, duration, options)?;
            Ok(render_poll(&poll))
        }
        Command::List(filter) => {
            let polls = engine.list_polls(filter)?;
            if polls.is_empty() {
                return Ok("no polls".to_string());
            }
            Ok(polls
                .iter()
                .map(|p| format!("{} [{}] {} ({} votes)", p.id, p.status, p.question, p.total_votes()))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Command::Show(poll) => Ok(render_poll(&engine.get_poll(poll)?)),
        Command::Rename { poll, question } => {
            let poll = engine.edit_poll(poll, PollEdit::default().question(question))?;
            Ok(render_poll(&poll))
        }
        Command::Reschedule {
            poll,
            starts_in,
            duration,
        } => {
            let poll = engine.reschedule_poll(poll, starts_in, duration)?;
            Ok(render_poll(&poll))
        }
        Command::Add { poll, text } => {
            let option = engine.add_option(poll, &text)?;
            Ok(format!("added option {} '{}'", option.id, option.text))
        }
        Command::Remove { poll, option } => {
            let option_id = resolve_option(engine, poll, option)?;
            engine.remove_option(poll, option_id)?;
            Ok(format!("removed option {}", option_id))
        }
        Command::Vote { poll, option } => {
            let option_id = resolve_option(engine, poll, option)?;
            let option = engine.cast_vote(poll, option_id)?;
            Ok(format!("'{}' now has {} votes", option.text, option.votes))
        }
        Command::Delete(poll) => {
            engine.delete_poll(poll)?;
            Ok(format!("deleted poll {}", poll))
        }
        Command::Help | Command::Quit => Ok(HELP.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livepoll_core::{EngineConfig, ErrorKind};

    const POLL: &str = "6f1c1b7e-3f0a-4a64-9d51-1f1e5d3c7a10";

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90"), Ok(Duration::seconds(90)));
        assert_eq!(parse_duration("90s"), Ok(Duration::seconds(90)));
        assert_eq!(parse_duration("15m"), Ok(Duration::minutes(15)));
        assert_eq!(parse_duration("2h"), Ok(Duration::hours(2)));
        assert_eq!(parse_duration("1d"), Ok(Duration::days(1)));
        assert_eq!(parse_duration("0"), Ok(Duration::zero()));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("-5m").is_err());
        assert!(parse_duration("3w").is_err());
        assert!(parse_duration("1.5h").is_err());
    }

    #[test]
    fn test_parse_create() {
        let cmd = parse("create 10m 1h Best pizza topping? | pineapple | mushroom |  olives ").unwrap();
        assert_eq!(
            cmd,
            Command::Create {
                starts_in: Duration::minutes(10),
                duration: Duration::hours(1),
                question: "Best pizza topping?".to_string(),
                options: vec!["pineapple".into(), "mushroom".into(), "olives".into()],
            }
        );

        assert!(matches!(parse("create 10m 1h | a | b"), Err(CommandError::Usage(_))));
        assert!(matches!(parse("create 10m 1h Question only"), Err(CommandError::Usage(_))));
        assert!(matches!(parse("create soon 1h Q | a"), Err(CommandError::InvalidDuration(_))));
    }

    #[test]
    fn test_parse_poll_commands() {
        let poll = Uuid::parse_str(POLL).unwrap();

        assert_eq!(parse(&format!("show {}", POLL)), Ok(Command::Show(poll)));
        assert_eq!(parse(&format!("delete {}", POLL)), Ok(Command::Delete(poll)));
        assert_eq!(
            parse(&format!("vote {} 2", POLL)),
            Ok(Command::Vote { poll, option: OptionRef::Position(2) })
        );
        assert_eq!(
            parse(&format!("remove {} {}", POLL, POLL)),
            Ok(Command::Remove { poll, option: OptionRef::Id(poll) })
        );
        assert_eq!(
            parse(&format!("rename {}   Lunch or dinner? ", POLL)),
            Ok(Command::Rename { poll, question: "Lunch or dinner?".into() })
        );
        assert_eq!(
            parse(&format!("reschedule {} 1d 2h", POLL)),
            Ok(Command::Reschedule { poll, starts_in: Duration::days(1), duration: Duration::hours(2) })
        );

        assert!(matches!(parse("show 42"), Err(CommandError::InvalidId(_))));
        assert!(matches!(parse(&format!("vote {} 0", POLL)), Err(CommandError::InvalidId(_))));
        assert!(matches!(parse(&format!("add {}", POLL)), Err(CommandError::Usage(_))));
    }

    #[test]
    fn test_parse_misc() {
        assert_eq!(parse("   "), Err(CommandError::Empty));
        assert_eq!(parse("list"), Ok(Command::List(None)));
        assert_eq!(parse("list in_progress"), Ok(Command::List(Some(PollStatus::InProgress))));
        assert!(matches!(parse("list open"), Err(CommandError::InvalidStatus(_))));
        assert_eq!(parse("help"), Ok(Command::Help));
        assert_eq!(parse("quit"), Ok(Command::Quit));
        assert_eq!(parse("frobnicate"), Err(CommandError::Unknown("frobnicate".into())));
    }

    #[test]
    fn test_execute_vote_by_position() {
        let engine = PollEngine::open(EngineConfig::default()).unwrap();
        execute(&engine, parse("create 0 1h Tea or coffee? | tea | coffee | water").unwrap()).unwrap();
        let poll = engine.list_polls(None).unwrap().remove(0);

        let out = execute(&engine, parse(&format!("vote {} 2", poll.id)).unwrap()).unwrap();
        assert_eq!(out, "'coffee' now has 1 votes");

        let err = execute(&engine, parse(&format!("vote {} 9", poll.id)).unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        // Already running, so structure is frozen
        let err = execute(&engine, parse(&format!("add {} juice", poll.id)).unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_execute_far_future_schedule_is_rejected() {
        let engine = PollEngine::open(EngineConfig::default()).unwrap();

        // Parses fine, but lands past the last representable instant
        let cmd = parse("create 300000000d 1h Q? | a | b | c").unwrap();
        let err = execute(&engine, cmd).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let cmd = parse("create 1h 300000000d Q? | a | b | c").unwrap();
        assert_eq!(execute(&engine, cmd).unwrap_err().kind(), ErrorKind::Validation);
        assert!(engine.list_polls(None).unwrap().is_empty());

        execute(&engine, parse("create 1h 1h Q? | a | b | c").unwrap()).unwrap();
        let poll = engine.list_polls(None).unwrap().remove(0);
        let cmd = parse(&format!("reschedule {} 300000000d 1h", poll.id)).unwrap();
        assert_eq!(execute(&engine, cmd).unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(engine.get_poll(poll.id).unwrap().starts_at, poll.starts_at);
    }
}
