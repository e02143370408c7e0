//! Operator command parsing
//!
//! Each operator line is either one of a small set of control commands or raw
//! input for the active session. A line that only resembles a command (wrong
//! arity, non-numeric id, different case) is forwarded untouched so remote
//! shell input is never swallowed.

use bytes::Bytes;
use sm_core::SessionId;

/// A parsed operator line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `session <id>`
    SwitchSession(SessionId),
    /// `sessions`
    ListSessions,
    /// `close <id>`
    CloseSession(SessionId),
    /// `exit` or `quit`
    Quit,
    /// Anything else, sent verbatim to the active session
    Forward(Bytes),
}

/// Turns operator lines into [`Command`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandInterpreter;

impl CommandInterpreter {
    pub fn new() -> Self {
        Self
    }

    /// Parse one line, including its trailing newline if any
    pub fn parse(&self, line: &[u8]) -> Command {
        self.parse_control(line)
            .unwrap_or_else(|| Command::Forward(Bytes::copy_from_slice(line)))
    }

    fn parse_control(&self, line: &[u8]) -> Option<Command> {
        let text = std::str::from_utf8(line).ok()?;
        let tokens: Vec<&str> = text.split_whitespace().collect();

        match tokens.as_slice() {
            ["sessions"] => Some(Command::ListSessions),
            ["session", id] => parse_id(id).map(Command::SwitchSession),
            ["close", id] => parse_id(id).map(Command::CloseSession),
            ["exit"] | ["quit"] => Some(Command::Quit),
            _ => None,
        }
    }
}

/// Session ids are plain decimal; signs and other forms are not ids
fn parse_id(token: &str) -> Option<SessionId> {
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse::<u32>().ok().map(SessionId::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &[u8]) -> Command {
        CommandInterpreter::new().parse(line)
    }

    fn forward(line: &'static [u8]) -> Command {
        Command::Forward(Bytes::from_static(line))
    }

    #[test]
    fn test_control_commands() {
        assert_eq!(parse(b"session 3\n"), Command::SwitchSession(SessionId::new(3)));
        assert_eq!(parse(b"sessions\n"), Command::ListSessions);
        assert_eq!(parse(b"close 12\n"), Command::CloseSession(SessionId::new(12)));
        assert_eq!(parse(b"exit\n"), Command::Quit);
        assert_eq!(parse(b"quit\n"), Command::Quit);
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        assert_eq!(parse(b"  session\t4  \r\n"), Command::SwitchSession(SessionId::new(4)));
        assert_eq!(parse(b"sessions"), Command::ListSessions);
    }

    #[test]
    fn test_ordinary_input_is_forwarded() {
        assert_eq!(parse(b"hello world\n"), forward(b"hello world\n"));
        assert_eq!(parse(b"\n"), forward(b"\n"));
    }

    #[test]
    fn test_wrong_arity_is_forwarded() {
        assert_eq!(parse(b"session\n"), forward(b"session\n"));
        assert_eq!(parse(b"session 1 2\n"), forward(b"session 1 2\n"));
        assert_eq!(parse(b"sessions all\n"), forward(b"sessions all\n"));
        assert_eq!(parse(b"exit 0\n"), forward(b"exit 0\n"));
    }

    #[test]
    fn test_bad_ids_are_forwarded() {
        assert_eq!(parse(b"session abc\n"), forward(b"session abc\n"));
        assert_eq!(parse(b"close -1\n"), forward(b"close -1\n"));
        assert_eq!(parse(b"session +2\n"), forward(b"session +2\n"));
        assert_eq!(parse(b"session 99999999999\n"), forward(b"session 99999999999\n"));
    }

    #[test]
    fn test_commands_are_case_sensitive() {
        assert_eq!(parse(b"Session 1\n"), forward(b"Session 1\n"));
        assert_eq!(parse(b"EXIT\n"), forward(b"EXIT\n"));
    }

    #[test]
    fn test_invalid_utf8_is_forwarded() {
        assert_eq!(parse(b"session \xff\n"), forward(b"session \xff\n"));
    }
}
