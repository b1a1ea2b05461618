//! Stdin command parsing.

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    /// `/interval <ms>`
    Interval(u64),
    /// `/reconnect`
    Reconnect,
    /// `/quit`
    Quit,
    /// Anything that is not a command: sent as a chat message.
    Chat(String),
    /// Blank line.
    Empty,
    /// Unknown command or bad argument.
    Invalid(String),
}

impl InputCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Chat(line.to_string());
        };

        let mut parts = command.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some("interval"), Some(ms), None) => match ms.parse() {
                Ok(ms) => Self::Interval(ms),
                Err(_) => Self::Invalid(format!("not a number: {ms}")),
            },
            (Some("interval"), _, _) => Self::Invalid("usage: /interval <ms>".to_string()),
            (Some("reconnect"), None, _) => Self::Reconnect,
            (Some("quit" | "exit"), None, _) => Self::Quit,
            _ => Self::Invalid(format!("unknown command: /{command}")),
        }
    }
}
