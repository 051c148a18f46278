//! Just enough of the IRC line format to drive a session.

/// A parsed IRC protocol line: `[:prefix] COMMAND param* [:trailing]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub prefix: Option<String>,
    /// Uppercased command or three-digit numeric.
    pub command: String,
    /// Middle parameters followed by the trailing one, if any.
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Parse a line without its CRLF. `None` for blank or prefix-only lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, tail) = stripped.split_once(' ')?;
            rest = tail;
            Some(prefix.to_string())
        } else {
            None
        };

        let rest = rest.trim_start_matches(' ');
        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };

        let mut words = head.split(' ').filter(|w| !w.is_empty());
        let command = words.next()?.to_ascii_uppercase();
        let mut params: Vec<String> = words.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(Self {
            prefix,
            command,
            params,
        })
    }

    /// Nickname part of the prefix (`nick!user@host`).
    pub fn nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|p| p.split(['!', '@']).next().unwrap_or(p))
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Last parameter, conventionally the message text.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// Whether the message came from `nick` (case-insensitive).
    pub fn is_from(&self, nick: &str) -> bool {
        self.nick().is_some_and(|n| n.eq_ignore_ascii_case(nick))
    }
}
