use std::fmt;

/// POP3 verbs the proxy knows about. Anything else is `Other` and is relayed
/// as if it had a single-line answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    User,
    Pass,
    Apop,
    Quit,
    Stat,
    Dele,
    Noop,
    Rset,
    /// Proxy-only: quit upstream and drop this session
    Kill,
    Retr,
    Top,
    Capa,
    List,
    Uidl,
    Other,
}

impl Verb {
    pub fn from_name(name: &str) -> Self {
        match name {
            "USER" => Verb::User,
            "PASS" => Verb::Pass,
            "APOP" => Verb::Apop,
            "QUIT" => Verb::Quit,
            "STAT" => Verb::Stat,
            "DELE" => Verb::Dele,
            "NOOP" => Verb::Noop,
            "RSET" => Verb::Rset,
            "KILL" => Verb::Kill,
            "RETR" => Verb::Retr,
            "TOP" => Verb::Top,
            "CAPA" => Verb::Capa,
            "LIST" => Verb::List,
            "UIDL" => Verb::Uidl,
            _ => Verb::Other,
        }
    }
}

/// One client request line, split into an upper-cased verb and its
/// arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pop3Command {
    pub verb: Verb,
    pub name: String,
    pub args: Vec<String>,
}

impl Pop3Command {
    /// Parses a request line; `None` for a blank line.
    pub fn parse(line: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(line);
        let mut words = text.split_whitespace();
        let name = words.next()?.to_ascii_uppercase();
        Some(Self {
            verb: Verb::from_name(&name),
            name,
            args: words.map(str::to_string).collect(),
        })
    }

    /// Whether a positive answer to this command spans several lines ending
    /// with a lone `.`.
    pub fn expects_multiline(&self) -> bool {
        match self.verb {
            Verb::User
            | Verb::Pass
            | Verb::Apop
            | Verb::Quit
            | Verb::Stat
            | Verb::Dele
            | Verb::Noop
            | Verb::Rset
            | Verb::Kill => false,
            Verb::Retr | Verb::Top | Verb::Capa => true,
            Verb::List | Verb::Uidl => self.args.is_empty(),
            // A multiline answer to an unknown command still reaches the
            // client: the first line completes the response and the rest is
            // relayed as unsolicited data.
            Verb::Other => false,
        }
    }

    /// RETR and TOP: the commands whose answer is a message.
    pub fn is_retrieval(&self) -> bool {
        matches!(self.verb, Verb::Retr | Verb::Top)
    }
}

impl fmt::Display for Pop3Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.verb {
            // Never echo credentials into the logs.
            Verb::Pass | Verb::Apop => write!(f, "{} ***", self.name),
            _ if self.args.is_empty() => write!(f, "{}", self.name),
            _ => write!(f, "{} {}", self.name, self.args.join(" ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(line: &str) -> Pop3Command {
        Pop3Command::parse(line.as_bytes()).unwrap()
    }

    #[test]
    fn parses_verb_case_insensitively() {
        let c = cmd("retr 3\r\n");
        assert_eq!(c.verb, Verb::Retr);
        assert_eq!(c.name, "RETR");
        assert_eq!(c.args, vec!["3".to_string()]);
    }

    #[test]
    fn blank_lines_are_not_commands() {
        assert_eq!(Pop3Command::parse(b"\r\n"), None);
        assert_eq!(Pop3Command::parse(b"   \r\n"), None);
    }

    #[test]
    fn multiline_table() {
        for single in ["USER bob", "PASS x", "APOP bob d41d", "QUIT", "STAT", "DELE 1", "NOOP", "RSET", "KILL"] {
            assert!(!cmd(single).expects_multiline(), "{}", single);
        }
        for multi in ["RETR 1", "TOP 1 10", "CAPA", "LIST", "UIDL"] {
            assert!(cmd(multi).expects_multiline(), "{}", multi);
        }
        assert!(!cmd("LIST 2").expects_multiline());
        assert!(!cmd("UIDL 2").expects_multiline());
        assert!(!cmd("AUTH PLAIN").expects_multiline());
    }

    #[test]
    fn display_hides_passwords() {
        assert_eq!(cmd("pass hunter2").to_string(), "PASS ***");
        assert_eq!(cmd("TOP 1 99999999").to_string(), "TOP 1 99999999");
    }
}
