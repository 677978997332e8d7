//! # Command Model
//!
//! A command is an ordered list of string tokens. The first token names the
//! operation (`GET`, `LRANGE`, ...) and the rest are its arguments.
//!
//! ## Design Principles
//! 1. **Immutable After Construction**: No mutable accessors are exposed, so a
//!    command can be shared across threads once built.
//! 2. **Wire Agnostic**: Encoding is the connection's job, not the model's.

use std::fmt;

/// Ordered sequence of string tokens sent to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Command {
    args: Vec<String>,
}

impl Command {
    /// Builds a command from any sequence of string-like tokens.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Operation name, i.e. the first token.
    pub fn name(&self) -> Option<&str> {
        self.arg(0)
    }

    /// Token at `index`, counting the operation name as index 0.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Human-readable form used in log lines: tokens joined by one space.
    pub fn to_query_string(&self) -> String {
        self.args.join(" ")
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query_string())
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for Command {
    fn from(args: [S; N]) -> Self {
        Command::new(args)
    }
}

impl From<Vec<String>> for Command {
    fn from(args: Vec<String>) -> Self {
        Command { args }
    }
}

impl From<&[&str]> for Command {
    fn from(args: &[&str]) -> Self {
        Command::new(args.iter().copied())
    }
}

impl<S: Into<String>> FromIterator<S> for Command {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Command::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_name_and_arguments() {
        let cmd = Command::from(["LRANGE", "mylist", "0", "-1"]);
        assert_eq!(cmd.name(), Some("LRANGE"));
        assert_eq!(cmd.arg(1), Some("mylist"));
        assert_eq!(cmd.arg(4), None);
        assert_eq!(cmd.len(), 4);
    }

    #[test]
    fn empty_command_has_no_name() {
        let cmd = Command::default();
        assert!(cmd.is_empty());
        assert_eq!(cmd.name(), None);
        assert_eq!(cmd.to_query_string(), "");
    }

    #[test]
    fn query_string_joins_tokens() {
        let cmd: Command = vec!["SET", "key", "some value"].into_iter().collect();
        assert_eq!(cmd.to_query_string(), "SET key some value");
        assert_eq!(cmd.to_string(), "SET key some value");
    }
}
