//! Operator command set

use std::str::FromStr;
use thiserror::Error;

/// A tokenized console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Status,
    Start(Option<String>),
    Stop(Option<String>),
    Reset(String),
    Add,
    Test(Option<String>),
    Watch,
    Help,
    Quit,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    CommandNotRecognized(String),

    #[error("Usage: {0}")]
    Usage(&'static str),
}

impl FromStr for ControlCommand {
    type Err = CommandError;

    /// Tokens are case-sensitive; an empty line means `status`
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut tokens = input.split_whitespace();
        let Some(verb) = tokens.next() else {
            return Ok(ControlCommand::Status);
        };
        let argument = tokens.next().map(str::to_string);
        if tokens.next().is_some() {
            return Err(CommandError::CommandNotRecognized(input.trim().to_string()));
        }

        let command = match (verb, argument) {
            ("status", None) => ControlCommand::Status,
            ("start", name) => ControlCommand::Start(name),
            ("stop", name) => ControlCommand::Stop(name),
            ("reset", Some(name)) => ControlCommand::Reset(name),
            ("reset", None) => return Err(CommandError::Usage("reset <tunnel_name>")),
            ("add", None) => ControlCommand::Add,
            ("test", name) => ControlCommand::Test(name),
            ("watch", None) => ControlCommand::Watch,
            ("help", None) => ControlCommand::Help,
            ("quit", None) | ("exit", None) => ControlCommand::Quit,
            _ => return Err(CommandError::CommandNotRecognized(input.trim().to_string())),
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<ControlCommand, CommandError> {
        input.parse()
    }

    #[test]
    fn test_bare_commands() {
        assert_eq!(parse("status"), Ok(ControlCommand::Status));
        assert_eq!(parse(""), Ok(ControlCommand::Status));
        assert_eq!(parse("   "), Ok(ControlCommand::Status));
        assert_eq!(parse("add"), Ok(ControlCommand::Add));
        assert_eq!(parse("watch"), Ok(ControlCommand::Watch));
        assert_eq!(parse("help"), Ok(ControlCommand::Help));
        assert_eq!(parse("quit"), Ok(ControlCommand::Quit));
        assert_eq!(parse("exit"), Ok(ControlCommand::Quit));
    }

    #[test]
    fn test_optional_names() {
        assert_eq!(parse("start"), Ok(ControlCommand::Start(None)));
        assert_eq!(
            parse("start   db-prod"),
            Ok(ControlCommand::Start(Some("db-prod".to_string())))
        );
        assert_eq!(
            parse("stop web-dev"),
            Ok(ControlCommand::Stop(Some("web-dev".to_string())))
        );
        assert_eq!(parse("test"), Ok(ControlCommand::Test(None)));
        assert_eq!(
            parse("reset api-test"),
            Ok(ControlCommand::Reset("api-test".to_string()))
        );
    }

    #[test]
    fn test_reset_requires_name() {
        assert_eq!(parse("reset"), Err(CommandError::Usage("reset <tunnel_name>")));
    }

    #[test]
    fn test_unrecognized() {
        assert!(matches!(
            parse("START"),
            Err(CommandError::CommandNotRecognized(_))
        ));
        assert!(matches!(
            parse("status now"),
            Err(CommandError::CommandNotRecognized(_))
        ));
        assert!(matches!(
            parse("start a b"),
            Err(CommandError::CommandNotRecognized(_))
        ));
        assert!(matches!(
            parse("restart"),
            Err(CommandError::CommandNotRecognized(_))
        ));
    }
}
