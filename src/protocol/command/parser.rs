use super::{Action, CommandRequest, OperatorCommand, Target};
use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty input")]
    Empty,

    #[error("missing message after target '{0}'")]
    MissingPayload(String),

    #[error("invalid target '{0}'")]
    InvalidTarget(String),
}

/// Parse one line of operator input.
///
/// Accepted forms (case-sensitive): `exit`, `stopint`, `<id> <message>` and
/// `<id> kick`, where `<id>` is a client identifier or `all`.
pub fn parse_operator_command(line: &str) -> Result<OperatorCommand, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let trimmed = line.trim();

    match trimmed {
        "" => return Err(ParseError::Empty),
        "exit" => return Ok(OperatorCommand::Exit),
        "stopint" => return Ok(OperatorCommand::StopInteractive),
        _ => {}
    }

    let line = line.trim_start();
    let (target, payload) = match line.split_once(' ') {
        Some((target, payload)) => (target, payload),
        None => return Err(ParseError::MissingPayload(trimmed.to_string())),
    };

    let target = parse_target(target)?;

    if payload.is_empty() {
        return Err(ParseError::MissingPayload(target.to_string()));
    }

    let action = if payload == "kick" {
        Action::Kick
    } else {
        Action::Message(Bytes::copy_from_slice(payload.as_bytes()))
    };

    Ok(OperatorCommand::Request(CommandRequest { target, action }))
}

fn parse_target(token: &str) -> Result<Target, ParseError> {
    if token == "all" {
        return Ok(Target::All);
    }

    match token.parse::<usize>() {
        Ok(0) | Err(_) => Err(ParseError::InvalidTarget(token.to_string())),
        Ok(id) => Ok(Target::Client(id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(line: &str) -> CommandRequest {
        match parse_operator_command(line).unwrap() {
            OperatorCommand::Request(request) => request,
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn control_commands() {
        assert_eq!(parse_operator_command("exit\n"), Ok(OperatorCommand::Exit));
        assert_eq!(
            parse_operator_command("stopint"),
            Ok(OperatorCommand::StopInteractive)
        );
    }

    #[test]
    fn kick_single_and_all() {
        assert_eq!(request("7 kick"), CommandRequest::kick(Target::Client(7)));
        assert_eq!(request("all kick\n"), CommandRequest::kick(Target::All));
    }

    #[test]
    fn message_keeps_inner_spaces() {
        assert_eq!(
            request("3 hello there  friend"),
            CommandRequest::message(Target::Client(3), "hello there  friend")
        );
        assert_eq!(
            request("all  spaced"),
            CommandRequest::message(Target::All, " spaced")
        );
    }

    #[test]
    fn kick_is_case_sensitive() {
        assert_eq!(
            request("2 KICK"),
            CommandRequest::message(Target::Client(2), "KICK")
        );
        assert_eq!(
            parse_operator_command("EXIT"),
            Err(ParseError::MissingPayload("EXIT".to_string()))
        );
    }

    #[test]
    fn rejects_bad_targets() {
        assert_eq!(
            parse_operator_command("bob hi"),
            Err(ParseError::InvalidTarget("bob".to_string()))
        );
        assert_eq!(
            parse_operator_command("0 kick"),
            Err(ParseError::InvalidTarget("0".to_string()))
        );
        assert_eq!(
            parse_operator_command("-4 kick"),
            Err(ParseError::InvalidTarget("-4".to_string()))
        );
    }

    #[test]
    fn rejects_missing_payload() {
        assert_eq!(parse_operator_command("   \n"), Err(ParseError::Empty));
        assert_eq!(
            parse_operator_command("5"),
            Err(ParseError::MissingPayload("5".to_string()))
        );
        assert_eq!(
            parse_operator_command("5 "),
            Err(ParseError::MissingPayload("5".to_string()))
        );
    }
}
