//! Parsing of the lines typed at the client prompt.

use parley_core::Command;
use thiserror::Error;

pub const HELP: &str = "\
Commands:
  /connect                 start a session
  /disconnect              end the session
  /voice <name>            choose the assistant voice
  /instructions [text]     replace the instructions (empty resets them)
  /file <name>             show an allow-listed document
  /image <path>            share a local image (up to 10MB)
  /help                    show this help
  /quit                    exit
Anything else is sent to the assistant as a message.";

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Session(Command),
    /// Fetch a document through the proxy and show it locally.
    Fetch(String),
    /// Share a local image file.
    Image(String),
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("unknown command '/{0}', try /help")]
    Unknown(String),
    #[error("/{0} needs an argument")]
    MissingArgument(&'static str),
}

/// Returns `Ok(None)` for a blank line.
pub fn parse(line: &str) -> Result<Option<Input>, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Input::Session(Command::SendText(line.to_string()))));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let input = match name {
        "connect" => Input::Session(Command::Connect),
        "disconnect" => Input::Session(Command::Disconnect),
        "voice" if arg.is_empty() => return Err(ParseError::MissingArgument("voice")),
        "voice" => Input::Session(Command::SetVoice(arg.to_string())),
        "instructions" => Input::Session(Command::SetInstructions(
            (!arg.is_empty()).then(|| arg.to_string()),
        )),
        "file" if arg.is_empty() => return Err(ParseError::MissingArgument("file")),
        "file" => Input::Fetch(arg.to_string()),
        "image" if arg.is_empty() => return Err(ParseError::MissingArgument("image")),
        "image" => Input::Image(arg.to_string()),
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(input))
}
