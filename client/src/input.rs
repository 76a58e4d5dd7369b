//! Turns a line of terminal input into an envelope for the server.
//!
//! A leading `/` names a command; anything else is chat for the room the
//! user currently has selected. A command given without an argument
//! defaults its payload to the current room id, so `/listusers` in room
//! 3 means `/listusers 3`.

use thiserror::Error;

use parley_protocol::{Body, Envelope, MessageKind, SERVER_ID};

#[derive(Debug, PartialEq)]
pub enum InputEvent {
    Quit,
    Send(Envelope),
}

#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("unknown command '/{0}'")]
    UnknownCommand(String),

    #[error("'/{0}' needs an argument")]
    MissingArgument(String),

    #[error("nothing to send")]
    Empty,
}

pub fn parse_line(line: &str, sender: &str, current_room: i32) -> Result<InputEvent, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(InputError::Empty);
    }

    let Some(command) = line.strip_prefix('/') else {
        let chat = Envelope::new(sender, current_room, Body::Chat(line.to_owned()));
        return Ok(InputEvent::Send(chat));
    };

    let (token, rest) = match command.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim()),
        None => (command, ""),
    };

    if token == "quit" {
        return Ok(InputEvent::Quit);
    }

    let kind = MessageKind::from_command(token)
        .ok_or_else(|| InputError::UnknownCommand(token.to_owned()))?;

    // private messages name a person, there is no sensible default
    if kind == MessageKind::PrivateMessage && rest.is_empty() {
        return Err(InputError::MissingArgument(token.to_owned()));
    }

    let arg = if rest.is_empty() {
        current_room.to_string()
    } else {
        rest.to_owned()
    };

    let body = match kind {
        MessageKind::CreateRoom => Body::CreateRoom(arg),
        MessageKind::JoinRoom => Body::JoinRoom(arg),
        MessageKind::LeaveRoom => Body::LeaveRoom(arg),
        MessageKind::ListUsers => Body::ListUsers(arg),
        MessageKind::ListRooms => Body::ListRooms(arg),
        MessageKind::PrivateMessage => Body::PrivateMessage(arg),
        _ => return Err(InputError::UnknownCommand(token.to_owned())),
    };

    Ok(InputEvent::Send(Envelope::new(sender, SERVER_ID, body)))
}
