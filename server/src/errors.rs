use thiserror::Error;

/// Room registry lookup failures. Never fatal, always surfaced back to
/// the requesting client as a failure reply.
#[derive(Debug, Error, PartialEq)]
pub enum RoomError {
    #[error("could not find room with id {0}!")]
    NotFound(i32),

    #[error("you are not a member of room {0}!")]
    NotAMember(i32),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("unable to bind to server address {addr}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}
