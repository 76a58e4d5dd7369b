use bytes::{Buf, BufMut, BytesMut};
use std::str;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

// encode and decode bypass traditional libraries
// like serde or message pack -- frames are hand built

// Reserved destination meaning "administrative command for the server itself"
pub const SERVER_ID: i32 = -1;

// wire tags, one per MessageKind

// client-originated room traffic
const TAG_CHAT: u8 = 1;
const TAG_FILE: u8 = 2;
const TAG_AUDIO: u8 = 3;

// administrative commands
const TAG_CREATE_ROOM: u8 = 10;
const TAG_JOIN_ROOM: u8 = 11;
const TAG_LEAVE_ROOM: u8 = 12;
const TAG_LIST_USERS: u8 = 13;
const TAG_LIST_ROOMS: u8 = 14;
const TAG_PRIVATE_MESSAGE: u8 = 15;
const TAG_LOGIN_INFORMATION: u8 = 16;

// server responses
const TAG_CONNECTION_SUCCESS: u8 = 20;
const TAG_LOGIN_SUCCESS: u8 = 21;
const TAG_LOGIN_FAILURE: u8 = 22;
const TAG_JOIN_ROOM_SUCCESS: u8 = 23;
const TAG_JOIN_ROOM_FAILURE: u8 = 24;
const TAG_LEAVE_ROOM_SUCCESS: u8 = 25;
const TAG_LEAVE_ROOM_FAILURE: u8 = 26;
const TAG_ERROR: u8 = 27;

/// Closed tag set for every message the protocol knows about,
/// used as the dispatch key on the server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Chat,
    File,
    Audio,
    CreateRoom,
    JoinRoom,
    LeaveRoom,
    ListUsers,
    ListRooms,
    PrivateMessage,
    Login,
    ConnectionSuccess,
    LoginSuccess,
    LoginFailure,
    JoinRoomSuccess,
    JoinRoomFailure,
    LeaveRoomSuccess,
    LeaveRoomFailure,
    Error,
}

impl MessageKind {
    /// Maps a client-side slash command token to its kind.
    /// Purely an input convenience -- the token never travels on the wire.
    pub fn from_command(token: &str) -> Option<MessageKind> {
        match token {
            "createroom" => Some(MessageKind::CreateRoom),
            "joinroom" => Some(MessageKind::JoinRoom),
            "leaveroom" => Some(MessageKind::LeaveRoom),
            "listusers" => Some(MessageKind::ListUsers),
            "listrooms" => Some(MessageKind::ListRooms),
            "pm" => Some(MessageKind::PrivateMessage),
            _ => None,
        }
    }

    pub fn is_room_traffic(&self) -> bool {
        matches!(
            self,
            MessageKind::Chat | MessageKind::File | MessageKind::Audio
        )
    }
}

/// Payload variant, one per MessageKind, so the payload shape is fixed
/// at construction rather than cast at the use site.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    // room traffic
    Chat(String),
    File(Vec<u8>),
    Audio(Vec<u8>),
    // commands, payloads are the raw user-supplied argument text
    CreateRoom(String),
    JoinRoom(String),
    LeaveRoom(String),
    ListUsers(String),
    ListRooms(String),
    PrivateMessage(String),
    Login(String),
    // responses
    ConnectionSuccess(i32),
    LoginSuccess(i32),
    LoginFailure(String),
    JoinRoomSuccess(String),
    JoinRoomFailure(String),
    LeaveRoomSuccess(i32),
    LeaveRoomFailure(String),
    Error(String),
}

impl Body {
    pub fn kind(&self) -> MessageKind {
        match self {
            Body::Chat(_) => MessageKind::Chat,
            Body::File(_) => MessageKind::File,
            Body::Audio(_) => MessageKind::Audio,
            Body::CreateRoom(_) => MessageKind::CreateRoom,
            Body::JoinRoom(_) => MessageKind::JoinRoom,
            Body::LeaveRoom(_) => MessageKind::LeaveRoom,
            Body::ListUsers(_) => MessageKind::ListUsers,
            Body::ListRooms(_) => MessageKind::ListRooms,
            Body::PrivateMessage(_) => MessageKind::PrivateMessage,
            Body::Login(_) => MessageKind::Login,
            Body::ConnectionSuccess(_) => MessageKind::ConnectionSuccess,
            Body::LoginSuccess(_) => MessageKind::LoginSuccess,
            Body::LoginFailure(_) => MessageKind::LoginFailure,
            Body::JoinRoomSuccess(_) => MessageKind::JoinRoomSuccess,
            Body::JoinRoomFailure(_) => MessageKind::JoinRoomFailure,
            Body::LeaveRoomSuccess(_) => MessageKind::LeaveRoomSuccess,
            Body::LeaveRoomFailure(_) => MessageKind::LeaveRoomFailure,
            Body::Error(_) => MessageKind::Error,
        }
    }

    fn tag(&self) -> u8 {
        match self.kind() {
            MessageKind::Chat => TAG_CHAT,
            MessageKind::File => TAG_FILE,
            MessageKind::Audio => TAG_AUDIO,
            MessageKind::CreateRoom => TAG_CREATE_ROOM,
            MessageKind::JoinRoom => TAG_JOIN_ROOM,
            MessageKind::LeaveRoom => TAG_LEAVE_ROOM,
            MessageKind::ListUsers => TAG_LIST_USERS,
            MessageKind::ListRooms => TAG_LIST_ROOMS,
            MessageKind::PrivateMessage => TAG_PRIVATE_MESSAGE,
            MessageKind::Login => TAG_LOGIN_INFORMATION,
            MessageKind::ConnectionSuccess => TAG_CONNECTION_SUCCESS,
            MessageKind::LoginSuccess => TAG_LOGIN_SUCCESS,
            MessageKind::LoginFailure => TAG_LOGIN_FAILURE,
            MessageKind::JoinRoomSuccess => TAG_JOIN_ROOM_SUCCESS,
            MessageKind::JoinRoomFailure => TAG_JOIN_ROOM_FAILURE,
            MessageKind::LeaveRoomSuccess => TAG_LEAVE_ROOM_SUCCESS,
            MessageKind::LeaveRoomFailure => TAG_LEAVE_ROOM_FAILURE,
            MessageKind::Error => TAG_ERROR,
        }
    }
}

/// The uniform wire message. `sender_id` is only authoritative after the
/// server stamps it on receipt -- clients are not trusted to self-report it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub sender_name: String,
    pub sender_id: i32,
    pub destination: i32,
    pub body: Body,
}

impl Envelope {
    pub fn new(sender_name: impl Into<String>, destination: i32, body: Body) -> Self {
        Envelope {
            sender_name: sender_name.into(),
            sender_id: SERVER_ID,
            destination,
            body,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }
}

pub struct WireCodec; // unit struct

// Frame layout:
//   u32 body length
//   u8 tag, i32 sender_id, i32 destination
//   u16-prefixed sender name bytes
//   payload (u32-prefixed bytes for text/binary, bare i32 for id payloads)

// convert Envelope to frame bytes
impl Encoder<Envelope> for WireCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut body = BytesMut::new();
        body.put_u8(item.body.tag());
        body.put_i32(item.sender_id);
        body.put_i32(item.destination);
        encode_name(&item.sender_name, &mut body);

        match item.body {
            Body::Chat(s)
            | Body::CreateRoom(s)
            | Body::JoinRoom(s)
            | Body::LeaveRoom(s)
            | Body::ListUsers(s)
            | Body::ListRooms(s)
            | Body::PrivateMessage(s)
            | Body::Login(s)
            | Body::LoginFailure(s)
            | Body::JoinRoomSuccess(s)
            | Body::JoinRoomFailure(s)
            | Body::LeaveRoomFailure(s)
            | Body::Error(s) => encode_bytes(s.as_bytes(), &mut body),
            Body::File(b) | Body::Audio(b) => encode_bytes(&b, &mut body),
            Body::ConnectionSuccess(id) | Body::LoginSuccess(id) | Body::LeaveRoomSuccess(id) => {
                body.put_i32(id)
            }
        }

        dst.reserve(4 + body.len());
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

// convert frame bytes back to an Envelope
impl Decoder for WireCodec {
    type Item = Envelope;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if src.len() < 4 {
                return Ok(None);
            }

            let body_len = (&src[..4]).get_u32() as usize;
            if src.len() < 4 + body_len {
                src.reserve(4 + body_len - src.len());
                return Ok(None);
            }

            src.advance(4);
            let mut frame = src.split_to(body_len);

            // a malformed frame is logged and skipped, the connection lives on
            match decode_frame(&mut frame) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(e) => warn!("Skipping undecodable frame: {:?}", e),
            }
        }
    }
}

fn decode_frame(frame: &mut BytesMut) -> Result<Envelope, std::io::Error> {
    need(frame, 9)?;
    let tag = frame.get_u8();
    let sender_id = frame.get_i32();
    let destination = frame.get_i32();
    let sender_name = decode_name(frame)?;

    let body = match tag {
        TAG_CHAT => Body::Chat(decode_text(frame)?),
        TAG_FILE => Body::File(decode_bytes(frame)?),
        TAG_AUDIO => Body::Audio(decode_bytes(frame)?),
        TAG_CREATE_ROOM => Body::CreateRoom(decode_text(frame)?),
        TAG_JOIN_ROOM => Body::JoinRoom(decode_text(frame)?),
        TAG_LEAVE_ROOM => Body::LeaveRoom(decode_text(frame)?),
        TAG_LIST_USERS => Body::ListUsers(decode_text(frame)?),
        TAG_LIST_ROOMS => Body::ListRooms(decode_text(frame)?),
        TAG_PRIVATE_MESSAGE => Body::PrivateMessage(decode_text(frame)?),
        TAG_LOGIN_INFORMATION => Body::Login(decode_text(frame)?),
        TAG_CONNECTION_SUCCESS => Body::ConnectionSuccess(decode_id(frame)?),
        TAG_LOGIN_SUCCESS => Body::LoginSuccess(decode_id(frame)?),
        TAG_LOGIN_FAILURE => Body::LoginFailure(decode_text(frame)?),
        TAG_JOIN_ROOM_SUCCESS => Body::JoinRoomSuccess(decode_text(frame)?),
        TAG_JOIN_ROOM_FAILURE => Body::JoinRoomFailure(decode_text(frame)?),
        TAG_LEAVE_ROOM_SUCCESS => Body::LeaveRoomSuccess(decode_id(frame)?),
        TAG_LEAVE_ROOM_FAILURE => Body::LeaveRoomFailure(decode_text(frame)?),
        TAG_ERROR => Body::Error(decode_text(frame)?),
        other => return Err(invalid(format!("unknown message tag {}", other))),
    };

    Ok(Envelope {
        sender_name,
        sender_id,
        destination,
        body,
    })
}

// bounds check before any Buf::get_* so a short frame never panics
fn need(src: &BytesMut, n: usize) -> Result<(), std::io::Error> {
    if src.remaining() < n {
        return Err(invalid(format!(
            "frame truncated, needed {} bytes, had {}",
            n,
            src.remaining()
        )));
    }
    Ok(())
}

fn invalid(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

fn encode_name(name: &str, dst: &mut BytesMut) {
    dst.reserve(2 + name.len());
    dst.put_u16(name.len() as u16);
    dst.extend_from_slice(name.as_bytes());
}

fn decode_name(src: &mut BytesMut) -> Result<String, std::io::Error> {
    need(src, 2)?;
    let len = src.get_u16() as usize;
    need(src, len)?;
    let bytes = src.split_to(len);
    str::from_utf8(&bytes)
        .map(str::to_owned)
        .map_err(|_| invalid("sender name is not utf8".into()))
}

fn encode_bytes(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(4 + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.extend_from_slice(payload);
}

fn decode_bytes(src: &mut BytesMut) -> Result<Vec<u8>, std::io::Error> {
    need(src, 4)?;
    let len = src.get_u32() as usize;
    need(src, len)?;
    Ok(src.split_to(len).to_vec())
}

fn decode_text(src: &mut BytesMut) -> Result<String, std::io::Error> {
    let bytes = decode_bytes(src)?;
    String::from_utf8(bytes).map_err(|_| invalid("text payload is not utf8".into()))
}

fn decode_id(src: &mut BytesMut) -> Result<i32, std::io::Error> {
    need(src, 4)?;
    Ok(src.get_i32())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(envelope: Envelope) -> Envelope {
        let mut codec = WireCodec;
        let mut buf = BytesMut::new();
        codec.encode(envelope, &mut buf).expect("encode");
        codec
            .decode(&mut buf)
            .expect("decode")
            .expect("complete frame")
    }

    #[test]
    fn chat_envelope_fields_survive_the_wire() {
        let mut envelope = Envelope::new("alice", 3, Body::Chat("hello room".into()));
        envelope.sender_id = 7;

        let decoded = roundtrip(envelope.clone());
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn id_payload_envelopes_survive_the_wire() {
        let success = Envelope::new("Server", 0, Body::LoginSuccess(4));
        assert_eq!(roundtrip(success.clone()), success);

        let left = Envelope::new("Server", SERVER_ID, Body::LeaveRoomSuccess(12));
        assert_eq!(roundtrip(left.clone()), left);
    }

    #[test]
    fn binary_payload_envelopes_survive_the_wire() {
        let file = Envelope::new("bob", 2, Body::File(vec![0, 159, 146, 150]));
        assert_eq!(roundtrip(file.clone()), file);
    }

    #[test]
    fn partial_frame_yields_none_until_complete() {
        let mut codec = WireCodec;
        let mut full = BytesMut::new();
        codec
            .encode(
                Envelope::new("alice", SERVER_ID, Body::Login("alice".into())),
                &mut full,
            )
            .expect("encode");

        let mut partial = BytesMut::from(&full[..full.len() - 3]);
        assert!(codec.decode(&mut partial).expect("decode").is_none());

        partial.extend_from_slice(&full[full.len() - 3..]);
        let decoded = codec.decode(&mut partial).expect("decode").expect("frame");
        assert_eq!(decoded.body, Body::Login("alice".into()));
    }

    #[test]
    fn unknown_tag_is_skipped_and_next_frame_decoded() {
        let mut codec = WireCodec;
        let mut buf = BytesMut::new();

        // hand-build a frame with a tag nobody owns
        let mut bad = BytesMut::new();
        bad.put_u8(99);
        bad.put_i32(0);
        bad.put_i32(0);
        bad.put_u16(0);
        buf.put_u32(bad.len() as u32);
        buf.extend_from_slice(&bad);

        codec
            .encode(
                Envelope::new("alice", 0, Body::Chat("still here".into())),
                &mut buf,
            )
            .expect("encode");

        let decoded = codec.decode(&mut buf).expect("decode").expect("frame");
        assert_eq!(decoded.body, Body::Chat("still here".into()));
    }

    #[test]
    fn slash_tokens_map_to_command_kinds() {
        assert_eq!(
            MessageKind::from_command("createroom"),
            Some(MessageKind::CreateRoom)
        );
        assert_eq!(
            MessageKind::from_command("listrooms"),
            Some(MessageKind::ListRooms)
        );
        assert_eq!(MessageKind::from_command("shout"), None);
    }
}
