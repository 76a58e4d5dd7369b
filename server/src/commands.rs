use tracing::info;

use parley_protocol::{Body, Envelope, SERVER_ID};

use crate::rooms::{ConnId, RoomId};
use crate::state::State;

/// Routes an administrative envelope (destination == SERVER_ID) to its
/// handling logic, keyed purely on the message tag. Every command sends
/// the requester exactly one reply, success or failure; nobody else ever
/// sees another user's invalid command.
pub async fn dispatch(state: &mut State, from: ConnId, envelope: Envelope) {
    match envelope.body {
        Body::CreateRoom(name) => create_room(state, from, name).await,
        Body::JoinRoom(arg) => join_room(state, from, arg).await,
        Body::LeaveRoom(arg) => leave_room(state, from, arg).await,
        Body::ListUsers(arg) => list_users(state, from, arg).await,
        Body::ListRooms(arg) => list_rooms(state, from, arg).await,
        Body::PrivateMessage(target) => private_message(state, from, target).await,
        Body::Login(_) => {
            let reply =
                State::server_envelope(SERVER_ID, Body::Error("you are already logged in".into()));
            state.send(from, reply).await;
        }
        other => {
            let reply = State::server_envelope(
                SERVER_ID,
                Body::Error(format!(
                    "{:?} is not a command the server accepts",
                    other.kind()
                )),
            );
            state.send(from, reply).await;
        }
    }
}

async fn create_room(state: &mut State, from: ConnId, name: String) {
    let name = name.trim();
    if name.is_empty() {
        let reply = State::server_envelope(
            SERVER_ID,
            Body::JoinRoomFailure("a room needs a name!".into()),
        );
        state.send(from, reply).await;
        return;
    }

    let room_id = state.rooms.create_room(name).id;
    // creator joins their own room immediately
    let _ = state.rooms.join_room(room_id, from);

    info!(
        "{}({}) created room {}({})",
        requester_name(state, from),
        from,
        name,
        room_id
    );

    let reply = State::server_envelope(room_id, Body::JoinRoomSuccess(name.to_owned()));
    state.send(from, reply).await;
}

async fn join_room(state: &mut State, from: ConnId, arg: String) {
    let arg = arg.trim();

    // the user-supplied text is what failure replies quote
    let Ok(room_id) = arg.parse::<RoomId>() else {
        let reply = State::server_envelope(
            SERVER_ID,
            Body::JoinRoomFailure(format!("'{}' is not a valid room id!", arg)),
        );
        state.send(from, reply).await;
        return;
    };

    let name = requester_name(state, from);
    let (room_name, joined_notice) = match state.rooms.join_room(room_id, from) {
        Ok(room) => {
            let notice = format!("{} has joined the room {}!", name, room.name);
            (room.name.clone(), notice)
        }
        Err(e) => {
            let reply = State::server_envelope(SERVER_ID, Body::JoinRoomFailure(e.to_string()));
            state.send(from, reply).await;
            return;
        }
    };

    info!("{}({}) joined room {}({})", name, from, room_name, room_id);

    let _ = state
        .broadcast(room_id, State::server_chat(room_id, joined_notice))
        .await;

    let reply = State::server_envelope(room_id, Body::JoinRoomSuccess(room_name));
    state.send(from, reply).await;
}

async fn leave_room(state: &mut State, from: ConnId, arg: String) {
    let arg = arg.trim();

    let Ok(room_id) = arg.parse::<RoomId>() else {
        let reply = State::server_envelope(
            SERVER_ID,
            Body::LeaveRoomFailure(format!(
                "improperly formatted leaveroom command 'leaveroom {}'",
                arg
            )),
        );
        state.send(from, reply).await;
        return;
    };

    let name = requester_name(state, from);
    match state.rooms.leave_room(room_id, from) {
        Ok(departure) => {
            info!(
                "{}({}) has left room {}({})",
                name, from, departure.room_name, room_id
            );

            let reply = State::server_envelope(SERVER_ID, Body::LeaveRoomSuccess(room_id));
            state.send(from, reply).await;

            if departure.deleted {
                info!("Room {} is empty, removing", departure.room_name);
            } else {
                let notice = State::server_chat(
                    room_id,
                    format!("{} has disconnected from {}", name, departure.room_name),
                );
                let _ = state.broadcast(room_id, notice).await;
            }
        }
        Err(e) => {
            let reply = State::server_envelope(SERVER_ID, Body::LeaveRoomFailure(e.to_string()));
            state.send(from, reply).await;
        }
    }
}

async fn list_users(state: &mut State, from: ConnId, arg: String) {
    let room = arg
        .trim()
        .parse::<RoomId>()
        .ok()
        .and_then(|id| state.rooms.lookup(id));

    let reply = match room {
        Some(room) => {
            let users = room
                .members
                .iter()
                .filter_map(|id| state.display_name(*id))
                .collect::<Vec<_>>()
                .join(", ");
            State::server_chat(room.id, users)
        }
        None => State::server_chat(
            state.rooms.global_id(),
            "/listusers takes the id of a room you can see!".into(),
        ),
    };

    state.send(from, reply).await;
}

async fn list_rooms(state: &mut State, from: ConnId, arg: String) {
    // destination mirrors the caller's current room when one was given
    let destination = arg
        .trim()
        .parse::<RoomId>()
        .unwrap_or_else(|_| state.rooms.global_id());

    let rooms = state
        .rooms
        .iter()
        .map(|r| format!("{}({})", r.name, r.id))
        .collect::<Vec<_>>()
        .join(", ");

    state
        .send(from, State::server_chat(destination, rooms))
        .await;
}

async fn private_message(state: &mut State, from: ConnId, target: String) {
    let target = target.trim();
    let global = state.rooms.global_id();

    let Some(target_id) = state.lookup_name(target) else {
        let reply = State::server_envelope(
            global,
            Body::JoinRoomFailure(format!("no user named '{}' is online!", target)),
        );
        state.send(from, reply).await;
        return;
    };

    if target_id == from {
        let reply = State::server_envelope(
            global,
            Body::JoinRoomFailure("can't start a conversation with yourself!".into()),
        );
        state.send(from, reply).await;
        return;
    }

    let requester = requester_name(state, from);
    let title = format!("Conversation between {} and {}", requester, target);

    let room_id = state.rooms.create_room(&title).id;
    let _ = state.rooms.join_room(room_id, from);
    let _ = state.rooms.join_room(room_id, target_id);

    info!("{}({}) opened {}({})", requester, from, title, room_id);

    let for_requester =
        State::server_envelope(room_id, Body::JoinRoomSuccess(format!("conversation with {}", target)));
    state.send(from, for_requester).await;

    let for_target = State::server_envelope(
        room_id,
        Body::JoinRoomSuccess(format!("conversation with {}", requester)),
    );
    state.send(target_id, for_target).await;
}

fn requester_name(state: &State, from: ConnId) -> String {
    state.display_name(from).unwrap_or("?").to_owned()
}

// reply for room traffic aimed at a room id nobody owns
pub fn invalid_room_reply(room_id: RoomId) -> Envelope {
    State::server_envelope(
        SERVER_ID,
        Body::Error(format!("{} is not a valid room id!", room_id)),
    )
}
