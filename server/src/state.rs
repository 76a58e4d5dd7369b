use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use futures::SinkExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tracing::{debug, info};

use parley_protocol::{Body, Envelope, WireCodec};

use crate::errors::RoomError;
use crate::rooms::{ConnId, RoomId, RoomRegistry};

pub const SERVER_NAME: &str = "Server";

/// The one coarse-grained guard over every shared registry: rooms,
/// sessions and active display names all live behind the same mutex so a
/// name check and insert, or a membership read and a broadcast, can
/// never interleave with a concurrent mutation.
pub type Shared = Arc<Mutex<State>>;

/// Server-side record for one accepted connection, from accept to
/// disconnect. `name` is set only after a successful login.
pub struct Session {
    pub addr: SocketAddr,
    pub name: Option<String>,
    writer: FramedWrite<OwnedWriteHalf, WireCodec>,
}

pub struct State {
    pub rooms: RoomRegistry,
    sessions: HashMap<ConnId, Session>,
    names: HashSet<String>,
}

impl State {
    fn new() -> State {
        State {
            rooms: RoomRegistry::new(),
            sessions: HashMap::new(),
            names: HashSet::new(),
        }
    }

    pub fn new_shared() -> Shared {
        Arc::new(Mutex::new(State::new()))
    }

    pub fn insert_session(&mut self, conn_id: ConnId, addr: SocketAddr, tcp_write: OwnedWriteHalf) {
        self.sessions.entry(conn_id).or_insert(Session {
            addr,
            name: None,
            writer: FramedWrite::new(tcp_write, WireCodec),
        });
    }

    pub fn display_name(&self, conn_id: ConnId) -> Option<&str> {
        self.sessions.get(&conn_id)?.name.as_deref()
    }

    // exact-match lookup of an online user's connection id
    pub fn lookup_name(&self, name: &str) -> Option<ConnId> {
        self.sessions
            .iter()
            .find(|(_, s)| s.name.as_deref() == Some(name))
            .map(|(id, _)| *id)
    }

    /// Uniqueness check and name insertion in one step, under the state
    /// lock, so two simultaneous logins can never both win the same name.
    pub fn try_claim_name(&mut self, conn_id: ConnId, name: &str) -> bool {
        if self.names.contains(name) {
            return false;
        }

        if let Some(session) = self.sessions.get_mut(&conn_id) {
            self.names.insert(name.to_owned());
            session.name = Some(name.to_owned());
            true
        } else {
            false
        }
    }

    pub fn server_envelope(destination: RoomId, body: Body) -> Envelope {
        Envelope::new(SERVER_NAME, destination, body)
    }

    pub fn server_chat(destination: RoomId, text: String) -> Envelope {
        Self::server_envelope(destination, Body::Chat(text))
    }

    /// Sends one envelope to one connection. A transport write failure
    /// tears the session down silently -- no further attempt is made to
    /// notify that connection.
    pub async fn send(&mut self, conn_id: ConnId, envelope: Envelope) {
        let failed = match self.sessions.get_mut(&conn_id) {
            Some(session) => session.writer.send(envelope).await.is_err(),
            None => false,
        };

        if failed {
            debug!("Write to client {} failed, dropping session", conn_id);
            self.drop_session_silent(conn_id);
        }
    }

    /// Fans one envelope out to every current member of a room. Sends run
    /// synchronously under the state lock, so membership cannot change
    /// mid-broadcast.
    pub async fn broadcast(&mut self, room_id: RoomId, envelope: Envelope) -> Result<(), RoomError> {
        let members = self.rooms.members(room_id)?;
        let mut failed = Vec::new();

        for member in members {
            if let Some(session) = self.sessions.get_mut(&member) {
                if session.writer.send(envelope.clone()).await.is_err() {
                    failed.push(member);
                }
            }
        }

        for member in failed {
            debug!("Write to client {} failed, dropping session", member);
            self.drop_session_silent(member);
        }

        Ok(())
    }

    /// Graceful disconnect: the name is released, the connection leaves
    /// every room, and each room that survives the removal is told.
    pub async fn disconnect(&mut self, conn_id: ConnId) {
        let Some(session) = self.sessions.remove(&conn_id) else {
            return; // already torn down by a failed write
        };

        info!("Client {} at {:?} has disconnected", conn_id, session.addr);

        let Some(name) = session.name else {
            self.rooms.remove_member(conn_id);
            return;
        };
        self.names.remove(&name);

        for departure in self.rooms.remove_member(conn_id) {
            if departure.deleted {
                continue;
            }

            let notice = Self::server_chat(
                departure.room_id,
                format!("{} has disconnected from {}", name, departure.room_name),
            );
            let _ = self.broadcast(departure.room_id, notice).await;
        }
    }

    // teardown with no notifications, used when this session's own
    // transport is the thing that failed
    fn drop_session_silent(&mut self, conn_id: ConnId) {
        if let Some(session) = self.sessions.remove(&conn_id) {
            if let Some(name) = session.name {
                self.names.remove(&name);
            }
        }
        self.rooms.remove_member(conn_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    // real socket pair so sessions have an OwnedWriteHalf to hold
    async fn session_socket() -> (OwnedWriteHalf, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        let (_read, write) = server_side.into_split();
        (write, client)
    }

    async fn state_with_sessions(n: i32) -> (State, Vec<TcpStream>) {
        let mut state = State::new();
        let mut peers = Vec::new();

        for conn_id in 0..n {
            let (write, peer) = session_socket().await;
            let addr = peer.local_addr().unwrap();
            state.insert_session(conn_id, addr, write);
            peers.push(peer);
        }

        (state, peers)
    }

    #[tokio::test]
    async fn name_can_only_be_claimed_once_while_active() {
        let (mut state, _peers) = state_with_sessions(2).await;

        assert!(state.try_claim_name(0, "alice"));
        assert!(!state.try_claim_name(1, "alice"));
        assert_eq!(state.display_name(0), Some("alice"));
        assert_eq!(state.display_name(1), None);

        // once the first session is gone the name frees up
        state.disconnect(0).await;
        assert!(state.try_claim_name(1, "alice"));
    }

    #[tokio::test]
    async fn lookup_name_finds_exact_matches_only() {
        let (mut state, _peers) = state_with_sessions(1).await;
        assert!(state.try_claim_name(0, "alice"));

        assert_eq!(state.lookup_name("alice"), Some(0));
        assert_eq!(state.lookup_name("alic"), None);
        assert_eq!(state.lookup_name("Alice"), None);
    }

    #[tokio::test]
    async fn broadcast_to_missing_room_is_an_error() {
        let (mut state, _peers) = state_with_sessions(1).await;
        let envelope = State::server_chat(999, "anyone home?".into());

        assert_eq!(
            state.broadcast(999, envelope).await,
            Err(RoomError::NotFound(999))
        );
    }

    #[tokio::test]
    async fn disconnect_removes_member_from_every_room() {
        let (mut state, _peers) = state_with_sessions(2).await;
        let global = state.rooms.global_id();
        assert!(state.try_claim_name(0, "alice"));
        assert!(state.try_claim_name(1, "bob"));

        state.rooms.join_room(global, 0).unwrap();
        state.rooms.join_room(global, 1).unwrap();
        let side = state.rooms.create_room("side").id;
        state.rooms.join_room(side, 0).unwrap();

        state.disconnect(0).await;

        // solo side room deleted, global keeps running with bob
        assert!(state.rooms.lookup(side).is_none());
        assert_eq!(state.rooms.members(global).unwrap(), vec![1]);
        assert_eq!(state.lookup_name("alice"), None);
    }
}
