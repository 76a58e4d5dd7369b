use std::net::SocketAddr;

use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tracing::{debug, info};

use parley_protocol::{Body, WireCodec, SERVER_ID};

use crate::commands;
use crate::rooms::ConnId;
use crate::state::{Shared, State};

const LOGIN_TAKEN: &str = "Username already exists\nPlease try again";

// Models one accepted client connection on the server side: greets it,
// walks it through login, then reads envelopes until it goes away.
pub struct ClientHandler {
    conn_id: ConnId,
    shared: Shared,
}

type Reader = FramedRead<OwnedReadHalf, WireCodec>;

impl ClientHandler {
    // Spawn the per-connection tokio task
    pub fn spawn(conn_id: ConnId, socket: TcpStream, addr: SocketAddr, shared: Shared) {
        let _ = tokio::spawn(async move {
            let handler = ClientHandler { conn_id, shared };
            handler.run(socket, addr).await;
        });
    }

    async fn run(self, socket: TcpStream, addr: SocketAddr) {
        let (tcp_read, tcp_write) = socket.into_split();
        let mut reader = FramedRead::new(tcp_read, WireCodec);

        // connected: hand the client its id straight away
        {
            let mut state = self.shared.lock().await;
            state.insert_session(self.conn_id, addr, tcp_write);
            let greeting =
                State::server_envelope(SERVER_ID, Body::ConnectionSuccess(self.conn_id));
            state.send(self.conn_id, greeting).await;
        }

        if self.await_login(&mut reader).await {
            self.handle_read(&mut reader).await;
        }

        self.shared.lock().await.disconnect(self.conn_id).await;
    }

    /// AWAITING_LOGIN: the only input that moves the connection forward
    /// is a login envelope carrying an unclaimed display name. A taken
    /// name earns a failure reply and another try on the same socket.
    async fn await_login(&self, reader: &mut Reader) -> bool {
        while let Some(value) = reader.next().await {
            let envelope = match value {
                Ok(envelope) => envelope,
                Err(e) => {
                    debug!("Connection {} closing during login: {:?}", self.conn_id, e);
                    return false;
                }
            };

            let Body::Login(name) = envelope.body else {
                let scold =
                    State::server_envelope(SERVER_ID, Body::Error("you must log in first".into()));
                self.shared.lock().await.send(self.conn_id, scold).await;
                continue;
            };

            let name = name.trim().to_owned();
            let mut state = self.shared.lock().await;

            if !state.try_claim_name(self.conn_id, &name) {
                let failure =
                    State::server_envelope(SERVER_ID, Body::LoginFailure(LOGIN_TAKEN.into()));
                state.send(self.conn_id, failure).await;
                continue;
            }

            info!("Client {} logged in as {}", self.conn_id, name);

            // every fresh login lands in the global room
            let global = state.rooms.global_id();
            let _ = state.rooms.join_room(global, self.conn_id);

            let joined = State::server_chat(global, format!("{} has joined the server!", name));
            let _ = state.broadcast(global, joined).await;

            let success = State::server_envelope(global, Body::LoginSuccess(self.conn_id));
            state.send(self.conn_id, success).await;
            return true;
        }

        false
    }

    /// ACTIVE: envelopes addressed to the server go through the command
    /// dispatcher, everything else is room traffic fanned out to the
    /// destination's membership.
    async fn handle_read(&self, reader: &mut Reader) {
        while let Some(value) = reader.next().await {
            match value {
                Ok(mut envelope) => {
                    // the server's stamp is the only sender id anyone trusts
                    envelope.sender_id = self.conn_id;

                    let mut state = self.shared.lock().await;
                    if envelope.destination == SERVER_ID {
                        commands::dispatch(&mut state, self.conn_id, envelope).await;
                    } else {
                        let destination = envelope.destination;
                        if state.broadcast(destination, envelope).await.is_err() {
                            state
                                .send(self.conn_id, commands::invalid_room_reply(destination))
                                .await;
                        }
                    }
                }
                Err(e) => {
                    debug!("Connection {} closing on read error: {:?}", self.conn_id, e);
                    break;
                }
            }
        }
    }
}
