use std::env;

use futures::SinkExt;
use tokio::io;
use tokio::net::TcpStream;
use tokio::select;
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, FramedRead, LinesCodec};

use tracing::{error, Level};
use tracing_subscriber::fmt;

use parley_client::input::{parse_line, InputEvent};
use parley_protocol::{Body, Envelope, WireCodec, SERVER_ID};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "4321";
const LINES_MAX_LEN: usize = 256;

#[tokio::main]
async fn main() -> io::Result<()> {
    // chat lands on stdout, so keep tracing quiet unless it matters
    fmt().compact().with_max_level(Level::WARN).init();

    let mut args = env::args().skip(1);
    let Some(mut name) = args.next() else {
        eprintln!("usage: parley-client <name> [host] [port]");
        return Ok(());
    };
    let host = args.next().unwrap_or_else(|| DEFAULT_HOST.to_owned());
    let port = args.next().unwrap_or_else(|| DEFAULT_PORT.to_owned());

    let addr = format!("{}:{}", host, port);
    let stream = TcpStream::connect(&addr).await.map_err(|e| {
        error!("Unable to connect to server {}", addr);
        e
    })?;

    let mut server = Framed::new(stream, WireCodec);
    let mut lines = FramedRead::new(
        io::stdin(),
        LinesCodec::new_with_max_length(LINES_MAX_LEN),
    );

    // room the next plain chat line goes to; set by the login ack
    let mut current_room = SERVER_ID;
    let mut global_room = SERVER_ID;
    let mut logged_in = false;

    loop {
        select! {
            frame = server.next() => {
                let envelope = match frame {
                    Some(Ok(envelope)) => envelope,
                    Some(Err(e)) => {
                        error!("Server connection error: {:?}", e);
                        break;
                    }
                    None => {
                        println!("*** server closed the connection");
                        break;
                    }
                };

                match envelope.body {
                    Body::ConnectionSuccess(id) => {
                        println!("*** connected with id {}, logging in as {}", id, name);
                        let login = Envelope::new(name.clone(), SERVER_ID, Body::Login(name.clone()));
                        server.send(login).await?;
                    }
                    Body::LoginSuccess(_) => {
                        logged_in = true;
                        global_room = envelope.destination;
                        current_room = envelope.destination;
                        println!("*** logged in, chatting in room {}", current_room);
                    }
                    Body::LoginFailure(reason) => {
                        println!("!!! {}", reason);
                        println!("*** type a new name to retry");
                    }
                    Body::JoinRoomSuccess(desc) => {
                        current_room = envelope.destination;
                        println!("*** now in {} (room {})", desc, current_room);
                    }
                    Body::LeaveRoomSuccess(room) => {
                        if current_room == room {
                            current_room = global_room;
                        }
                        println!("*** left room {}, back in room {}", room, current_room);
                    }
                    Body::JoinRoomFailure(reason)
                    | Body::LeaveRoomFailure(reason)
                    | Body::Error(reason) => println!("!!! {}", reason),
                    Body::Chat(text) => {
                        if envelope.sender_id == SERVER_ID {
                            println!("*** {}", text);
                        } else {
                            println!("[room {}] <{}> {}", envelope.destination, envelope.sender_name, text);
                        }
                    }
                    Body::File(bytes) => {
                        println!("*** {} shared a file ({} bytes)", envelope.sender_name, bytes.len());
                    }
                    Body::Audio(bytes) => {
                        println!("*** {} sent audio ({} bytes)", envelope.sender_name, bytes.len());
                    }
                    // client-bound stream never carries command envelopes
                    _ => {}
                }
            }

            line = lines.next() => {
                let Some(Ok(line)) = line else { break };

                if !logged_in {
                    // a line typed before login is a fresh name attempt
                    let retry = line.trim();
                    if retry.is_empty() {
                        continue;
                    }
                    name = retry.to_owned();
                    let login = Envelope::new(name.clone(), SERVER_ID, Body::Login(name.clone()));
                    server.send(login).await?;
                    continue;
                }

                match parse_line(&line, &name, current_room) {
                    Ok(InputEvent::Quit) => break,
                    Ok(InputEvent::Send(envelope)) => server.send(envelope).await?,
                    Err(e) => println!("!!! {}", e),
                }
            }
        }
    }

    Ok(())
}
