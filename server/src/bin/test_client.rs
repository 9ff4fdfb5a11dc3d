//! Headless client for poking a running server.
//!
//! Connects the stream, completes the handshake, binds a datagram endpoint,
//! then walks forward for a few seconds while printing everything received.

use clap::Parser;
use shared::{ClientMessage, Quat, ServerMessage, MOVEMENT_INPUTS};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{interval, sleep};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address (stream and datagram)
    #[clap(short, long, default_value = "127.0.0.1:3000")]
    server: SocketAddr,
    /// Name sent in the handshake
    #[clap(short, long, default_value = "test_client")]
    username: String,
    /// Seconds to keep sending movement
    #[clap(short, long, default_value = "5")]
    duration: u64,
}

async fn read_message(
    reader: &mut OwnedReadHalf,
) -> Result<ServerMessage, Box<dyn std::error::Error>> {
    let mut length = [0u8; 4];
    reader.read_exact(&mut length).await?;
    let declared = i32::from_le_bytes(length);
    let size = usize::try_from(declared).map_err(|_| format!("bad length {}", declared))?;

    let mut frame = length.to_vec();
    frame.resize(4 + size, 0);
    reader.read_exact(&mut frame[4..]).await?;
    Ok(ServerMessage::from_frame(&frame)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let stream = TcpStream::connect(args.server).await?;
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();
    println!("Connected to {}", args.server);

    let slot = match read_message(&mut reader).await? {
        ServerMessage::Welcome { message, client_id } => {
            println!("Server says \"{}\", our slot is {}", message, client_id);
            client_id
        }
        other => return Err(format!("expected a welcome, got {:?}", other).into()),
    };

    let handshake = ClientMessage::WelcomeReceived {
        client_id: slot,
        username: args.username.clone(),
    };
    writer.write_all(&handshake.to_frame()?).await?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(args.server).await?;
    println!("Datagram socket bound to {}", socket.local_addr()?);

    // Print stream traffic in the background
    tokio::spawn(async move {
        loop {
            match read_message(&mut reader).await {
                Ok(message) => println!("<- {:?}", message),
                Err(e) => {
                    println!("Stream closed: {}", e);
                    break;
                }
            }
        }
    });

    // The first datagram only registers our endpoint
    let idle = ClientMessage::PlayerMovement {
        inputs: vec![false; MOVEMENT_INPUTS],
        rotation: Quat::IDENTITY,
    };
    socket.send(&idle.to_datagram(slot)?).await?;
    sleep(Duration::from_millis(100)).await;

    let mut forward = vec![false; MOVEMENT_INPUTS];
    forward[0] = true;
    let walk = ClientMessage::PlayerMovement {
        inputs: forward,
        rotation: Quat::IDENTITY,
    }
    .to_datagram(slot)?;

    let mut ticker = interval(Duration::from_millis(33));
    let mut buf = [0u8; 4096];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.duration);
    let mut received = 0usize;

    while tokio::time::Instant::now() < deadline {
        tokio::select! {
            _ = ticker.tick() => {
                socket.send(&walk).await?;
            }
            result = socket.recv(&mut buf) => {
                let len = result?;
                match ServerMessage::from_frame(&buf[..len]) {
                    Ok(message) => {
                        received += 1;
                        if received % 30 == 1 {
                            println!("<~ {:?}", message);
                        }
                    }
                    Err(e) => println!("Bad datagram ({} bytes): {}", len, e),
                }
            }
        }
    }

    println!("Received {} datagrams, disconnecting", received);
    writer.shutdown().await?;
    Ok(())
}
