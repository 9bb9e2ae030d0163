//! Raw-protocol smoke client: speaks through the packet pump directly,
//! without the client session layer. Useful for poking at a running server.

use shared::{PacketBody, PacketPump, DEFAULT_PORT, PROTOCOL_VERSION};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| format!("127.0.0.1:{}", DEFAULT_PORT));

    println!("Connecting to {}", addr);
    let stream = TcpStream::connect(&addr).await?;
    stream.set_nodelay(true)?;
    let (pump, mut notifications) = PacketPump::start(stream);

    let cancel = CancellationToken::new();

    let reply = pump
        .send_receive(
            PacketBody::Authenticate {
                client_name: "smoke-test".to_string(),
                client_version: PROTOCOL_VERSION,
            },
            &cancel,
        )
        .await?;
    println!("Authenticate reply: {:?}", reply.body);

    let reply = pump.send_receive(PacketBody::CreateRoom, &cancel).await?;
    println!("CreateRoom reply: {:?}", reply.body);

    println!("Listening for room updates, Ctrl+C to quit");
    loop {
        tokio::select! {
            notification = notifications.recv() => {
                match notification {
                    Some(packet) => println!("Notification: {:?}", packet.body),
                    None => {
                        println!("Server closed the connection");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let _ = pump.send(PacketBody::Disconnect).await;
    pump.close().await;
    Ok(())
}
