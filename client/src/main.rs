use clap::Parser;
use client::Session;
use log::{info, warn};
use shared::DEFAULT_PORT;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to connect to
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Display name to authenticate with
    #[arg(short, long)]
    name: String,

    /// Create a new room after authenticating
    #[arg(short, long, conflicts_with = "join")]
    create: bool,

    /// Join an existing room by id (e.g. ROOM-12345)
    #[arg(short, long)]
    join: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let cancel = CancellationToken::new();

    info!("Connecting to {}:{}", args.host, args.port);
    let session = Session::connect(&args.host, args.port).await?;
    let mut room_updates = session.subscribe();

    session.authenticate(&args.name, &cancel).await?;
    info!(
        "Authenticated as {} ({})",
        args.name,
        session.client_id().unwrap_or_default()
    );

    if args.create {
        let room = session.create_room(&cancel).await?;
        info!("Created room {}", room.room_id);
    } else if let Some(room_id) = &args.join {
        let room = session.join_room(room_id, &cancel).await?;
        info!("Joined room {} with {:?}", room.room_id, room.players);
    }

    loop {
        tokio::select! {
            changed = room_updates.changed() => {
                if changed.is_err() {
                    warn!("Connection to server lost");
                    break;
                }
                match room_updates.borrow_and_update().clone() {
                    Some(room) => info!("Room {} members: {:?}", room.room_id, room.players),
                    None => info!("Left the room"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Disconnecting...");
                break;
            }
        }
    }

    session.shutdown().await;
    Ok(())
}
