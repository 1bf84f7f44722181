use std::error::Error;

use log::info;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::relay_utils::{handle_new_connection, relay_manager, ConnectionManager, Message};

/// Run the relay server: a rendezvous point that groups senders and
/// receivers into rooms, hands each side the other's addresses, and proxies
/// the transfer when the peers stay on the relay.
///
/// The server is the only async part of the tool, so it builds its own
/// runtime rather than forcing one on the synchronous transfer paths.
pub fn run(port: u16) -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(serve(port))
}

async fn serve(port: u16) -> Result<(), Box<dyn Error>> {
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&bind_addr).await?;
    println!("Relay listening on {bind_addr}");
    info!("relay server started on {bind_addr}");

    let (manager_channel, inbox) = mpsc::channel::<Message>(100);
    let manager = ConnectionManager::new(manager_channel.clone(), inbox);
    tokio::spawn(relay_manager(manager));

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("client connected: {addr}");
        tokio::spawn(handle_new_connection(stream, addr, manager_channel.clone()));
    }
}
