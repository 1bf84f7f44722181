//! Relay-server internals: rooms keyed by the shared code, a manager task
//! that pairs senders with receivers, and the proxy fallback when a direct
//! peer connection never happens.

use std::collections::HashMap;
use std::net::SocketAddr;

use log::{debug, error, info, warn};
use tokio::io::{copy_bidirectional, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::utils::{Init, PeerAddresses};

const INIT_BUFFER_SIZE: usize = 1024;

pub struct Connection {
    pub stream: TcpStream,
    pub addr: SocketAddr,
    pub local_addr: Option<SocketAddr>,
}

pub struct NewConnection {
    pub connection: Connection,
    pub meta: Init,
}

pub struct AttemptPairing {
    pub room: u32,
}

pub enum Message {
    NewConnection(NewConnection),
    AttemptPairing(AttemptPairing),
}

pub struct Room {
    pub sender: Connection,
    pub receiver: Option<Connection>,
}

/// Central coordinator: owns the room table and pairs peers as they arrive.
pub struct ConnectionManager {
    pub rooms: HashMap<u32, Room>,
    pub manager_channel: Sender<Message>,
    pub inbox: Receiver<Message>,
}

impl ConnectionManager {
    pub fn new(manager_channel: Sender<Message>, inbox: Receiver<Message>) -> Self {
        ConnectionManager {
            rooms: HashMap::new(),
            manager_channel,
            inbox,
        }
    }

    /// A sender creates its room; a receiver joins an existing one. Once
    /// both sides are present, pairing is scheduled.
    pub async fn create_or_assign_room(&mut self, message: NewConnection) {
        let room_id = message.meta.room;

        if message.meta.is_sender {
            use std::collections::hash_map::Entry;
            match self.rooms.entry(room_id) {
                Entry::Vacant(entry) => {
                    info!(
                        "room {room_id}: created by sender at {}",
                        message.connection.addr
                    );
                    entry.insert(Room {
                        sender: message.connection,
                        receiver: None,
                    });
                }
                Entry::Occupied(_) => {
                    warn!("room {room_id}: rejecting duplicate sender");
                }
            }
            return;
        }

        let Some(room) = self.rooms.get_mut(&room_id) else {
            warn!("room {room_id}: receiver arrived before any sender");
            return;
        };

        if !connection_is_alive(&mut room.sender.stream) {
            info!("room {room_id}: sender disconnected before the receiver joined");
            self.rooms.remove(&room_id);
            return;
        }

        info!(
            "room {room_id}: receiver joined from {}",
            message.connection.addr
        );
        room.receiver = Some(message.connection);

        if let Err(e) = self
            .manager_channel
            .send(Message::AttemptPairing(AttemptPairing { room: room_id }))
            .await
        {
            error!("room {room_id}: failed to schedule pairing: {e}");
        }
    }

    /// Hand each peer the other's addresses, then keep proxying bytes for as
    /// long as they stay on the relay.
    pub async fn pair_peers(&mut self, room_id: u32) {
        let Some(room) = self.rooms.remove(&room_id) else {
            return;
        };
        let mut sender = room.sender;
        let Some(mut receiver) = room.receiver else {
            return;
        };

        debug!(
            "room {room_id}: pairing {} with {}",
            sender.addr, receiver.addr
        );

        let receiver_addresses = PeerAddresses {
            external_addr: receiver.addr,
            local_addr: receiver.local_addr,
        };
        let sender_addresses = PeerAddresses {
            external_addr: sender.addr,
            local_addr: sender.local_addr,
        };

        let to_sender = match serde_json::to_vec(&receiver_addresses) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("room {room_id}: failed to serialize peer addresses: {e}");
                return;
            }
        };
        let to_receiver = match serde_json::to_vec(&sender_addresses) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("room {room_id}: failed to serialize peer addresses: {e}");
                return;
            }
        };

        if let Err(e) = sender.stream.write_all(&to_sender).await {
            error!("room {room_id}: failed to inform sender: {e}");
            return;
        }
        if let Err(e) = receiver.stream.write_all(&to_receiver).await {
            error!("room {room_id}: failed to inform receiver: {e}");
            return;
        }

        // proxy until both sides close or the peers move off the relay
        match copy_bidirectional(&mut sender.stream, &mut receiver.stream).await {
            Ok((sent, received)) => info!(
                "room {room_id}: relay session ended, {sent} bytes from sender, {received} from receiver"
            ),
            Err(e) => debug!("room {room_id}: relay session dropped: {e}"),
        }
    }
}

fn connection_is_alive(stream: &mut TcpStream) -> bool {
    let mut probe = [0u8; 1];
    match stream.try_read(&mut probe) {
        Ok(0) => false,
        Ok(_) => true,
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
        Err(_) => false,
    }
}

/// The manager task: serializes all room mutations through one inbox.
pub async fn relay_manager(mut manager: ConnectionManager) {
    while let Some(message) = manager.inbox.recv().await {
        match message {
            Message::NewConnection(message) => manager.create_or_assign_room(message).await,
            Message::AttemptPairing(message) => manager.pair_peers(message.room).await,
        }
    }
}

/// Per-connection handler: decode the Init message and hand the connection
/// to the manager.
pub async fn handle_new_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    manager_channel: Sender<Message>,
) {
    let mut buffer = vec![0u8; INIT_BUFFER_SIZE];
    let init: Init = match stream.read(&mut buffer).await {
        Ok(0) => {
            debug!("{addr}: disconnected before sending init");
            return;
        }
        Ok(n) => match bincode::deserialize(&buffer[..n]) {
            Ok(init) => init,
            Err(e) => {
                warn!("{addr}: undecodable init message: {e}");
                return;
            }
        },
        Err(e) => {
            warn!("{addr}: error reading init message: {e}");
            return;
        }
    };

    debug!("{addr}: init {init:?}");
    let local_addr = init.local_addr;
    let message = NewConnection {
        connection: Connection {
            stream,
            addr,
            local_addr,
        },
        meta: init,
    };

    if let Err(e) = manager_channel.send(Message::NewConnection(message)).await {
        error!("{addr}: failed to hand connection to manager: {e}");
    }
}
