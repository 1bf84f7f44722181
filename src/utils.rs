use std::io::{self, Write};
use std::net::SocketAddr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// First message from a sender/receiver to the relay: which room to join and
/// which side of the transfer this connection is.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Init {
    pub is_sender: bool,
    pub room: u32,
    pub local_addr: Option<SocketAddr>,
}

/// Addresses the relay hands each peer so they can attempt a direct
/// connection to the other side.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PeerAddresses {
    pub external_addr: SocketAddr,
    pub local_addr: Option<SocketAddr>,
}

/// Generate the random 6-digit room code the sender shares with the
/// receiver out of band.
pub fn generate_room_code() -> u32 {
    rand::thread_rng().gen_range(100_000..=999_999)
}

/// Prompt on stdin for the 6-digit room code.
pub fn prompt_room_code() -> Result<u32> {
    print!("Enter the 6-digit code: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    line.trim()
        .parse::<u32>()
        .ok()
        .filter(|code| (100_000..=999_999).contains(code))
        .ok_or_else(|| Error::Protocol("expected a 6-digit room code".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn room_codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_room_code();
            assert!((100_000..=999_999).contains(&code));
        }
    }

    #[test]
    fn init_round_trips_through_bincode() {
        let init = Init {
            is_sender: true,
            room: 123_456,
            local_addr: Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4000)),
        };
        let encoded = bincode::serialize(&init).unwrap();
        let decoded: Init = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded.is_sender, init.is_sender);
        assert_eq!(decoded.room, init.room);
        assert_eq!(decoded.local_addr, init.local_addr);
    }

    #[test]
    fn peer_addresses_round_trip_through_json() {
        let peer = PeerAddresses {
            external_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), 8080),
            local_addr: None,
        };
        let encoded = serde_json::to_vec(&peer).unwrap();
        let decoded: PeerAddresses = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded.external_addr, peer.external_addr);
        assert!(decoded.local_addr.is_none());
    }
}
