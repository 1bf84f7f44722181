//! Client-side connection establishment: relay rendezvous, a best-effort TCP
//! hole punch, and the public-key handshake that precedes every transfer.
//!
//! Everything here is synchronous; the transfer engine blocks on whatever
//! stream this module hands it.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use rsa::RsaPublicKey;
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Error, Result};
use crate::framing::{read_frame, write_frame};
use crate::keys;
use crate::utils::{Init, PeerAddresses};

const P2P_ATTEMPTS: u32 = 3;
const P2P_CONNECT_WINDOW: Duration = Duration::from_millis(250);

/// A socket bound with SO_REUSEADDR (and SO_REUSEPORT on unix) so the same
/// local address can listen and dial at once during the hole punch.
pub fn create_reusable_socket(local_addr: SocketAddr) -> Result<Socket> {
    let domain = match local_addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&local_addr.into())?;
    Ok(socket)
}

/// One hole-punch round: dial the peer while briefly accepting an inbound
/// connection on the same port. Whichever side wins, the first established
/// stream is returned; a dry window fails with `Timeout`.
pub fn attempt_p2p_connection(
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
) -> Result<TcpStream> {
    let listener: TcpListener = {
        let socket = create_reusable_socket(local_addr)?;
        socket.listen(16)?;
        socket.into()
    };
    listener.set_nonblocking(true)?;

    let connector = create_reusable_socket(local_addr)?;
    if connector
        .connect_timeout(&peer_addr.into(), P2P_CONNECT_WINDOW)
        .is_ok()
    {
        debug!("connected to peer {peer_addr} directly");
        let stream = TcpStream::from(connector);
        stream.set_nonblocking(false)?;
        return Ok(stream);
    }

    let deadline = Instant::now() + P2P_CONNECT_WINDOW;
    while Instant::now() < deadline {
        match listener.accept() {
            Ok((stream, addr)) => {
                debug!("accepted peer connection from {addr}");
                stream.set_nonblocking(false)?;
                return Ok(stream);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(Error::Timeout)
}

/// Connect to the relay, announce ourselves, and try to upgrade to a direct
/// peer connection. Falls back to the relay stream when the hole punch does
/// not pan out.
pub fn establish_connection(relay_addr: &str, mut init: Init) -> Result<TcpStream> {
    let mut relay_stream = TcpStream::connect(relay_addr)?;
    debug!("connected to relay at {relay_addr}");

    init.local_addr = Some(relay_stream.local_addr()?);
    let encoded = bincode::serialize(&init).map_err(|e| Error::Protocol(e.to_string()))?;
    relay_stream.write_all(&encoded)?;

    let mut buffer = vec![0u8; 1024];
    let n = relay_stream.read(&mut buffer)?;
    if n == 0 {
        return Err(Error::Protocol("relay closed the connection".into()));
    }
    let peer: PeerAddresses =
        serde_json::from_slice(&buffer[..n]).map_err(|e| Error::Protocol(e.to_string()))?;
    debug!("relay reported peer at {}", peer.external_addr);

    let local_addr = relay_stream.local_addr()?;
    let mut targets = vec![peer.external_addr];
    if let Some(peer_local) = peer.local_addr {
        if peer_local != peer.external_addr {
            targets.push(peer_local);
        }
    }
    for attempt in 1..=P2P_ATTEMPTS {
        for &target in &targets {
            match attempt_p2p_connection(local_addr, target) {
                Ok(stream) => {
                    debug!("direct connection established on attempt {attempt}");
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("p2p attempt {attempt} of {P2P_ATTEMPTS} to {target} failed: {e}");
                }
            }
        }
        if attempt < P2P_ATTEMPTS {
            thread::sleep(Duration::from_secs(2));
        }
    }

    debug!("falling back to the relay connection");
    Ok(relay_stream)
}

/// Swap PKCS#1-DER public keys over the established stream, one frame each
/// way. Returns the peer's key; callers print its fingerprint so users can
/// compare address codes out of band.
pub fn exchange_public_keys<S: Read + Write>(
    stream: &mut S,
    ours: &RsaPublicKey,
) -> Result<RsaPublicKey> {
    write_frame(stream, &keys::encode_public_key(ours)?, 0)?;
    stream.flush()?;
    let der = read_frame(stream)?.into_payload()?;
    keys::decode_public_key(&der)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn reusable_socket_binds_same_port_twice() {
        let any = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let first = create_reusable_socket(any).unwrap();
        let bound = first.local_addr().unwrap().as_socket().unwrap();
        // second bind to the identical address must succeed thanks to reuse
        create_reusable_socket(bound).unwrap();
    }

    #[test]
    fn p2p_attempt_times_out_without_a_peer() {
        let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        // an address nobody answers on
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 1);
        let started = Instant::now();
        let result = attempt_p2p_connection(local, peer);
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn public_key_handshake_over_tcp() {
        let pair = KeyPair::generate(2048).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server_public = pair.public.clone();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            exchange_public_keys(&mut stream, &server_public).unwrap()
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let peer_key = exchange_public_keys(&mut client, &pair.public).unwrap();
        let server_saw = handle.join().unwrap();

        assert_eq!(peer_key, pair.public);
        assert_eq!(server_saw, pair.public);
    }
}
