use std::error::Error;
use std::path::Path;
use std::time::Duration;

use indicatif::ProgressBar;
use log::{debug, info};

use crate::commands::key_dir;
use crate::framing::BufferPool;
use crate::keys::{self, KeyPair};
use crate::networking::{establish_connection, exchange_public_keys};
use crate::transfer::SendSession;
use crate::utils::{generate_room_code, Init};
use crate::CHUNK_SIZE;

/// Send one file: rendezvous through the relay, swap public keys, then run
/// the encrypt session over whichever stream came out of the handshake.
pub fn run(file_path: &str, relay_addr: &str) -> Result<(), Box<dyn Error>> {
    let path = Path::new(file_path);
    if !path.is_file() {
        return Err(format!("not a file: {file_path}").into());
    }

    let key_pair = KeyPair::load_or_generate(&key_dir())?;
    debug!("our key fingerprint: {}", key_pair.fingerprint()?);

    let room_code = generate_room_code();
    println!("Share this code with the receiver: \x1b[4m\x1b[1m{room_code}\x1b[0m");

    debug!("connecting to relay at {relay_addr}");
    let init = Init {
        is_sender: true,
        room: room_code,
        local_addr: None,
    };
    let mut stream = establish_connection(relay_addr, init)?;

    let peer_public = exchange_public_keys(&mut stream, &key_pair.public)?;
    println!(
        "Receiver key fingerprint: {}",
        keys::fingerprint(&peer_public)?
    );

    let mut session = SendSession::new(path)?;
    info!(
        "sending {} ({} bytes, {} chunks)",
        session.file_name(),
        session.file_size(),
        session.total_chunks()
    );

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Sending {}", session.file_name()));

    let pool = BufferPool::new(CHUNK_SIZE);
    session.encrypt(&mut stream, &peer_public, &key_pair.private, &pool)?;

    spinner.finish_with_message("Transfer complete!");
    info!("transfer completed successfully");
    Ok(())
}
