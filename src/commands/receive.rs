use std::error::Error;
use std::path::Path;
use std::time::Duration;

use indicatif::ProgressBar;
use log::{debug, info};

use crate::commands::key_dir;
use crate::keys::{self, KeyPair};
use crate::networking::{establish_connection, exchange_public_keys};
use crate::transfer::ReceiveSession;
use crate::utils::{prompt_room_code, Init};

const STAGING_DIR: &str = ".skiff-staging";

/// Receive one file into the current directory, staging it under
/// `.skiff-staging` until every declared chunk has been accepted.
pub fn run(code: Option<u32>, relay_addr: &str) -> Result<(), Box<dyn Error>> {
    let room_code = match code {
        Some(code) => code,
        None => prompt_room_code()?,
    };
    debug!("joining room {room_code}");

    let key_pair = KeyPair::load_or_generate(&key_dir())?;
    debug!("our key fingerprint: {}", key_pair.fingerprint()?);

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Waiting for the sender");

    debug!("connecting to relay at {relay_addr}");
    let init = Init {
        is_sender: false,
        room: room_code,
        local_addr: None,
    };
    let mut stream = establish_connection(relay_addr, init)?;

    let peer_public = exchange_public_keys(&mut stream, &key_pair.public)?;
    spinner.finish_and_clear();
    println!(
        "Sender key fingerprint: {}",
        keys::fingerprint(&peer_public)?
    );

    let download_dir = Path::new(".");
    let mut session = ReceiveSession::new(&download_dir.join(STAGING_DIR))?;

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Receiving");

    let received = session.decrypt(&mut stream, &peer_public, &key_pair.private, download_dir)?;

    spinner.finish_and_clear();
    info!("received {} chunks", session.total_chunks());
    println!(
        "Saved {} ({} bytes)",
        received.path.display(),
        received.size
    );
    Ok(())
}
