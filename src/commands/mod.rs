//! The three command handlers behind the CLI:
//!
//! - `send`: generates a room code, meets the receiver through the relay,
//!   swaps public keys, and streams the encrypted file.
//! - `receive`: joins the sender's room, swaps public keys, and decrypts the
//!   incoming transfer into the current directory.
//! - `relay`: runs the rendezvous server that pairs senders with receivers
//!   and proxies bytes when no direct connection forms.

use std::path::PathBuf;

pub mod receive;
pub mod relay;
pub mod send;

/// Where the RSA identity lives between runs.
pub(crate) fn key_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".skiff")
}
