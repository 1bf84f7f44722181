pub mod commands;
pub mod cryptography;
pub mod error;
pub mod framing;
pub mod keys;
pub mod networking;
pub mod relay_utils;
pub mod transfer;
pub mod utils;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

/// Fixed plaintext chunk size. With a 16-bit chunk index this caps a single
/// transfer at CHUNK_SIZE * 65535 bytes (~8.4 TB).
pub const CHUNK_SIZE: usize = 128_000_000;

pub const RELAY_ADDR: &str = "127.0.0.1:8080";
