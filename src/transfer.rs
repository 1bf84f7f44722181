//! The chunked authenticated-encryption transfer engine.
//!
//! A session is a single-owner handle for one transfer: one encrypt or one
//! decrypt call may be active per session, never both, never two. Distinct
//! sessions on distinct connections can run fully concurrently. The engine
//! performs blocking I/O on the invoking thread and holds no logging state;
//! callers log if they choose.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use rand::Rng;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::cryptography::{
    bundle_message, decrypt_and_verify, encrypt_and_sign, generate_session_key, open, seal,
    split_bundle_message,
};
use crate::error::{Error, Result};
use crate::framing::{read_exact_or_short, read_frame, write_frame, BufferPool};
use crate::{CHUNK_SIZE, KEY_SIZE, NONCE_SIZE};

/// Wire prefix preceding each chunk ciphertext: 12-byte nonce plus the
/// big-endian 16-bit chunk index.
pub const CHUNK_PREFIX_SIZE: usize = NONCE_SIZE + 2;

/// `ceil(file_size / chunk_size)`, bounded by the 16-bit chunk index.
pub fn chunk_count(file_size: u64, chunk_size: u64) -> Result<u16> {
    let count = file_size.div_ceil(chunk_size);
    u16::try_from(count).map_err(|_| Error::FileTooLarge(file_size))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Created,
    KeySent,
    NameSent,
    Streaming,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    Created,
    KeyReceived,
    NameReceived,
    Streaming,
    Completed,
    Failed,
}

/// Encrypt-side session for one outgoing file.
///
/// Created per file: opens the source, generates a fresh random session key,
/// and computes the chunk count up front. Driven through one [`encrypt`]
/// call, then dropped (which closes the source handle).
///
/// [`encrypt`]: SendSession::encrypt
pub struct SendSession {
    key: [u8; KEY_SIZE],
    source: File,
    file_name: String,
    file_size: u64,
    chunk_size: usize,
    total_chunks: u16,
    read_offset: u64,
    next_index: u16,
    state: SendState,
}

impl SendSession {
    pub fn new(path: &Path) -> Result<SendSession> {
        SendSession::with_chunk_size(path, CHUNK_SIZE)
    }

    /// Like [`SendSession::new`] with a caller-chosen chunk size. Both peers
    /// are agnostic to the size actually used: the receiver only counts
    /// chunks.
    pub fn with_chunk_size(path: &Path, chunk_size: usize) -> Result<SendSession> {
        debug_assert!(chunk_size > 0);
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::BadFileName(path.display().to_string()))?
            .to_string();

        let source = File::open(path)?;
        let file_size = source.metadata()?.len();
        let total_chunks = chunk_count(file_size, chunk_size as u64)?;

        Ok(SendSession {
            key: generate_session_key(),
            source,
            file_name,
            file_size,
            chunk_size,
            total_chunks,
            read_offset: 0,
            next_index: 0,
            state: SendState::Created,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn total_chunks(&self) -> u16 {
        self.total_chunks
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    /// Drive the full encrypt protocol: key bundle, sealed file name, then
    /// every chunk in order. Any error aborts immediately; bytes already on
    /// the wire are not retracted - the receiver discards an incomplete
    /// transfer on its side.
    pub fn encrypt<W: Write>(
        &mut self,
        stream: &mut W,
        receiver_public: &RsaPublicKey,
        sender_private: &RsaPrivateKey,
        pool: &BufferPool,
    ) -> Result<()> {
        match self.drive(stream, receiver_public, sender_private, pool) {
            Ok(()) => {
                self.state = SendState::Done;
                Ok(())
            }
            Err(e) => {
                self.state = SendState::Failed;
                Err(e)
            }
        }
    }

    fn drive<W: Write>(
        &mut self,
        stream: &mut W,
        receiver_public: &RsaPublicKey,
        sender_private: &RsaPrivateKey,
        pool: &BufferPool,
    ) -> Result<()> {
        let message = bundle_message(&self.key, self.total_chunks);
        let (ciphertext, signature) = encrypt_and_sign(&message, receiver_public, sender_private)?;
        write_frame(stream, &ciphertext, 0)?;
        write_frame(stream, &signature, 0)?;
        self.state = SendState::KeySent;

        let (name_nonce, sealed_name) = seal(&self.key, self.file_name.as_bytes())?;
        write_frame(stream, &name_nonce, 0)?;
        write_frame(stream, &sealed_name, 0)?;
        self.state = SendState::NameSent;

        self.state = SendState::Streaming;
        let mut buffer = pool.checkout(self.chunk_size)?;
        while self.read_offset < self.file_size {
            let remaining = self.file_size - self.read_offset;
            let want = remaining.min(self.chunk_size as u64) as usize;

            // the source must not shrink mid-transfer
            let chunk = &mut buffer[..want];
            read_exact_or_short(&mut self.source, chunk)?;

            let (nonce, ciphertext) = seal(&self.key, chunk)?;
            let mut prefix = [0u8; CHUNK_PREFIX_SIZE];
            prefix[..NONCE_SIZE].copy_from_slice(&nonce);
            prefix[NONCE_SIZE..].copy_from_slice(&self.next_index.to_be_bytes());
            write_frame(stream, &prefix, 0)?;
            write_frame(stream, &ciphertext, 0)?;

            self.read_offset += want as u64;
            self.next_index += 1;
        }
        stream.flush()?;
        Ok(())
    }
}

/// What a completed decrypt session produced.
#[derive(Debug)]
pub struct ReceivedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
}

/// Decrypt-side session for one incoming transfer.
///
/// Created fresh per transfer: stages into a uniquely named temp file, is
/// populated by the key bundle and then by chunks, and renames into the
/// download directory only when every declared chunk has been accepted. On
/// any failure the partial temp file is deleted - no partial file is ever
/// left under a final name.
pub struct ReceiveSession {
    temp_path: PathBuf,
    sink: Option<BufWriter<File>>,
    key: Option<[u8; KEY_SIZE]>,
    file_name: Option<String>,
    total_chunks: u16,
    write_offset: u64,
    next_index: u16,
    state: ReceiveState,
}

impl ReceiveSession {
    /// Ensure the staging directory exists and create the temp file in it.
    pub fn new(staging_dir: &Path) -> Result<ReceiveSession> {
        fs::create_dir_all(staging_dir)?;
        let temp_path = staging_dir.join(format!(
            ".partial-{}-{:016x}",
            std::process::id(),
            rand::thread_rng().gen::<u64>()
        ));
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)?;
        Ok(ReceiveSession {
            temp_path,
            sink: Some(BufWriter::new(file)),
            key: None,
            file_name: None,
            total_chunks: 0,
            write_offset: 0,
            next_index: 0,
            state: ReceiveState::Created,
        })
    }

    /// Declared chunk count; meaningful once the key bundle is in.
    pub fn total_chunks(&self) -> u16 {
        self.total_chunks
    }

    pub fn state(&self) -> ReceiveState {
        self.state
    }

    /// Drive the full decrypt protocol and rename the staged file into
    /// `download_dir` under the decrypted name. On error the temp file is
    /// removed; if that removal itself fails, both errors surface together.
    pub fn decrypt<R: Read>(
        &mut self,
        stream: &mut R,
        sender_public: &RsaPublicKey,
        receiver_private: &RsaPrivateKey,
        download_dir: &Path,
    ) -> Result<ReceivedFile> {
        match self.drive(stream, sender_public, receiver_private, download_dir) {
            Ok(received) => {
                self.state = ReceiveState::Completed;
                Ok(received)
            }
            Err(e) => {
                self.state = ReceiveState::Failed;
                Err(self.discard(e))
            }
        }
    }

    fn drive<R: Read>(
        &mut self,
        stream: &mut R,
        sender_public: &RsaPublicKey,
        receiver_private: &RsaPrivateKey,
        download_dir: &Path,
    ) -> Result<ReceivedFile> {
        let ciphertext = read_frame(stream)?.into_payload()?;
        let signature = read_frame(stream)?.into_payload()?;
        let message = decrypt_and_verify(&ciphertext, &signature, sender_public, receiver_private)?;
        let (key, total_chunks) = split_bundle_message(&message)?;
        self.key = Some(key);
        self.total_chunks = total_chunks;
        self.state = ReceiveState::KeyReceived;

        let name_nonce = read_frame(stream)?.into_payload()?;
        let name_nonce: [u8; NONCE_SIZE] = name_nonce
            .as_slice()
            .try_into()
            .map_err(|_| Error::Protocol("file-name nonce frame must be 12 bytes".into()))?;
        let sealed_name = read_frame(stream)?.into_payload()?;
        let file_name = decode_file_name(open(&key, &name_nonce, &sealed_name)?)?;
        self.file_name = Some(file_name.clone());
        self.state = ReceiveState::NameReceived;

        self.state = ReceiveState::Streaming;
        let mut accepted: u16 = 0;
        while accepted < self.total_chunks {
            let prefix = chunk_frame(stream)?;
            if prefix.len() != CHUNK_PREFIX_SIZE {
                return Err(Error::Protocol(format!(
                    "chunk prefix frame must be {CHUNK_PREFIX_SIZE} bytes, got {}",
                    prefix.len()
                )));
            }
            let mut nonce = [0u8; NONCE_SIZE];
            nonce.copy_from_slice(&prefix[..NONCE_SIZE]);
            let got = u16::from_be_bytes([prefix[NONCE_SIZE], prefix[NONCE_SIZE + 1]]);

            let ciphertext = chunk_frame(stream)?;
            let plaintext = open(&key, &nonce, &ciphertext)?;

            // chunks are never buffered or reordered here; any reordering
            // introduced below this layer must be caught now
            if got != self.next_index {
                return Err(Error::ChunkOutOfOrder {
                    expected: self.next_index,
                    got,
                });
            }

            self.sink_mut()?.write_all(&plaintext)?;
            self.write_offset += plaintext.len() as u64;
            self.next_index += 1;
            accepted += 1;
        }

        if let Some(sink) = self.sink.take() {
            sink.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        }
        let final_path = download_dir.join(&file_name);
        fs::rename(&self.temp_path, &final_path)?;

        Ok(ReceivedFile {
            path: final_path,
            file_name,
            size: self.write_offset,
        })
    }

    fn sink_mut(&mut self) -> Result<&mut BufWriter<File>> {
        self.sink
            .as_mut()
            .ok_or_else(|| Error::Protocol("decrypt session already finished".into()))
    }

    /// Best-effort temp-file removal after a failed transfer. A cleanup
    /// failure is surfaced together with the transfer error, never dropped.
    fn discard(&mut self, transfer: Error) -> Error {
        self.sink.take();
        match fs::remove_file(&self.temp_path) {
            Ok(()) => transfer,
            Err(e) if e.kind() == io::ErrorKind::NotFound => transfer,
            Err(cleanup) => Error::CleanupFailed {
                transfer: Box::new(transfer),
                cleanup,
            },
        }
    }
}

/// Frame read inside the chunk loop: a stream that ends here means the
/// sender stopped before the declared count.
fn chunk_frame<R: Read>(stream: &mut R) -> Result<Vec<u8>> {
    match read_frame(stream) {
        Ok(frame) => frame.into_payload(),
        Err(Error::ShortRead) => Err(Error::IncompleteFile),
        Err(e) => Err(e),
    }
}

fn decode_file_name(bytes: Vec<u8>) -> Result<String> {
    let name = String::from_utf8(bytes)
        .map_err(|_| Error::BadFileName("file name is not valid UTF-8".into()))?;
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::BadFileName(name));
    }
    Ok(name)
}
