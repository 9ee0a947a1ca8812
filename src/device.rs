//! Hardware signing device
//!
//! The signing module speaks a simple command/response protocol: a two-byte
//! ASCII command prefix followed by raw parameters, answered with whatever
//! bytes the device has buffered once it settles. An all-zero (or empty)
//! answer means the device faulted.
//!
//! | Prefix | Command                | Parameters                           |
//! |--------|------------------------|--------------------------------------|
//! | `NK`   | generate key pair      | key id                               |
//! | `RP`   | read public key        | key id                               |
//! | `DP`   | decompress public key  | compressed key                       |
//! | `SH`   | sign hash              | key id, hex digest text              |
//! | `VS`   | verify signature       | public key, signature, hex digest    |
//! | `OR`   | output random bytes    | -                                    |
//! | `BR`   | set random mode        | mode byte (`0x59` pseudo, else true) |
//! | `ON`   | set random output size | true count, pseudo count (i32 BE)    |
//! | `DK`   | delete key pair        | key id                               |
//!
//! The physical transport stays outside this crate; anything implementing
//! [`CommandChannel`] can carry the frames.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::DeviceError;
use crate::signing::{check_key_id, SignatureService};

/// Byte answered by `VS` for a valid signature.
pub const VERIFY_OK: u8 = 0x01;
/// Byte answered by `VS` for an invalid signature.
pub const VERIFY_FAIL: u8 = 0x02;

/// Mode byte selecting the pseudo-random generator.
const PSEUDO_RANDOM_MODE: u8 = 0x59;

/// Default time given to the device to produce its answer.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(100);

const RESPONSE_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandomMode {
    Pseudo,
    True,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GenerateKeyPair(u8),
    ReadPublicKey(u8),
    DecompressPublicKey(Vec<u8>),
    SignHash {
        key_id: u8,
        hash: Vec<u8>,
    },
    VerifySignature {
        public_key: Vec<u8>,
        signature: Vec<u8>,
        hash: Vec<u8>,
    },
    OutputRandom,
    SetRandomMode(RandomMode),
    SetRandomCount {
        true_count: i32,
        pseudo_count: i32,
    },
    DeleteKeyPair(u8),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GenerateKeyPair(_) => "NK",
            Self::ReadPublicKey(_) => "RP",
            Self::DecompressPublicKey(_) => "DP",
            Self::SignHash { .. } => "SH",
            Self::VerifySignature { .. } => "VS",
            Self::OutputRandom => "OR",
            Self::SetRandomMode(_) => "BR",
            Self::SetRandomCount { .. } => "ON",
            Self::DeleteKeyPair(_) => "DK",
        }
    }

    /// Encode into a wire frame. Key ids above 127 are refused before
    /// anything reaches the device.
    pub fn encode(&self) -> Result<Vec<u8>, DeviceError> {
        let mut frame = self.name().as_bytes().to_vec();
        match self {
            Self::GenerateKeyPair(key_id)
            | Self::ReadPublicKey(key_id)
            | Self::DeleteKeyPair(key_id) => {
                check_key_id(*key_id)?;
                frame.push(*key_id);
            }
            Self::DecompressPublicKey(key) => frame.extend_from_slice(key),
            Self::SignHash { key_id, hash } => {
                check_key_id(*key_id)?;
                frame.push(*key_id);
                frame.extend_from_slice(hex::encode(hash).as_bytes());
            }
            Self::VerifySignature {
                public_key,
                signature,
                hash,
            } => {
                frame.extend_from_slice(public_key);
                frame.extend_from_slice(signature);
                frame.extend_from_slice(hex::encode(hash).as_bytes());
            }
            Self::OutputRandom => {}
            Self::SetRandomMode(mode) => frame.push(match mode {
                RandomMode::Pseudo => PSEUDO_RANDOM_MODE,
                RandomMode::True => 0x01,
            }),
            Self::SetRandomCount {
                true_count,
                pseudo_count,
            } => {
                frame.extend_from_slice(&true_count.to_be_bytes());
                frame.extend_from_slice(&pseudo_count.to_be_bytes());
            }
        }
        Ok(frame)
    }
}

/// Carries one frame to the device and returns its raw answer.
pub trait CommandChannel: Send {
    fn exchange(&mut self, frame: &[u8]) -> std::io::Result<Vec<u8>>;
}

/// Channel over any byte stream (serial device node, socket, pipe).
/// Writes the frame, waits `settle`, then reads what the device produced.
pub struct StreamChannel<S> {
    stream: S,
    settle: Duration,
}

impl<S: Read + Write + Send> StreamChannel<S> {
    pub fn new(stream: S) -> Self {
        Self::with_settle(stream, DEFAULT_SETTLE)
    }

    pub fn with_settle(stream: S, settle: Duration) -> Self {
        Self { stream, settle }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write + Send> CommandChannel for StreamChannel<S> {
    fn exchange(&mut self, frame: &[u8]) -> std::io::Result<Vec<u8>> {
        self.stream.write_all(frame)?;
        self.stream.flush()?;
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
        let mut buf = vec![0u8; RESPONSE_BUFFER];
        let n = self.stream.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }
}

/// Signing device driven over a [`CommandChannel`].
pub struct HardwareSigner<C> {
    channel: Mutex<C>,
}

impl<C: CommandChannel> HardwareSigner<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel: Mutex::new(channel),
        }
    }

    /// Send `command` and return the device's answer, rejecting faults.
    pub fn send(&self, command: &Command) -> Result<Vec<u8>, DeviceError> {
        let frame = command.encode()?;
        debug!("Sent command: {}", hex::encode(&frame));
        let response = self
            .channel
            .lock()
            .exchange(&frame)
            .map_err(|e| match e.kind() {
                ErrorKind::TimedOut | ErrorKind::WouldBlock => DeviceError::Timeout {
                    command: command.name(),
                },
                _ => DeviceError::Io(e),
            })?;

        if response.iter().all(|b| *b == 0) {
            warn!("Device fault: {} answered with all zeros", command.name());
            return Err(DeviceError::ZeroResponse {
                command: command.name(),
            });
        }
        debug!("Received response: {}", hex::encode(&response));
        Ok(response)
    }

    pub fn generate_key_pair(&self, key_id: u8) -> Result<Vec<u8>, DeviceError> {
        self.send(&Command::GenerateKeyPair(key_id))
    }

    pub fn read_public_key(&self, key_id: u8) -> Result<Vec<u8>, DeviceError> {
        self.send(&Command::ReadPublicKey(key_id))
    }

    pub fn decompress_public_key(&self, compressed: &[u8]) -> Result<Vec<u8>, DeviceError> {
        self.send(&Command::DecompressPublicKey(compressed.to_vec()))
    }

    pub fn random_bytes(&self) -> Result<Vec<u8>, DeviceError> {
        self.send(&Command::OutputRandom)
    }

    pub fn set_random_mode(&self, mode: RandomMode) -> Result<Vec<u8>, DeviceError> {
        self.send(&Command::SetRandomMode(mode))
    }

    pub fn set_random_count(&self, true_count: i32, pseudo_count: i32) -> Result<Vec<u8>, DeviceError> {
        self.send(&Command::SetRandomCount {
            true_count,
            pseudo_count,
        })
    }

    pub fn delete_key_pair(&self, key_id: u8) -> Result<Vec<u8>, DeviceError> {
        self.send(&Command::DeleteKeyPair(key_id))
    }
}

impl<C: CommandChannel> SignatureService for HardwareSigner<C> {
    fn sign(&self, key_id: u8, hash: &[u8]) -> Result<Vec<u8>, DeviceError> {
        self.send(&Command::SignHash {
            key_id,
            hash: hash.to_vec(),
        })
    }

    fn verify(&self, public_key: &[u8], signature: &[u8], hash: &[u8]) -> Result<bool, DeviceError> {
        let command = Command::VerifySignature {
            public_key: public_key.to_vec(),
            signature: signature.to_vec(),
            hash: hash.to_vec(),
        };
        let response = self.send(&command)?;
        match response.first() {
            Some(&VERIFY_OK) => Ok(true),
            Some(&VERIFY_FAIL) => Ok(false),
            other => Err(DeviceError::Malformed {
                command: command.name(),
                reason: format!("unexpected verdict byte {:?}", other),
            }),
        }
    }
}
