// ─────────────────────────────────────────────────────────────────────────────
//  pad-flasher :: verify  —  post-programming image check
//
//  The check itself is pluggable.  `DigestVerifier` asks the target for a
//  digest of what it stored and compares it with the local image:
//
//    request   7E 'V' <algo> <len: u32 LE>
//    response  <digest>                      (32 bytes sha256, 4 bytes djb2 LE)
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::firmware::FirmwareImage;
use crate::transport::{Transport, SYNC_MARKER};

/// Checks that a device holds the image that was just written.
pub trait Verifier: Send + Sync {
    fn verify(&self, link: &mut dyn Transport, image: &FirmwareImage) -> bool;

    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> Verifier for F
where
    F: Fn(&mut dyn Transport, &FirmwareImage) -> bool + Send + Sync,
{
    fn verify(&self, link: &mut dyn Transport, image: &FirmwareImage) -> bool {
        self(link, image)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Checksum {
    #[default]
    Sha256,
    Djb2,
}

impl Checksum {
    fn code(self) -> u8 {
        match self {
            Checksum::Sha256 => 0x01,
            Checksum::Djb2   => 0x02,
        }
    }

    pub fn digest_len(self) -> usize {
        match self {
            Checksum::Sha256 => 32,
            Checksum::Djb2   => 4,
        }
    }

    pub fn digest(self, image: &FirmwareImage) -> Vec<u8> {
        match self {
            Checksum::Sha256 => image.sha256().to_vec(),
            Checksum::Djb2   => image.djb2().to_le_bytes().to_vec(),
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Checksum::Sha256 => "sha256",
            Checksum::Djb2   => "djb2",
        })
    }
}

impl std::str::FromStr for Checksum {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Checksum::Sha256),
            "djb2"   => Ok(Checksum::Djb2),
            other    => Err(format!("unknown checksum '{}' (expected sha256 or djb2)", other)),
        }
    }
}

/// Build the digest request frame for `image`.
pub fn digest_request(algo: Checksum, image: &FirmwareImage) -> Vec<u8> {
    let mut frame = vec![SYNC_MARKER, b'V', algo.code()];
    frame.extend_from_slice(&(image.len() as u32).to_le_bytes());
    frame
}

#[derive(Debug, Clone)]
pub struct DigestVerifier {
    pub algo:    Checksum,
    /// How long to wait for the full digest to arrive.
    pub timeout: Duration,
}

impl DigestVerifier {
    pub fn new(algo: Checksum) -> Self {
        Self { algo, timeout: Duration::from_secs(2) }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Verifier for DigestVerifier {
    fn verify(&self, link: &mut dyn Transport, image: &FirmwareImage) -> bool {
        let expected = self.algo.digest(image);

        let reply = link.send(&digest_request(self.algo, image))
            .and_then(|()| receive_exact(link, expected.len(), self.timeout));

        match reply {
            Ok(got) if got == expected => true,
            Ok(got) if got.len() < expected.len() => {
                log::warn!("{} digest: device sent {} of {} bytes", self.algo, got.len(), expected.len());
                false
            }
            Ok(got) => {
                log::warn!(
                    "{} digest mismatch: expected {}, device reported {}",
                    self.algo, hex::encode(&expected), hex::encode(&got)
                );
                false
            }
            Err(e) => {
                log::warn!("{} digest request failed: {}", self.algo, e);
                false
            }
        }
    }

    fn name(&self) -> &str {
        match self.algo {
            Checksum::Sha256 => "sha256",
            Checksum::Djb2   => "djb2",
        }
    }
}

/// Pause after a read that returned no bytes.
pub const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(5);

/// Keep reading until `len` bytes arrived or `timeout` elapsed.  May return
/// fewer bytes than asked for.
pub fn receive_exact(link: &mut dyn Transport, len: usize, timeout: Duration) -> Result<Vec<u8>, LinkError> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::with_capacity(len);

    while out.len() < len {
        let chunk = link.receive(len - out.len())?;
        if chunk.is_empty() {
            if Instant::now() >= deadline {
                break;
            }
            // links that return at once with nothing (EOF on a node) would spin
            std::thread::sleep(EMPTY_READ_BACKOFF);
            continue;
        }
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}
