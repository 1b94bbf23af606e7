//! Session configuration.
//!
//! [`Options`] gathers everything a session needs that is not derived from
//! the URL: the outbound fragmentation threshold, the auto-pong switch and
//! the entropy source used for handshake keys and masking keys. Entropy is
//! injected explicitly rather than drawn from hidden process-wide state, so
//! tests can substitute a fixed source and observe deterministic keys.

use std::{fmt, sync::Arc};

use rand::RngCore;

use crate::{Result, WebSocketError};

/// Default limit for a single outbound frame's payload (16 KiB); payloads
/// above it are fragmented.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024;

/// Hard upper bound for [`Options::set_max_frame_size`] (1 MiB).
pub const MAX_ALLOWED_FRAME_SIZE: usize = 1024 * 1024;

/// Source of random bytes for handshake keys and masking keys.
pub trait EntropySource: Send + Sync {
    /// Fills `buf` with random bytes.
    fn fill(&self, buf: &mut [u8]);
}

/// The default entropy source, backed by the thread-local rand generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandEntropy;

impl EntropySource for RandEntropy {
    fn fill(&self, buf: &mut [u8]) {
        rand::thread_rng().fill_bytes(buf);
    }
}

/// Configuration for a client session and its connection.
#[derive(Clone)]
pub struct Options {
    max_frame_size: usize,
    /// Reply to incoming pings with an identical-payload pong automatically.
    pub auto_pong: bool,
    pub(crate) entropy: Arc<dyn EntropySource>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            auto_pong: true,
            entropy: Arc::new(RandEntropy),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("max_frame_size", &self.max_frame_size)
            .field("auto_pong", &self.auto_pong)
            .finish_non_exhaustive()
    }
}

impl Options {
    /// The current outbound frame payload limit.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Sets the outbound frame payload limit. Values outside
    /// `1..=MAX_ALLOWED_FRAME_SIZE` are rejected.
    pub fn set_max_frame_size(&mut self, size: usize) -> Result<()> {
        if size == 0 || size > MAX_ALLOWED_FRAME_SIZE {
            return Err(WebSocketError::FrameSizeOutOfRange {
                given: size,
                max: MAX_ALLOWED_FRAME_SIZE,
            });
        }
        self.max_frame_size = size;
        Ok(())
    }

    /// Builder form of [`Options::set_max_frame_size`].
    pub fn with_max_frame_size(mut self, size: usize) -> Result<Self> {
        self.set_max_frame_size(size)?;
        Ok(self)
    }

    /// Disables or enables automatic pong replies.
    pub fn with_auto_pong(mut self, auto_pong: bool) -> Self {
        self.auto_pong = auto_pong;
        self
    }

    /// Substitutes the entropy source.
    pub fn with_entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }

    /// Draws a fresh 4-byte masking key.
    pub(crate) fn masking_key(&self) -> [u8; 4] {
        let mut key = [0u8; 4];
        self.entropy.fill(&mut key);
        key
    }
}
