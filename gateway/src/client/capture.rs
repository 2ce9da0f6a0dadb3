//! Microphone capture boundary.
//!
//! The capture callback runs on a real-time audio thread. It shares nothing
//! with the control side except the sending half of a bounded channel, and it
//! never waits on it: when the channel is full the block is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::core::pcm::encode_pcm16;

/// Receiving half of the capture channel: one PCM16 LE block per message.
pub type CaptureReceiver = mpsc::Receiver<Bytes>;

/// Converts captured blocks to PCM16 and posts them to the control side.
#[derive(Debug, Clone)]
pub struct CaptureProcessor {
    port: mpsc::Sender<Bytes>,
    dropped: Arc<AtomicU64>,
}

/// Create a capture processor and the receiver it posts to.
pub fn capture_channel(capacity: usize) -> (CaptureProcessor, CaptureReceiver) {
    let (port, rx) = mpsc::channel(capacity.max(1));
    (
        CaptureProcessor {
            port,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

impl CaptureProcessor {
    /// Process one block of samples in [-1, 1]. Never blocks.
    ///
    /// Returns `false` if the block was dropped.
    pub fn process(&self, block: &[f32]) -> bool {
        if block.is_empty() {
            return true;
        }

        match self.port.try_send(encode_pcm16(block)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(dropped, "Capture channel full, dropping block");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 {
                    warn!("Capture channel closed, discarding audio");
                }
                false
            }
        }
    }

    /// Blocks dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.port.is_closed()
    }
}
