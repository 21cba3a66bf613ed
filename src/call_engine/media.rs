//! Lokale Audio-Ressource eines Anrufs
//!
//! Der Controller kennt nur diese Traits. Die cpal-Implementierung liegt in
//! `audio.rs`, Tests verwenden eigene Doubles.

use async_trait::async_trait;
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// Mikrofon nicht verfügbar oder Zugriff verweigert
    #[error("Microphone access denied: {0}")]
    AccessDenied(String),

    #[error("Audio device error: {0}")]
    Device(String),
}

// ============================================================================
// AUDIO BUFFER
// ============================================================================

/// Geteilter Ring-Buffer für PCM-Samples (mono, f32)
///
/// Volle Buffer verwerfen neue Samples.
#[derive(Clone)]
pub struct AudioBuffer {
    inner: Arc<Mutex<HeapRb<f32>>>,
}

impl AudioBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HeapRb::new(capacity))),
        }
    }

    /// Schreibt Samples, gibt die Anzahl der übernommenen zurück
    pub fn push_slice(&self, samples: &[f32]) -> usize {
        let mut buffer = self.inner.lock();
        let mut written = 0;
        for sample in samples {
            if buffer.try_push(*sample).is_err() {
                break;
            }
            written += 1;
        }
        written
    }

    pub fn pop(&self) -> Option<f32> {
        self.inner.lock().try_pop()
    }

    /// Liest genau `frame_size` Samples oder nichts
    pub fn read_frame(&self, frame_size: usize) -> Option<Vec<f32>> {
        let mut buffer = self.inner.lock();
        if buffer.occupied_len() < frame_size {
            return None;
        }
        let mut frame = Vec::with_capacity(frame_size);
        for _ in 0..frame_size {
            if let Some(sample) = buffer.try_pop() {
                frame.push(sample);
            }
        }
        Some(frame)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AudioBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBuffer")
            .field("len", &self.len())
            .finish()
    }
}

/// Zugriff des Transports auf die Audio-Buffer einer Capture-Ressource
#[derive(Debug, Clone)]
pub struct MediaTap {
    /// Aufgenommenes Audio, wird vom Transport gelesen
    pub capture: AudioBuffer,
    /// Empfangenes Audio, wird vom Transport geschrieben
    pub playback: AudioBuffer,
}

// ============================================================================
// TRAITS
// ============================================================================

/// Eine aktive Audio-Capture-Ressource, exklusiv im Besitz der Session
pub trait MediaCapture: Send {
    /// Mute wirkt sofort auf alle aufgenommenen Tracks
    fn set_muted(&self, muted: bool);

    fn tap(&self) -> MediaTap;

    /// Audio-Levels (input, output) zwischen 0.0 und 1.0
    fn levels(&self) -> (f32, f32) {
        (0.0, 0.0)
    }

    /// Stoppt alle Streams; danach ist die Ressource freigegeben
    fn stop(&mut self);
}

/// Liefert Capture-Ressourcen
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn MediaCapture>, MediaError>;
}
