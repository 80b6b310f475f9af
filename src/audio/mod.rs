// src/audio/mod.rs  —  SoundSink trait + backends
use crate::error::Result;
use crate::tone_queue::Tone;
use std::time::Duration;

/// Platform-agnostic tone rendering interface.
///
/// `play` blocks for the tone's duration; that blocking is the generator
/// thread's clock. Waveform mathematics stay behind this trait.
pub trait SoundSink: Send {
    /// Render one tone (silence when `tone.is_silent()`), blocking for
    /// `tone.duration_us`.
    fn play(&mut self, tone: &Tone, volume: u32) -> Result<()>;
    /// Immediately stop whatever is sounding.
    fn cut(&mut self) -> Result<()>;
}

/// Null backend (no sound — useful for testing / no-audio builds).
/// Sleeps through each tone so timing still feels real.
pub struct NullSink;

impl SoundSink for NullSink {
    fn play(&mut self, tone: &Tone, _volume: u32) -> Result<()> {
        std::thread::sleep(Duration::from_micros(tone.duration_us as u64));
        Ok(())
    }
    fn cut(&mut self) -> Result<()> {
        Ok(())
    }
}

// ── cpal backend ─────────────────────────────────────────────────────────────
#[cfg(feature = "audio-cpal")]
mod cpal_backend;
#[cfg(feature = "audio-cpal")]
pub use cpal_backend::CpalSink;

/// Factory: returns the best available backend
pub fn create_sink() -> Box<dyn SoundSink> {
    #[cfg(feature = "audio-cpal")]
    {
        match CpalSink::new() {
            Ok(s)  => return Box::new(s),
            Err(e) => log::warn!("cpal init failed: {e}  →  using NullSink"),
        }
    }
    Box::new(NullSink)
}
