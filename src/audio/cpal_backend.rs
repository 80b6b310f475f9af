// src/audio/cpal_backend.rs  —  cpal sidetone sink (f32 sine synthesis)
//
// The sink side only flips three atomic control words (key state,
// frequency, volume); oscillator phase and the anti-click envelope live
// inside the audio callback itself, so the render path never takes a lock.
// Only f32 output streams are accepted: the sine is synthesised in f32,
// and when the device offers no such stream, construction fails and the
// factory falls back to NullSink.

use super::SoundSink;
use crate::tone_queue::Tone;
use anyhow::anyhow;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Attack/decay ramp length. Short enough to keep keying crisp, long
/// enough to round off the edges.
const RAMP_SECONDS: f32 = 0.004;

struct Controls {
    key_down:     AtomicBool,
    frequency_hz: AtomicU32,
    volume_pct:   AtomicU32,
}

pub struct CpalSink {
    controls: Arc<Controls>,
    _stream:  Stream,
}

// Stream is !Send on some platforms; the sink itself only touches atomics
unsafe impl Send for CpalSink {}

impl CpalSink {
    pub fn new() -> anyhow::Result<Self> {
        let host   = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no output device"))?;

        let supported = device
            .supported_output_configs()?
            .find(|range| range.sample_format() == SampleFormat::F32)
            .ok_or_else(|| anyhow!("no f32 output stream available"))?
            .with_max_sample_rate();
        let config      = supported.config();
        let sample_rate = config.sample_rate.0 as f32;
        let channels    = config.channels as usize;

        let controls = Arc::new(Controls {
            key_down:     AtomicBool::new(false),
            frequency_hz: AtomicU32::new(0),
            volume_pct:   AtomicU32::new(0),
        });

        let ctl       = Arc::clone(&controls);
        let ramp_step = 1.0 / (sample_rate * RAMP_SECONDS).max(1.0);
        let mut phase = 0.0f32;
        let mut level = 0.0f32;

        let stream = device.build_output_stream(
            &config,
            move |frames: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let step   = ctl.frequency_hz.load(Ordering::Relaxed) as f32 / sample_rate;
                let target = if ctl.key_down.load(Ordering::Relaxed) {
                    ctl.volume_pct.load(Ordering::Relaxed) as f32 / 100.0
                } else {
                    0.0
                };
                for frame in frames.chunks_mut(channels) {
                    // linear ramp toward the keyed level; avoids key clicks
                    level += (target - level).clamp(-ramp_step, ramp_step);
                    let sample = if level > 0.0 {
                        let s = (phase * std::f32::consts::TAU).sin() * level;
                        phase = (phase + step).fract();
                        s
                    } else {
                        // restart each mark at a zero crossing
                        phase = 0.0;
                        0.0
                    };
                    frame.fill(sample);
                }
            },
            |e| log::error!("[audio] stream error: {e}"),
            None,
        )?;
        stream.play()?;

        Ok(Self { controls, _stream: stream })
    }
}

impl SoundSink for CpalSink {
    fn play(&mut self, tone: &Tone, volume: u32) -> crate::error::Result<()> {
        self.controls.volume_pct.store(volume, Ordering::Relaxed);
        self.controls.frequency_hz.store(tone.frequency_hz, Ordering::Relaxed);
        self.controls.key_down.store(!tone.is_silent(), Ordering::Relaxed);
        std::thread::sleep(Duration::from_micros(tone.duration_us as u64));
        Ok(())
    }

    fn cut(&mut self) -> crate::error::Result<()> {
        self.controls.key_down.store(false, Ordering::Relaxed);
        Ok(())
    }
}
