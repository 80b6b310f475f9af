// src/generator.rs  —  tone dequeue thread: queue → key notifications → sink
//
// One background thread per generator. It blocks on the tone queue, and for
// every dequeued tone, in order: re-sync parameters if a setter ran,
// mirror the tone polarity into the key's tone-queue sub-machine, advance
// the iambic timer and graph, then hand the tone to the sound sink (whose
// blocking play paces the whole loop).

use crate::audio::SoundSink;
use crate::error::Result;
use crate::key::{KeyInner, KeyValue};
use crate::params::{self, Durations, Params};
use crate::tone_queue::{Dequeued, Tone, ToneQueue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};

/// Partial symbols the keyer asks the generator to sound. "Partial" means
/// without the trailing end-of-element space: the space is enqueued as its
/// own `Space` by the next keyer transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    Dot,
    Dash,
    Space,
}

pub struct Generator {
    inner:  Arc<GenInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct GenInner {
    tq:           ToneQueue,
    params:       Mutex<Params>,
    durations:    Mutex<Durations>,
    params_dirty: AtomicBool,
    key:          Mutex<Weak<KeyInner>>,
    sink:         Mutex<Box<dyn SoundSink>>,
}

impl Generator {
    pub fn new(sink: Box<dyn SoundSink>) -> Arc<Self> {
        let params = Params::default();
        Arc::new(Self {
            inner: Arc::new(GenInner {
                tq:           ToneQueue::new(),
                durations:    Mutex::new(Durations::derive(&params)),
                params:       Mutex::new(params),
                params_dirty: AtomicBool::new(false),
                key:          Mutex::new(Weak::new()),
                sink:         Mutex::new(sink),
            }),
            thread: Mutex::new(None),
        })
    }

    /// Best available audio backend, falling back to the silent sink.
    pub fn with_default_sink() -> Arc<Self> {
        Self::new(crate::audio::create_sink())
    }

    /// Spawn the dequeue thread. A second call is a no-op.
    pub fn start(&self) {
        let mut th = self.thread.lock().unwrap();
        if th.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *th = Some(thread::spawn(move || inner.run()));
    }

    /// Stop the dequeue thread and join it. Queued tones are abandoned.
    pub fn stop(&self) {
        self.inner.tq.stop();
        if let Some(h) = self.thread.lock().unwrap().take() {
            let _ = h.join();
        }
        let _ = self.inner.sink.lock().unwrap().cut();
    }

    // ── Key binding ──────────────────────────────────────────────────────────

    pub(crate) fn bind_key(&self, key: Weak<KeyInner>) {
        *self.inner.key.lock().unwrap() = key;
    }

    pub(crate) fn unbind_key(&self) {
        *self.inner.key.lock().unwrap() = Weak::new();
    }

    pub(crate) fn tq(&self) -> &ToneQueue {
        &self.inner.tq
    }

    // ── Parameters ───────────────────────────────────────────────────────────

    pub fn set_send_speed(&self, wpm: u32) -> Result<()> {
        self.set(|p| &mut p.send_speed, params::check("send speed", wpm, params::SPEED_MIN, params::SPEED_MAX)?)
    }

    pub fn send_speed(&self) -> u32 {
        self.inner.params.lock().unwrap().send_speed
    }

    pub fn set_frequency(&self, hz: u32) -> Result<()> {
        self.set(|p| &mut p.frequency, params::check("frequency", hz, params::FREQUENCY_MIN, params::FREQUENCY_MAX)?)
    }

    pub fn frequency(&self) -> u32 {
        self.inner.params.lock().unwrap().frequency
    }

    pub fn set_volume(&self, pct: u32) -> Result<()> {
        self.set(|p| &mut p.volume, params::check("volume", pct, params::VOLUME_MIN, params::VOLUME_MAX)?)
    }

    pub fn volume(&self) -> u32 {
        self.inner.params.lock().unwrap().volume
    }

    pub fn set_gap(&self, dots: u32) -> Result<()> {
        self.set(|p| &mut p.gap, params::check("gap", dots, params::GAP_MIN, params::GAP_MAX)?)
    }

    pub fn gap(&self) -> u32 {
        self.inner.params.lock().unwrap().gap
    }

    pub fn set_tolerance(&self, pct: u32) -> Result<()> {
        self.set(|p| &mut p.tolerance, params::check("tolerance", pct, params::TOLERANCE_MIN, params::TOLERANCE_MAX)?)
    }

    pub fn tolerance(&self) -> u32 {
        self.inner.params.lock().unwrap().tolerance
    }

    pub fn set_weighting(&self, pct: u32) -> Result<()> {
        self.set(|p| &mut p.weighting, params::check("weighting", pct, params::WEIGHTING_MIN, params::WEIGHTING_MAX)?)
    }

    pub fn weighting(&self) -> u32 {
        self.inner.params.lock().unwrap().weighting
    }

    fn set(&self, field: impl FnOnce(&mut Params) -> &mut u32, value: u32) -> Result<()> {
        let mut p = self.inner.params.lock().unwrap();
        *field(&mut *p) = value;
        drop(p);
        self.inner.params_dirty.store(true, Ordering::Release);
        Ok(())
    }

    /// Recompute derived durations from the current parameters now, instead
    /// of waiting for the dequeue thread to do it.
    pub fn sync_parameters(&self) {
        self.inner.sync_parameters();
    }

    /// Current derived durations (synced first).
    pub fn durations(&self) -> Durations {
        self.inner.sync_parameters_if_dirty();
        *self.inner.durations.lock().unwrap()
    }

    // ── Enqueue surface ──────────────────────────────────────────────────────

    /// Start an open-ended mark at the configured frequency (straight key
    /// down). Sounds until replaced by a later entry.
    pub fn enqueue_begin_mark(&self) -> Result<()> {
        let hz = self.frequency();
        self.inner.tq.enqueue(Tone::forever(hz))
    }

    /// Start an open-ended silence (straight key up).
    pub fn enqueue_begin_space(&self) -> Result<()> {
        self.inner.tq.enqueue(Tone::forever(0))
    }

    /// Replace whatever is currently sounding with silence.
    pub fn silence(&self) -> Result<()> {
        self.enqueue_begin_space()
    }

    /// One symbol's worth of tone, without the trailing end-of-element
    /// space.
    pub fn enqueue_partial_symbol(&self, symbol: Symbol) -> Result<()> {
        let d = self.durations();
        let hz = self.frequency();
        let tone = match symbol {
            Symbol::Dot   => Tone::new(d.dot_us, hz),
            Symbol::Dash  => Tone::new(d.dash_us, hz),
            Symbol::Space => Tone::new(d.eoe_us, 0),
        };
        self.inner.tq.enqueue(tone)
    }

    /// Sound a dit/dah string (e.g. ".-.") with the end-of-element space
    /// after every mark. The character table that produces such strings is
    /// the caller's concern.
    pub fn enqueue_representation(&self, representation: &str) -> Result<()> {
        for element in representation.chars() {
            match element {
                '.' => self.enqueue_partial_symbol(Symbol::Dot)?,
                '-' => self.enqueue_partial_symbol(Symbol::Dash)?,
                _   => return Err(crate::error::Error::InvalidArgument("representation")),
            }
            self.enqueue_partial_symbol(Symbol::Space)?;
        }
        Ok(())
    }

    /// The space completing a 3-unit inter-character gap (plus the `gap`
    /// parameter's extra dots). Enqueue after a representation.
    pub fn enqueue_eoc_space(&self) -> Result<()> {
        let d = self.durations();
        self.inner.tq.enqueue(Tone::new(d.eoc_us + d.additional_us, 0))
    }

    /// The space completing a 7-unit inter-word gap.
    pub fn enqueue_eow_space(&self) -> Result<()> {
        let d = self.durations();
        self.inner.tq.enqueue(Tone::new(d.eow_us + d.adjustment_us, 0))
    }

    // ── Queue observation ────────────────────────────────────────────────────

    pub fn queue_len(&self) -> usize {
        self.inner.tq.len()
    }

    /// Block until one queued tone has been dequeued.
    pub fn wait_for_tone(&self) {
        self.inner.tq.wait_for_tone();
    }

    /// Block until the tone queue has drained.
    pub fn wait_for_tone_queue(&self) {
        self.inner.tq.wait_for_end();
    }

    /// Block until the queue length has dropped to `level` or below.
    pub fn wait_for_tone_queue_level(&self, level: usize) {
        self.inner.tq.wait_for_level(level);
    }

    /// Invoke `callback` whenever the queue length drops to `level` (used
    /// by clients that stream characters and want refill notifications).
    pub fn register_tone_queue_low_callback(
        &self,
        callback: impl FnMut() + Send + 'static,
        level: usize,
    ) {
        self.inner.tq.register_low_water_callback(Box::new(callback), level);
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl GenInner {
    fn run(self: Arc<Self>) {
        log::debug!("[gen] dequeue thread up");
        loop {
            match self.tq.dequeue() {
                Dequeued::Stopped => break,
                Dequeued::Idle => {
                    if let Some(key) = self.key() {
                        let _ = key.tk_set_value(KeyValue::Open);
                        key.ik_update_graph_with_retry();
                    }
                    let _ = self.sink.lock().unwrap().cut();
                }
                Dequeued::Tone(tone) => {
                    self.sync_parameters_if_dirty();
                    let value = if tone.is_silent() { KeyValue::Open } else { KeyValue::Closed };
                    if let Some(key) = self.key() {
                        let _ = key.tk_set_value(value);
                        key.ik_increment_timer(tone.duration_us);
                        key.ik_update_graph_with_retry();
                    }
                    let volume = self.params.lock().unwrap().volume;
                    if let Err(e) = self.sink.lock().unwrap().play(&tone, volume) {
                        log::warn!("[gen] sink error: {e}");
                    }
                }
            }
        }
        log::debug!("[gen] dequeue thread down");
    }

    /// `None` when no key is bound or the key has been dropped.
    fn key(&self) -> Option<Arc<KeyInner>> {
        self.key.lock().unwrap().upgrade()
    }

    fn sync_parameters_if_dirty(&self) {
        if self.params_dirty.swap(false, Ordering::Acquire) {
            self.sync_parameters();
        }
    }

    fn sync_parameters(&self) {
        let p = *self.params.lock().unwrap();
        let d = Durations::derive(&p);
        *self.durations.lock().unwrap() = d;
        log::debug!(
            "[gen] sync: {} wpm → dot {} us, dash {} us, eoe {} us",
            p.send_speed, d.dot_us, d.dash_us, d.eoe_us
        );
        if let Some(key) = self.key() {
            key.sync_receiver_parameters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullSink;
    use crate::error::Error;
    use crate::params::{SPEED_MAX, SPEED_MIN};

    fn gen() -> Arc<Generator> {
        Generator::new(Box::new(NullSink))
    }

    #[test]
    fn speed_roundtrip_across_the_whole_range() {
        let g = gen();
        for wpm in SPEED_MIN..=SPEED_MAX {
            g.set_send_speed(wpm).unwrap();
            assert_eq!(g.send_speed(), wpm);
        }
    }

    #[test]
    fn out_of_range_setters_fail_and_keep_the_old_value() {
        let g = gen();

        g.set_send_speed(20).unwrap();
        assert_eq!(g.set_send_speed(SPEED_MIN - 1), Err(Error::InvalidArgument("send speed")));
        assert_eq!(g.set_send_speed(SPEED_MAX + 1), Err(Error::InvalidArgument("send speed")));
        assert_eq!(g.send_speed(), 20);

        g.set_frequency(700).unwrap();
        assert!(g.set_frequency(4_001).is_err());
        assert_eq!(g.frequency(), 700);

        g.set_volume(45).unwrap();
        assert!(g.set_volume(101).is_err());
        assert_eq!(g.volume(), 45);

        g.set_gap(5).unwrap();
        assert!(g.set_gap(61).is_err());
        assert_eq!(g.gap(), 5);

        g.set_tolerance(40).unwrap();
        assert!(g.set_tolerance(91).is_err());
        assert_eq!(g.tolerance(), 40);

        g.set_weighting(30).unwrap();
        assert!(g.set_weighting(19).is_err());
        assert!(g.set_weighting(81).is_err());
        assert_eq!(g.weighting(), 30);
    }

    #[test]
    fn setters_resync_durations() {
        let g = gen();
        g.set_send_speed(12).unwrap();
        assert_eq!(g.durations().dot_us, 100_000);
        g.set_send_speed(60).unwrap();
        assert_eq!(g.durations().dot_us, 20_000);
        assert_eq!(g.durations().dash_us, 60_000);
    }

    #[test]
    fn partial_symbols_carry_derived_durations() {
        use crate::tone_queue::Dequeued;

        let g = gen();
        g.set_send_speed(12).unwrap();
        g.set_frequency(700).unwrap();

        g.enqueue_partial_symbol(Symbol::Dot).unwrap();
        g.enqueue_partial_symbol(Symbol::Space).unwrap();
        g.enqueue_partial_symbol(Symbol::Dash).unwrap();

        match g.tq().try_dequeue() {
            Some(Dequeued::Tone(t)) => {
                assert_eq!((t.duration_us, t.frequency_hz), (100_000, 700));
            }
            other => panic!("expected dot, got {other:?}"),
        }
        match g.tq().try_dequeue() {
            Some(Dequeued::Tone(t)) => {
                assert_eq!((t.duration_us, t.frequency_hz), (100_000, 0));
            }
            other => panic!("expected space, got {other:?}"),
        }
        match g.tq().try_dequeue() {
            Some(Dequeued::Tone(t)) => {
                assert_eq!((t.duration_us, t.frequency_hz), (300_000, 700));
            }
            other => panic!("expected dash, got {other:?}"),
        }
    }

    #[test]
    fn representation_expands_to_marks_and_spaces() {
        let g = gen();
        g.enqueue_representation(".-").unwrap();
        // dot, eoe, dash, eoe
        assert_eq!(g.queue_len(), 4);

        assert_eq!(
            g.enqueue_representation(".x"),
            Err(Error::InvalidArgument("representation"))
        );
    }
}
