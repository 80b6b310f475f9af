// src/key/mod.rs  —  the Key: three sub-machines behind one handle
//
// A Key owns a straight-key machine (SK), an iambic machine (IK, in
// iambic.rs) and a tone-queue key (TK, the mirror of what is actually
// sounding). All three funnel their value edges through one keying
// callback; TK edges additionally go to the bound receiver. The generator
// holds a weak back-reference so its thread can notify the key without
// keeping it alive.

mod iambic;

pub(crate) use iambic::Iambic;

use crate::error::Result;
use crate::generator::Generator;
use crate::receiver::Receiver;
use crate::timestamp::Timestamp;
use std::sync::{Arc, Mutex};

/// Key contact state: open = space/silence, closed = mark/tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyValue {
    #[default]
    Open,
    Closed,
}

type KeyingCallback = Box<dyn FnMut(&Timestamp, KeyValue) + Send>;

pub(crate) struct KeyInner {
    sk:                    Mutex<KeyValue>,
    tk:                    Mutex<KeyValue>,
    pub(crate) ik:         Iambic,
    /// The externally observable key value, fed by all three sub-machines.
    /// The keying callback fires on transitions of this value, so an edge
    /// reported by SK or IK is not re-reported when the generator later
    /// dequeues the matching tone and the TK mirror catches up.
    value:                 Mutex<KeyValue>,
    /// Logical "now" of the last recognised edge. Refreshed from the
    /// monotonic clock on SK/paddle events, advanced tone-by-tone by the
    /// generator thread while the iambic machine runs.
    pub(crate) timer:      Mutex<Timestamp>,
    callback:              Mutex<Option<KeyingCallback>>,
    pub(crate) generator:  Mutex<Option<Arc<Generator>>>,
    receiver:              Mutex<Option<Arc<dyn Receiver>>>,
}

impl KeyInner {
    fn new() -> Self {
        Self {
            sk:        Mutex::new(KeyValue::Open),
            tk:        Mutex::new(KeyValue::Open),
            ik:        Iambic::new(),
            value:     Mutex::new(KeyValue::Open),
            timer:     Mutex::new(Timestamp::default()),
            callback:  Mutex::new(None),
            generator: Mutex::new(None),
            receiver:  Mutex::new(None),
        }
    }

    pub(crate) fn generator(&self) -> Option<Arc<Generator>> {
        self.generator.lock().unwrap().clone()
    }

    /// Wake everything blocked on the tone queue's condvar so it can
    /// re-check its predicate. Every observable state change ends here.
    pub(crate) fn broadcast(&self) {
        if let Some(gen) = self.generator() {
            gen.tq().broadcast();
        }
    }

    /// Move the observable key value; fires the keying callback exactly
    /// once per transition, after the value has been stored.
    pub(crate) fn output_set(&self, value: KeyValue) {
        {
            let mut out = self.value.lock().unwrap();
            if *out == value {
                return;
            }
            *out = value;
        }
        let at = *self.timer.lock().unwrap();
        if let Some(cb) = self.callback.lock().unwrap().as_mut() {
            cb(&at, value);
        }
    }

    // ── Straight key ─────────────────────────────────────────────────────────

    pub(crate) fn sk_notify_event(&self, value: KeyValue) -> Result<()> {
        {
            let mut sk = self.sk.lock().unwrap();
            if *sk == value {
                return Ok(());
            }
            *sk = value;
        }
        *self.timer.lock().unwrap() = Timestamp::now();
        log::debug!("[key/sk] {value:?}");
        self.output_set(value);
        self.broadcast();
        // value, callback and broadcast all precede the enqueue attempt, so
        // a full queue costs one tone but never an inconsistent key
        match self.generator() {
            Some(gen) => match value {
                KeyValue::Closed => gen.enqueue_begin_mark(),
                KeyValue::Open   => gen.enqueue_begin_space(),
            },
            None => Ok(()),
        }
    }

    pub(crate) fn sk_get_value(&self) -> KeyValue {
        *self.sk.lock().unwrap()
    }

    pub(crate) fn sk_reset(&self) {
        *self.sk.lock().unwrap() = KeyValue::Open;
        if let Some(gen) = self.generator() {
            let _ = gen.silence();
        }
        log::debug!("[key/sk] reset");
        self.broadcast();
    }

    // ── Tone-queue key ───────────────────────────────────────────────────────

    /// Mirror of the dequeued tone polarity, called by the generator thread.
    /// On change: receiver first, then the keying callback, so a receiver
    /// sees the edge before any client reaction to it. For tones that an
    /// SK/IK event already announced, the observable value is unchanged and
    /// only the receiver notification happens here.
    pub(crate) fn tk_set_value(&self, value: KeyValue) -> Result<()> {
        {
            let mut tk = self.tk.lock().unwrap();
            if *tk == value {
                return Ok(());
            }
            *tk = value;
        }
        let at = *self.timer.lock().unwrap();
        if let Some(rec) = self.receiver.lock().unwrap().as_ref() {
            let reported = match value {
                KeyValue::Closed => rec.mark_begin(&at),
                KeyValue::Open   => rec.mark_end(&at),
            };
            if let Err(e) = reported {
                log::warn!("[key/tk] receiver rejected edge: {e}");
            }
        }
        self.output_set(value);
        self.broadcast();
        Ok(())
    }

    /// Poke the bound receiver after the generator re-derives durations, so
    /// its timing statistics track the new speed/tolerance.
    pub(crate) fn sync_receiver_parameters(&self) {
        let receiver = self.receiver.lock().unwrap().clone();
        if let Some(rec) = receiver {
            rec.sync_parameters();
        }
    }
}

/// A Morse key: the straight-key, iambic-paddle and tone-queue state
/// machines plus their bindings. Create one, register a generator, then
/// feed it paddle or straight-key events.
pub struct Key {
    pub(crate) inner: Arc<KeyInner>,
}

impl Key {
    /// A blank key: everything open, idle, unbound.
    pub fn new() -> Self {
        Self { inner: Arc::new(KeyInner::new()) }
    }

    /// Bind the generator that will sound this key. One-shot: a second
    /// registration is ignored. The generator receives a weak back-reference
    /// for its dequeue-thread notifications.
    pub fn register_generator(&self, generator: &Arc<Generator>) {
        let mut slot = self.inner.generator.lock().unwrap();
        if slot.is_some() {
            log::warn!("[key] generator already registered, ignoring");
            return;
        }
        generator.bind_key(Arc::downgrade(&self.inner));
        *slot = Some(Arc::clone(generator));
    }

    /// Bind a receiver; it gets `mark_begin`/`mark_end` for every
    /// tone-queue-driven edge, plus a `sync_parameters` poke now and after
    /// every parameter change.
    pub fn register_receiver(&self, receiver: Arc<dyn Receiver>) {
        receiver.sync_parameters();
        *self.inner.receiver.lock().unwrap() = Some(receiver);
    }

    /// Register the keying callback, fired exactly once per observable
    /// key-value transition, after the value has been updated. May run on
    /// the caller's thread (paddle and straight-key events) or on the
    /// generator thread (tone-queue events); it must not call back into
    /// this key.
    pub fn register_keying_callback<F>(&self, callback: F)
    where
        F: FnMut(&Timestamp, KeyValue) + Send + 'static,
    {
        *self.inner.callback.lock().unwrap() = Some(Box::new(callback));
    }

    /// Legacy variant: the callback receives only the new key value.
    pub fn register_legacy_keying_callback<F>(&self, mut callback: F)
    where
        F: FnMut(KeyValue) + Send + 'static,
    {
        self.register_keying_callback(move |_at, value| callback(value));
    }

    // ── Straight key ─────────────────────────────────────────────────────────

    /// External straight-key edge. No-op when the value is unchanged.
    pub fn sk_notify_event(&self, value: KeyValue) -> Result<()> {
        self.inner.sk_notify_event(value)
    }

    pub fn sk_get_value(&self) -> KeyValue {
        self.inner.sk_get_value()
    }

    /// Synonym for `sk_get_value() == Closed`.
    pub fn sk_is_busy(&self) -> bool {
        self.inner.sk_get_value() == KeyValue::Closed
    }

    /// Force the straight key open and silence the generator.
    pub fn sk_reset(&self) {
        self.inner.sk_reset()
    }

    // ── Iambic keyer ─────────────────────────────────────────────────────────

    pub fn ik_enable_curtis_b(&self) {
        self.inner.ik_enable_curtis_b()
    }

    pub fn ik_disable_curtis_b(&self) {
        self.inner.ik_disable_curtis_b()
    }

    pub fn ik_get_curtis_b(&self) -> bool {
        self.inner.ik_get_curtis_b()
    }

    /// Report the state of both paddles. Requires a bound generator (the
    /// machine is driven by its dequeue thread).
    pub fn ik_notify_paddle_event(&self, dot: bool, dash: bool) -> Result<()> {
        self.inner.ik_notify_paddle_event(dot, dash)
    }

    pub fn ik_notify_dot_paddle_event(&self, dot: bool) -> Result<()> {
        self.inner.ik_notify_dot_paddle_event(dot)
    }

    pub fn ik_notify_dash_paddle_event(&self, dash: bool) -> Result<()> {
        self.inner.ik_notify_dash_paddle_event(dash)
    }

    pub fn ik_get_paddles(&self) -> (bool, bool) {
        self.inner.ik_get_paddles()
    }

    pub fn ik_get_paddle_latches(&self) -> (bool, bool) {
        self.inner.ik_get_paddle_latches()
    }

    pub fn ik_is_busy(&self) -> bool {
        self.inner.ik_is_busy()
    }

    /// Block over one element boundary.
    pub fn ik_wait_for_element(&self) -> Result<()> {
        self.inner.ik_wait_for_element()
    }

    /// Block until the keyer idles; `DeadlockLikely` while a paddle is held.
    pub fn ik_wait_for_keyer(&self) -> Result<()> {
        self.inner.ik_wait_for_keyer()
    }

    /// Force the iambic machine to Idle, clear paddles, latches and Curtis
    /// mode B, silence the generator.
    pub fn ik_reset(&self) {
        self.inner.ik_reset()
    }

    // ── Generator-facing surface ─────────────────────────────────────────────

    /// Mirror a dequeued tone's polarity (generator thread).
    pub fn tk_set_value(&self, value: KeyValue) -> Result<()> {
        self.inner.tk_set_value(value)
    }

    /// One iambic graph step (generator thread); `ReEntered` under
    /// contention, retry once after ~1 ms.
    pub fn ik_update_graph_state(&self) -> Result<()> {
        self.inner.ik_update_graph_state()
    }

    /// Advance the logical clock by one tone (generator thread).
    pub fn ik_increment_timer(&self, usecs: u32) {
        self.inner.ik_increment_timer(usecs)
    }
}

impl Default for Key {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        // sever the generator's back-reference before the key goes away
        if let Some(gen) = self.inner.generator.lock().unwrap().take() {
            gen.unbind_key();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullSink;
    use crate::tone_queue::Dequeued;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixture() -> (Key, Arc<Generator>) {
        let gen = Generator::new(Box::new(NullSink));
        let key = Key::new();
        key.register_generator(&gen);
        (key, gen)
    }

    #[test]
    fn sk_callback_fires_once_per_transition() {
        let (key, _gen) = fixture();
        let edges = Arc::new(AtomicUsize::new(0));
        let edges_cb = Arc::clone(&edges);
        key.register_keying_callback(move |_at, _v| {
            edges_cb.fetch_add(1, Ordering::SeqCst);
        });

        // Open → Closed → Closed → Open → Open: three transitions
        key.sk_notify_event(KeyValue::Closed).unwrap();
        key.sk_notify_event(KeyValue::Closed).unwrap();
        key.sk_notify_event(KeyValue::Open).unwrap();
        key.sk_notify_event(KeyValue::Open).unwrap();
        key.sk_notify_event(KeyValue::Closed).unwrap();
        assert_eq!(edges.load(Ordering::SeqCst), 3);
        assert!(key.sk_is_busy());
        assert_eq!(key.sk_get_value(), KeyValue::Closed);
    }

    #[test]
    fn sk_events_queue_forever_tones() {
        let (key, gen) = fixture();
        gen.set_frequency(700).unwrap();

        key.sk_notify_event(KeyValue::Closed).unwrap();
        match gen.tq().try_dequeue() {
            Some(Dequeued::Tone(t)) => {
                assert!(t.is_forever);
                assert_eq!(t.frequency_hz, 700);
            }
            other => panic!("expected forever mark, got {other:?}"),
        }

        key.sk_notify_event(KeyValue::Open).unwrap();
        // the silence supersedes the forever mark
        match gen.tq().try_dequeue() {
            Some(Dequeued::Tone(t)) => assert!(t.is_silent() && t.is_forever),
            other => panic!("expected forever silence, got {other:?}"),
        }
    }

    #[test]
    fn sk_reset_forces_open_without_callback() {
        let (key, _gen) = fixture();
        let edges = Arc::new(AtomicUsize::new(0));
        let edges_cb = Arc::clone(&edges);
        key.register_keying_callback(move |_at, _v| {
            edges_cb.fetch_add(1, Ordering::SeqCst);
        });

        key.sk_notify_event(KeyValue::Closed).unwrap();
        assert_eq!(edges.load(Ordering::SeqCst), 1);
        key.sk_reset();
        assert_eq!(key.sk_get_value(), KeyValue::Open);
        assert!(!key.sk_is_busy());
        assert_eq!(edges.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tk_reports_receiver_before_callback() {
        use crate::receiver::Receiver;
        use std::sync::Mutex;

        struct Probe {
            log: Arc<Mutex<Vec<&'static str>>>,
        }
        impl Receiver for Probe {
            fn mark_begin(&self, _at: &Timestamp) -> Result<()> {
                self.log.lock().unwrap().push("begin");
                Ok(())
            }
            fn mark_end(&self, _at: &Timestamp) -> Result<()> {
                self.log.lock().unwrap().push("end");
                Ok(())
            }
        }

        let (key, _gen) = fixture();
        let log = Arc::new(Mutex::new(Vec::new()));
        key.register_receiver(Arc::new(Probe { log: Arc::clone(&log) }));
        let log_cb = Arc::clone(&log);
        key.register_keying_callback(move |_at, _v| {
            log_cb.lock().unwrap().push("callback");
        });

        key.tk_set_value(KeyValue::Closed).unwrap();
        key.tk_set_value(KeyValue::Closed).unwrap(); // no-op
        key.tk_set_value(KeyValue::Open).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["begin", "callback", "end", "callback"]
        );
    }

    #[test]
    fn parameter_resync_reaches_the_receiver() {
        use crate::receiver::Receiver;

        struct Probe {
            syncs: Arc<AtomicUsize>,
        }
        impl Receiver for Probe {
            fn mark_begin(&self, _at: &Timestamp) -> Result<()> {
                Ok(())
            }
            fn mark_end(&self, _at: &Timestamp) -> Result<()> {
                Ok(())
            }
            fn sync_parameters(&self) {
                self.syncs.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (key, gen) = fixture();
        let syncs = Arc::new(AtomicUsize::new(0));
        key.register_receiver(Arc::new(Probe { syncs: Arc::clone(&syncs) }));
        assert_eq!(syncs.load(Ordering::SeqCst), 1, "poked on registration");

        gen.set_send_speed(20).unwrap();
        gen.sync_parameters();
        assert_eq!(syncs.load(Ordering::SeqCst), 2, "poked on resync");
    }

    #[test]
    fn legacy_callback_sees_values_only() {
        let (key, _gen) = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        key.register_legacy_keying_callback(move |v| {
            seen_cb.lock().unwrap().push(v);
        });

        key.sk_notify_event(KeyValue::Closed).unwrap();
        key.sk_notify_event(KeyValue::Open).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![KeyValue::Closed, KeyValue::Open]);
    }

    #[test]
    fn dropping_the_key_severs_the_back_reference() {
        let gen = Generator::new(Box::new(NullSink));
        {
            let key = Key::new();
            key.register_generator(&gen);
            key.sk_notify_event(KeyValue::Closed).unwrap();
        }
        // key gone; the generator must not hold it alive
        // (the weak upgrade inside the dequeue path now fails silently)
        gen.tq().broadcast();
    }
}
