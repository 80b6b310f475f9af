// src/tone_queue.rs  —  bounded tone FIFO + the library's condvar hub
//
// The generator thread blocks here between tones. The same mutex+condvar
// pair also serves every other waiter in the library: the key broadcasts on
// it after each state change, so "wait for the keyer to idle" and "wait for
// the queue to drain" share one wakeup mechanism.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Hard bound on queued tones.
pub const TONE_QUEUE_CAPACITY: usize = 3_000;

/// Slice length used to sound a forever tone while it stays queued.
pub(crate) const QUANTUM_US: u32 = 20_000;

/// One queued tone. `frequency_hz == 0` is silence.
///
/// A forever tone holds its value until a later entry replaces it: the
/// queue keeps handing out quantum-length slices of it instead of popping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tone {
    pub duration_us:  u32,
    pub frequency_hz: u32,
    pub is_forever:   bool,
}

impl Tone {
    pub fn new(duration_us: u32, frequency_hz: u32) -> Self {
        Self { duration_us, frequency_hz, is_forever: false }
    }

    pub fn forever(frequency_hz: u32) -> Self {
        Self { duration_us: QUANTUM_US, frequency_hz, is_forever: true }
    }

    pub fn is_silent(&self) -> bool {
        self.frequency_hz == 0
    }
}

/// Outcome of a generator-side dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dequeued {
    Tone(Tone),
    /// The queue just drained; reported once per drain.
    Idle,
    Stopped,
}

type LowWaterCallback = Box<dyn FnMut() + Send>;

struct State {
    queue:           VecDeque<Tone>,
    running:         bool,
    idle_pending:    bool,
    low_water_level: Option<usize>,
    /// Dequeue counter, so `wait_for_tone` can spot one tone passing.
    dequeue_seq:     u64,
}

pub struct ToneQueue {
    state:     Mutex<State>,
    change:    Condvar,
    low_water: Mutex<Option<LowWaterCallback>>,
}

impl ToneQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue:           VecDeque::new(),
                running:         true,
                idle_pending:    false,
                low_water_level: None,
                dequeue_seq:     0,
            }),
            change:    Condvar::new(),
            low_water: Mutex::new(None),
        }
    }

    pub fn capacity(&self) -> usize {
        TONE_QUEUE_CAPACITY
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a tone. Fails with `QueueOverflow` when the ring is full.
    pub(crate) fn enqueue(&self, tone: Tone) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        if st.queue.len() >= TONE_QUEUE_CAPACITY {
            log::warn!("[tq] overflow, tone dropped");
            return Err(Error::QueueOverflow);
        }
        st.queue.push_back(tone);
        self.change.notify_all();
        Ok(())
    }

    /// Generator-side blocking dequeue.
    ///
    /// A forever mark that is the only entry stays queued and is handed out
    /// in quantum slices; once superseded it is discarded. A forever
    /// *silence* is popped outright: silence is what the idle generator
    /// produces anyway, so it must not keep the queue from draining.
    pub(crate) fn dequeue(&self) -> Dequeued {
        let tone;
        let mut fire_low_water = false;
        {
            let mut st = self.state.lock().unwrap();
            loop {
                if !st.running {
                    return Dequeued::Stopped;
                }
                if let Some(&head) = st.queue.front() {
                    if head.is_forever && !head.is_silent() && st.queue.len() == 1 {
                        let mut slice = head;
                        slice.duration_us = QUANTUM_US;
                        return Dequeued::Tone(slice);
                    }
                    let prev_len = st.queue.len();
                    let mut t = st.queue.pop_front().unwrap();
                    if let Some(level) = st.low_water_level {
                        fire_low_water |= prev_len > level && st.queue.len() <= level;
                    }
                    if t.is_forever {
                        if !st.queue.is_empty() {
                            // superseded by a newer entry
                            continue;
                        }
                        t.duration_us = QUANTUM_US;
                    }
                    if st.queue.is_empty() {
                        st.idle_pending = true;
                    }
                    st.dequeue_seq += 1;
                    tone = t;
                    self.change.notify_all();
                    break;
                }
                if st.idle_pending {
                    st.idle_pending = false;
                    return Dequeued::Idle;
                }
                st = self.change.wait(st).unwrap();
            }
        }
        if fire_low_water {
            if let Some(cb) = self.low_water.lock().unwrap().as_mut() {
                cb();
            }
        }
        Dequeued::Tone(tone)
    }

    #[cfg(test)]
    pub(crate) fn try_dequeue(&self) -> Option<Dequeued> {
        {
            let st = self.state.lock().unwrap();
            if st.queue.is_empty() && !st.idle_pending {
                return None;
            }
        }
        Some(self.dequeue())
    }

    /// Called when a client wants queue-fill notifications.
    pub(crate) fn register_low_water_callback(
        &self,
        callback: LowWaterCallback,
        level: usize,
    ) {
        self.state.lock().unwrap().low_water_level = Some(level);
        *self.low_water.lock().unwrap() = Some(callback);
    }

    /// Shut the queue down; the generator thread sees `Stopped` next.
    pub(crate) fn stop(&self) {
        self.state.lock().unwrap().running = false;
        self.change.notify_all();
    }

    /// Wake every waiter so it can re-check its predicate. Used by the key
    /// after each state change.
    pub(crate) fn broadcast(&self) {
        let _st = self.state.lock().unwrap();
        self.change.notify_all();
    }

    /// Block until `pred` holds. The predicate reads published atomics, not
    /// queue state; the timeout is a safety net against missed wakeups.
    pub(crate) fn wait_until(&self, mut pred: impl FnMut() -> bool) {
        let mut st = self.state.lock().unwrap();
        while !pred() {
            let (guard, _timeout) = self
                .change
                .wait_timeout(st, Duration::from_millis(50))
                .unwrap();
            st = guard;
        }
    }

    /// Block until one tone has been dequeued (or the queue is empty).
    pub fn wait_for_tone(&self) {
        let mut st = self.state.lock().unwrap();
        let seq = st.dequeue_seq;
        while st.dequeue_seq == seq && !st.queue.is_empty() {
            st = self.change.wait(st).unwrap();
        }
    }

    /// Block until the queue length has dropped to `level` or below.
    pub fn wait_for_level(&self, level: usize) {
        let mut st = self.state.lock().unwrap();
        while st.queue.len() > level {
            st = self.change.wait(st).unwrap();
        }
    }

    /// Block until the queue has drained completely.
    pub fn wait_for_end(&self) {
        self.wait_for_level(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let tq = ToneQueue::new();
        tq.enqueue(Tone::new(10, 700)).unwrap();
        tq.enqueue(Tone::new(20, 0)).unwrap();
        assert_eq!(tq.len(), 2);
        assert_eq!(tq.try_dequeue(), Some(Dequeued::Tone(Tone::new(10, 700))));
        assert_eq!(tq.try_dequeue(), Some(Dequeued::Tone(Tone::new(20, 0))));
    }

    #[test]
    fn reports_idle_once_after_draining() {
        let tq = ToneQueue::new();
        tq.enqueue(Tone::new(10, 700)).unwrap();
        assert!(matches!(tq.try_dequeue(), Some(Dequeued::Tone(_))));
        assert_eq!(tq.try_dequeue(), Some(Dequeued::Idle));
        assert_eq!(tq.try_dequeue(), None);
    }

    #[test]
    fn overflow_is_an_error() {
        let tq = ToneQueue::new();
        for _ in 0..TONE_QUEUE_CAPACITY {
            tq.enqueue(Tone::new(1, 700)).unwrap();
        }
        assert_eq!(tq.enqueue(Tone::new(1, 700)), Err(Error::QueueOverflow));
        assert_eq!(tq.len(), TONE_QUEUE_CAPACITY);
    }

    #[test]
    fn forever_mark_is_sliced_until_superseded() {
        let tq = ToneQueue::new();
        tq.enqueue(Tone::forever(700)).unwrap();

        for _ in 0..3 {
            match tq.try_dequeue() {
                Some(Dequeued::Tone(t)) => {
                    assert_eq!(t.frequency_hz, 700);
                    assert_eq!(t.duration_us, QUANTUM_US);
                }
                other => panic!("expected a slice, got {other:?}"),
            }
        }
        assert_eq!(tq.len(), 1);

        // a later entry replaces the forever tone entirely
        tq.enqueue(Tone::new(40, 0)).unwrap();
        assert_eq!(tq.try_dequeue(), Some(Dequeued::Tone(Tone::new(40, 0))));
        assert_eq!(tq.try_dequeue(), Some(Dequeued::Idle));
    }

    #[test]
    fn forever_silence_drains() {
        let tq = ToneQueue::new();
        tq.enqueue(Tone::forever(0)).unwrap();
        match tq.try_dequeue() {
            Some(Dequeued::Tone(t)) => assert!(t.is_silent()),
            other => panic!("expected silence, got {other:?}"),
        }
        assert_eq!(tq.try_dequeue(), Some(Dequeued::Idle));
        assert!(tq.is_empty());
    }

    #[test]
    fn low_water_fires_once_per_crossing() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let tq = ToneQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = Arc::clone(&hits);
        tq.register_low_water_callback(
            Box::new(move || {
                hits_cb.fetch_add(1, Ordering::SeqCst);
            }),
            2,
        );

        for _ in 0..5 {
            tq.enqueue(Tone::new(1, 700)).unwrap();
        }
        // 5 -> 4 -> 3: above the mark, no callback
        tq.try_dequeue();
        tq.try_dequeue();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        // 3 -> 2: crossing
        tq.try_dequeue();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // 2 -> 1 -> 0: already below, no more callbacks
        tq.try_dequeue();
        tq.try_dequeue();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
