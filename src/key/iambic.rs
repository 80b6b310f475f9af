// src/key/iambic.rs  —  iambic keyer state machine (Curtis mode A / B)
//
// Nine states:
//
//               (dot latch)                     (dot latch or B)
//   Idle ──paddle──► InDot{A|B} ──delay──► AfterDot{A|B}
//     ▲                  ▲                       │
//     │                  └───────────────────────┘
//     │           (dash latch)                   (dash latch or B)
//     └──paddle──► InDash{A|B} ──delay──► AfterDash{A|B}
//
// "In" states sound the element (key closed); "After" states sound the
// end-of-element space (key open). The generator thread takes the delay
// transitions, one graph step per dequeued tone, so the machine always runs
// one tone ahead of the audio.
//
// Latch model: the stored latch bit is unserved-tap memory. It is set on a
// press edge and consumed when its element is emitted. A held paddle counts
// as latched at decision time, so a squeeze alternates for as long as both
// paddles stay closed and dies cleanly once they open.

use super::{KeyInner, KeyValue};
use crate::error::{Error, Result};
use crate::generator::Symbol;
use crate::timestamp::Timestamp;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, TryLockError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum IkState {
    #[default]
    Idle,
    InDotA,
    InDashA,
    AfterDotA,
    AfterDashA,
    InDotB,
    InDashB,
    AfterDotB,
    AfterDashB,
}

impl IkState {
    pub(crate) fn is_in(self) -> bool {
        matches!(self, IkState::InDotA | IkState::InDashA | IkState::InDotB | IkState::InDashB)
    }

    fn as_bits(self) -> u8 {
        match self {
            IkState::Idle       => 0,
            IkState::InDotA     => 1,
            IkState::InDashA    => 2,
            IkState::AfterDotA  => 3,
            IkState::AfterDashA => 4,
            IkState::InDotB     => 5,
            IkState::InDashB    => 6,
            IkState::AfterDotB  => 7,
            IkState::AfterDashB => 8,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits {
            1 => IkState::InDotA,
            2 => IkState::InDashA,
            3 => IkState::AfterDotA,
            4 => IkState::AfterDashA,
            5 => IkState::InDotB,
            6 => IkState::InDashB,
            7 => IkState::AfterDotB,
            8 => IkState::AfterDashB,
            _ => IkState::Idle,
        }
    }
}

/// The two mark kinds the machine can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Dot,
    Dash,
}

impl Mark {
    fn opposite(self) -> Mark {
        match self {
            Mark::Dot  => Mark::Dash,
            Mark::Dash => Mark::Dot,
        }
    }

    fn symbol(self) -> Symbol {
        match self {
            Mark::Dot  => Symbol::Dot,
            Mark::Dash => Symbol::Dash,
        }
    }

    fn in_a(self) -> IkState {
        match self {
            Mark::Dot  => IkState::InDotA,
            Mark::Dash => IkState::InDashA,
        }
    }

    fn in_b(self) -> IkState {
        match self {
            Mark::Dot  => IkState::InDotB,
            Mark::Dash => IkState::InDashB,
        }
    }
}

#[derive(Default)]
pub(crate) struct Core {
    graph_state:    IkState,
    key_value:      KeyValue,
    dot_paddle:     bool,
    dash_paddle:    bool,
    dot_latch:      bool,
    dash_latch:     bool,
    curtis_mode_b:  bool,
    curtis_b_latch: bool,
}

impl Core {
    /// Effective latch at decision time: an unserved tap, or a paddle that
    /// is still held.
    fn latch(&self, mark: Mark) -> bool {
        match mark {
            Mark::Dot  => self.dot_latch || self.dot_paddle,
            Mark::Dash => self.dash_latch || self.dash_paddle,
        }
    }

    fn consume(&mut self, mark: Mark) {
        match mark {
            Mark::Dot  => self.dot_latch = false,
            Mark::Dash => self.dash_latch = false,
        }
    }
}

const SNAP_STATE_MASK: u8 = 0x0F;
const SNAP_DOT:  u8 = 0x10;
const SNAP_DASH: u8 = 0x20;

/// The iambic sub-machine. `core` is the single-owner state; the public
/// graph step refuses re-entry with `try_lock`. `snapshot` republishes the
/// state and paddle bits after every change so waiters can check them
/// without touching the mutex (the waiters hold the tone-queue lock, and
/// the graph step holds `core` while enqueueing, so taking `core` there
/// would invert the lock order).
pub(crate) struct Iambic {
    core:     Mutex<Core>,
    snapshot: AtomicU8,
}

impl Iambic {
    pub(crate) fn new() -> Self {
        Self {
            core:     Mutex::new(Core::default()),
            snapshot: AtomicU8::new(0),
        }
    }

    fn publish(&self, core: &Core) {
        let mut bits = core.graph_state.as_bits();
        if core.dot_paddle {
            bits |= SNAP_DOT;
        }
        if core.dash_paddle {
            bits |= SNAP_DASH;
        }
        self.snapshot.store(bits, Ordering::Release);
    }

    pub(crate) fn snapshot_state(&self) -> IkState {
        IkState::from_bits(self.snapshot.load(Ordering::Acquire) & SNAP_STATE_MASK)
    }

    pub(crate) fn snapshot_paddles(&self) -> (bool, bool) {
        let bits = self.snapshot.load(Ordering::Acquire);
        (bits & SNAP_DOT != 0, bits & SNAP_DASH != 0)
    }
}

impl KeyInner {
    // ── Paddle events ────────────────────────────────────────────────────────

    pub(crate) fn ik_notify_paddle_event(&self, dot: bool, dash: bool) -> Result<()> {
        if self.generator().is_none() {
            // the machine cannot run without the dequeue thread
            return Err(Error::Busy);
        }
        let mut core = self.ik.core.lock().unwrap();
        if dot && !core.dot_paddle {
            core.dot_latch = true;
        }
        if dash && !core.dash_paddle {
            core.dash_latch = true;
        }
        core.dot_paddle = dot;
        core.dash_paddle = dash;
        if core.curtis_mode_b && dot && dash {
            core.curtis_b_latch = true;
        }
        log::debug!("[key/ik] paddles dot={dot} dash={dash} state={:?}", core.graph_state);

        let result = if core.graph_state == IkState::Idle {
            *self.timer.lock().unwrap() = Timestamp::now();
            self.ik_update_state_initial(&mut core)
        } else {
            // the running machine picks the change up at its next transition
            Ok(())
        };
        self.ik.publish(&core);
        drop(core);
        self.broadcast();
        result
    }

    pub(crate) fn ik_notify_dot_paddle_event(&self, dot: bool) -> Result<()> {
        let dash = self.ik.snapshot_paddles().1;
        self.ik_notify_paddle_event(dot, dash)
    }

    pub(crate) fn ik_notify_dash_paddle_event(&self, dash: bool) -> Result<()> {
        let dot = self.ik.snapshot_paddles().0;
        self.ik_notify_paddle_event(dot, dash)
    }

    /// First graph impulse out of Idle: pretend the opposite element just
    /// finished, then take one ordinary step. Dot wins when both paddles
    /// closed together.
    fn ik_update_state_initial(&self, core: &mut Core) -> Result<()> {
        if !core.dot_paddle && !core.dash_paddle {
            // release event while idle; nothing to start
            return Ok(());
        }
        core.graph_state = if core.dot_paddle {
            if core.curtis_b_latch { IkState::AfterDashB } else { IkState::AfterDashA }
        } else if core.curtis_b_latch {
            IkState::AfterDotB
        } else {
            IkState::AfterDotA
        };
        self.ik_update_graph(core)
    }

    // ── Graph stepping ───────────────────────────────────────────────────────

    /// One graph transition, driven by the generator thread at each tone
    /// boundary. Refuses re-entry: if a paddle event holds the state this
    /// returns `ReEntered` and the caller retries once after ~1 ms.
    pub(crate) fn ik_update_graph_state(&self) -> Result<()> {
        let mut core = match self.ik.core.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(Error::ReEntered),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        let result = self.ik_update_graph(&mut core);
        self.ik.publish(&core);
        drop(core);
        self.broadcast();
        result
    }

    pub(crate) fn ik_update_graph_with_retry(&self) {
        match self.ik_update_graph_state() {
            Err(Error::ReEntered) => {
                std::thread::sleep(std::time::Duration::from_millis(1));
                if let Err(e) = self.ik_update_graph_state() {
                    log::debug!("[key/ik] graph step skipped: {e}");
                }
            }
            Err(e) => log::warn!("[key/ik] graph step failed: {e}"),
            Ok(()) => {}
        }
    }

    fn ik_update_graph(&self, core: &mut Core) -> Result<()> {
        match core.graph_state {
            IkState::Idle => Ok(()),

            IkState::InDotA | IkState::InDotB => {
                debug_assert_eq!(core.key_value, KeyValue::Closed);
                core.graph_state = if core.graph_state == IkState::InDotA {
                    IkState::AfterDotA
                } else {
                    IkState::AfterDotB
                };
                self.ik_set_value(core, KeyValue::Open, Symbol::Space)
            }
            IkState::InDashA | IkState::InDashB => {
                debug_assert_eq!(core.key_value, KeyValue::Closed);
                core.graph_state = if core.graph_state == IkState::InDashA {
                    IkState::AfterDashA
                } else {
                    IkState::AfterDashB
                };
                self.ik_set_value(core, KeyValue::Open, Symbol::Space)
            }

            IkState::AfterDotA  => self.ik_after_step(core, Mark::Dot, false),
            IkState::AfterDotB  => self.ik_after_step(core, Mark::Dot, true),
            IkState::AfterDashA => self.ik_after_step(core, Mark::Dash, false),
            IkState::AfterDashB => self.ik_after_step(core, Mark::Dash, true),
        }
    }

    /// Decide what follows the element that just finished sounding.
    fn ik_after_step(&self, core: &mut Core, sent: Mark, b_state: bool) -> Result<()> {
        debug_assert_eq!(core.key_value, KeyValue::Open);

        // A sustained squeeze keeps the Curtis-B latch armed.
        if core.curtis_mode_b && core.dot_paddle && core.dash_paddle {
            core.curtis_b_latch = true;
        }

        let next = sent.opposite();
        if b_state {
            // Curtis-B trailing element: the opposite, unconditionally.
            core.graph_state = next.in_a();
            core.consume(next);
            self.ik_set_value(core, KeyValue::Closed, next.symbol())
        } else if core.latch(next) {
            core.graph_state = if core.curtis_b_latch {
                core.curtis_b_latch = false;
                next.in_b()
            } else {
                next.in_a()
            };
            core.consume(next);
            self.ik_set_value(core, KeyValue::Closed, next.symbol())
        } else if core.latch(sent) {
            core.graph_state = sent.in_a();
            core.consume(sent);
            self.ik_set_value(core, KeyValue::Closed, sent.symbol())
        } else {
            core.graph_state = IkState::Idle;
            core.curtis_b_latch = false;
            log::debug!("[key/ik] idle");
            Ok(())
        }
    }

    /// Flip the iambic key value. No-op when unchanged; otherwise the value
    /// is updated and the callback fired before the enqueue attempt, so the
    /// observable state stays consistent even when the queue is full.
    fn ik_set_value(&self, core: &mut Core, value: KeyValue, symbol: Symbol) -> Result<()> {
        if core.key_value == value {
            return Ok(());
        }
        core.key_value = value;
        log::debug!("[key/ik] {value:?} ({symbol:?})");
        self.output_set(value);
        match self.generator() {
            Some(gen) => gen.enqueue_partial_symbol(symbol),
            None => Ok(()),
        }
    }

    // ── Timer ────────────────────────────────────────────────────────────────

    /// Advance the key's logical clock by one tone. Called by the generator
    /// thread after each dequeue; a no-op while the keyer is idle.
    pub(crate) fn ik_increment_timer(&self, usecs: u32) {
        if self.ik.snapshot_state() == IkState::Idle {
            return;
        }
        self.timer.lock().unwrap().advance_us(usecs);
    }

    // ── Mode and state observation ───────────────────────────────────────────

    pub(crate) fn ik_enable_curtis_b(&self) {
        self.ik.core.lock().unwrap().curtis_mode_b = true;
    }

    pub(crate) fn ik_disable_curtis_b(&self) {
        let mut core = self.ik.core.lock().unwrap();
        core.curtis_mode_b = false;
        core.curtis_b_latch = false;
    }

    pub(crate) fn ik_get_curtis_b(&self) -> bool {
        self.ik.core.lock().unwrap().curtis_mode_b
    }

    pub(crate) fn ik_is_busy(&self) -> bool {
        self.ik.snapshot_state() != IkState::Idle
    }

    pub(crate) fn ik_get_paddles(&self) -> (bool, bool) {
        self.ik.snapshot_paddles()
    }

    /// A paddle reads as latched while its element request is outstanding:
    /// tapped and not yet served, or simply still held.
    pub(crate) fn ik_get_paddle_latches(&self) -> (bool, bool) {
        let core = self.ik.core.lock().unwrap();
        (core.latch(Mark::Dot), core.latch(Mark::Dash))
    }

    // ── Waiting ──────────────────────────────────────────────────────────────

    /// Block over one element boundary: first until the current "In" phase
    /// ends, then until the next element begins (or the keyer idles).
    pub(crate) fn ik_wait_for_element(&self) -> Result<()> {
        let gen = self.generator().ok_or(Error::Busy)?;
        let ik = &self.ik;
        gen.tq().wait_until(|| !ik.snapshot_state().is_in());
        gen.tq().wait_until(|| {
            let s = ik.snapshot_state();
            s.is_in() || s == IkState::Idle
        });
        Ok(())
    }

    /// Block until the keyer reaches Idle. Refused while a paddle is held:
    /// the machine would never get there.
    pub(crate) fn ik_wait_for_keyer(&self) -> Result<()> {
        let gen = self.generator().ok_or(Error::Busy)?;
        let (dot, dash) = self.ik.snapshot_paddles();
        if dot || dash {
            return Err(Error::DeadlockLikely);
        }
        gen.tq().wait_until(|| self.ik.snapshot_state() == IkState::Idle);
        Ok(())
    }

    // ── Reset ────────────────────────────────────────────────────────────────

    /// Cancellation primitive: back to Idle/Open, everything cleared, Curtis
    /// mode B disabled, generator silenced. Does not flush the tone queue.
    pub(crate) fn ik_reset(&self) {
        let mut core = self.ik.core.lock().unwrap();
        *core = Core::default();
        self.ik.publish(&core);
        drop(core);
        if let Some(gen) = self.generator() {
            let _ = gen.silence();
        }
        log::debug!("[key/ik] reset");
        self.broadcast();
    }
}
