// src/lib.rs  —  cw-keyer: Morse keying and sounding library
//
// Three cooperating key state machines behind one handle:
//
//   user thread ─► paddle / straight events ─► Key (IK/SK) ─► tone queue
//                                                   │
//                                                   ├─► keying callback
//                                                   └─► receiver mark edges
//
//   gen thread  ─► dequeue tone ─► TK mirror ─► callback / receiver
//                         │
//                         └─► iambic graph step (timer-driven transitions)
//
// Typical use: create a `Generator` (it owns the tone queue and the sound
// sink), create a `Key`, register the generator with the key, start the
// generator, then feed paddle or straight-key events. The `legacy` module
// offers the same surface as process-wide free functions.

mod audio;
mod error;
mod generator;
mod key;
pub mod legacy;
mod params;
mod receiver;
mod timestamp;
mod tone_queue;

#[cfg(feature = "audio-cpal")]
pub use audio::CpalSink;
pub use audio::{create_sink, NullSink, SoundSink};
pub use error::{Error, Result};
pub use generator::{Generator, Symbol};
pub use key::{Key, KeyValue};
pub use params::{
    Durations, Params, FREQUENCY_MAX, FREQUENCY_MIN, GAP_MAX, GAP_MIN, SPEED_MAX, SPEED_MIN,
    TOLERANCE_MAX, TOLERANCE_MIN, VOLUME_MAX, VOLUME_MIN, WEIGHTING_MAX, WEIGHTING_MIN,
};
pub use receiver::Receiver;
pub use timestamp::Timestamp;
pub use tone_queue::{Tone, TONE_QUEUE_CAPACITY};
