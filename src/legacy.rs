// src/legacy.rs  —  flat, process-global rendition of the key API
//
// Back-compat surface for callers written against the original flat
// library: one implicit Key + Generator pair per process. New code should
// create and pass explicit handles instead.

use crate::error::{Error, Result};
use crate::generator::Generator;
use crate::key::{Key, KeyValue};
use std::sync::{Arc, Mutex, OnceLock};

struct Instance {
    key: Arc<Key>,
    gen: Arc<Generator>,
}

fn cell() -> &'static Mutex<Option<Instance>> {
    static CELL: OnceLock<Mutex<Option<Instance>>> = OnceLock::new();
    CELL.get_or_init(|| Mutex::new(None))
}

/// Clones of the process-wide handles, so callers never hold the registry
/// lock across a blocking operation.
fn instance() -> Result<(Arc<Key>, Arc<Generator>)> {
    let guard = cell().lock().unwrap();
    match guard.as_ref() {
        Some(i) => Ok((Arc::clone(&i.key), Arc::clone(&i.gen))),
        None => Err(Error::Busy),
    }
}

/// Create and start the process-wide key + generator (best available audio
/// backend). Fails with `Busy` when already open.
pub fn open() -> Result<()> {
    let mut guard = cell().lock().unwrap();
    if guard.is_some() {
        return Err(Error::Busy);
    }
    let gen = Generator::with_default_sink();
    let key = Key::new();
    key.register_generator(&gen);
    gen.start();
    *guard = Some(Instance { key: Arc::new(key), gen });
    Ok(())
}

/// Stop the generator and drop the process-wide pair.
pub fn close() {
    if let Some(instance) = cell().lock().unwrap().take() {
        instance.gen.stop();
    }
}

pub fn notify_straight_key_event(closed: bool) -> Result<()> {
    let (key, _gen) = instance()?;
    key.sk_notify_event(if closed { KeyValue::Closed } else { KeyValue::Open })
}

pub fn notify_paddle_event(dot: bool, dash: bool) -> Result<()> {
    let (key, _gen) = instance()?;
    key.ik_notify_paddle_event(dot, dash)
}

pub fn enable_curtis_b() -> Result<()> {
    let (key, _gen) = instance()?;
    key.ik_enable_curtis_b();
    Ok(())
}

pub fn disable_curtis_b() -> Result<()> {
    let (key, _gen) = instance()?;
    key.ik_disable_curtis_b();
    Ok(())
}

pub fn set_send_speed(wpm: u32) -> Result<()> {
    let (_key, gen) = instance()?;
    gen.set_send_speed(wpm)
}

pub fn send_speed() -> Result<u32> {
    let (_key, gen) = instance()?;
    Ok(gen.send_speed())
}

pub fn set_frequency(hz: u32) -> Result<()> {
    let (_key, gen) = instance()?;
    gen.set_frequency(hz)
}

pub fn frequency() -> Result<u32> {
    let (_key, gen) = instance()?;
    Ok(gen.frequency())
}

pub fn set_volume(pct: u32) -> Result<()> {
    let (_key, gen) = instance()?;
    gen.set_volume(pct)
}

pub fn volume() -> Result<u32> {
    let (_key, gen) = instance()?;
    Ok(gen.volume())
}

/// Legacy keying callback: receives only the new key value.
pub fn register_keying_callback<F>(callback: F) -> Result<()>
where
    F: FnMut(KeyValue) + Send + 'static,
{
    let (key, _gen) = instance()?;
    key.register_legacy_keying_callback(callback);
    Ok(())
}

pub fn reset_straight_key() -> Result<()> {
    let (key, _gen) = instance()?;
    key.sk_reset();
    Ok(())
}

pub fn reset_iambic_keyer() -> Result<()> {
    let (key, _gen) = instance()?;
    key.ik_reset();
    Ok(())
}

pub fn wait_for_keyer() -> Result<()> {
    let (key, _gen) = instance()?;
    key.ik_wait_for_keyer()
}

pub fn wait_for_tone_queue() -> Result<()> {
    let (_key, gen) = instance()?;
    gen.wait_for_tone_queue();
    Ok(())
}
