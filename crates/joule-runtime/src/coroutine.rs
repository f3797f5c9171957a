//! Coroutine scheduling on top of `may::coroutine`.
//!
//! `resume`/`yield` are realized as a rendezvous over a pair of
//! `may::sync::mpmc` channels rather than a raw stack-pointer swap (ground:
//! the teacher's `scheduler.rs`/`channel.rs`): one channel carries the next
//! resume's arguments into the parked coroutine, the other carries its
//! yielded or final values back out. The channels are the teacher's
//! ordinary unbounded `mpmc::channel()`, used single-slot by discipline
//! (exactly one resume is ever in flight before the matching yield/return),
//! so the blocking `recv` on each side gives the same total-ordering
//! handshake a real context switch would, without unsafe stack-switching
//! code.

use crate::error::Error;
use joule_core::Value;
use may::sync::mpmc;
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

const DEFAULT_STACK_SIZE: usize = 1 << 14; // 16 KiB, matching the reference default

static SCHEDULER_INIT: Once = Once::new();

fn parse_stack_size(env_value: Option<String>) -> usize {
    match env_value {
        Some(val) => match val.parse::<usize>() {
            Ok(0) => {
                eprintln!("joule: JOULE_COROUTINE_STACK_SIZE=0 is invalid, using default {DEFAULT_STACK_SIZE}");
                DEFAULT_STACK_SIZE
            }
            Ok(size) => size,
            Err(_) => {
                eprintln!("joule: JOULE_COROUTINE_STACK_SIZE={val:?} is not a valid number, using default {DEFAULT_STACK_SIZE}");
                DEFAULT_STACK_SIZE
            }
        },
        None => DEFAULT_STACK_SIZE,
    }
}

/// Configure `may`'s coroutine stack size exactly once, honoring
/// `JOULE_COROUTINE_STACK_SIZE` with a warned fallback on bad input.
pub fn init_scheduler() {
    SCHEDULER_INIT.call_once(|| {
        let size = parse_stack_size(std::env::var("JOULE_COROUTINE_STACK_SIZE").ok());
        may::config().set_stack_size(size);
    });
}

static NEXT_COROUTINE_ID: AtomicUsize = AtomicUsize::new(1);

pub fn next_id() -> u64 {
    NEXT_COROUTINE_ID.fetch_add(1, Ordering::Relaxed) as u64
}

/// What crosses the rendezvous from the coroutine back to its resumer.
pub enum Handoff {
    Yielded(Vec<Value>),
    Returned(Vec<Value>),
    Raised(Error),
}

/// The two channel ends the scheduler keeps for one live coroutine. `into_co`
/// carries each resume's argument vector in; `out_of_co` carries the next
/// `Handoff` back out.
pub struct CoroutineChannels {
    pub into_co: mpmc::Sender<Vec<Value>>,
    pub resume_rx: mpmc::Receiver<Vec<Value>>,
    pub out_of_co: mpmc::Sender<Handoff>,
    pub handoff_rx: mpmc::Receiver<Handoff>,
}

/// Build the channel pair for a not-yet-started coroutine. `into_co`/`handoff_rx`
/// are the resumer's view; `resume_rx`/`out_of_co` (both clonable, since
/// `mpmc` senders and receivers are MPMC) are the coroutine body's own view
/// of the same two channels, used both by the spawned entry point (to read
/// the first resume's arguments and report a final return/raise) and by the
/// `coroutine.yield` native closure reached from deep inside the interpreter
/// (see `vm::Vm::resume` and the stdlib's `coroutine` table).
pub fn make_channels() -> CoroutineChannels {
    let (into_co, resume_rx) = mpmc::channel::<Vec<Value>>();
    let (out_of_co, handoff_rx) = mpmc::channel::<Handoff>();
    CoroutineChannels { into_co, resume_rx, out_of_co, handoff_rx }
}

/// Yield from inside a running coroutine: hand `values` back to whoever is
/// blocked in `resume`, then block until the next `resume` delivers its
/// argument vector.
pub fn yield_values(
    out_of_co: &mpmc::Sender<Handoff>,
    resume_rx: &mpmc::Receiver<Vec<Value>>,
    values: Vec<Value>,
) -> Vec<Value> {
    out_of_co.send(Handoff::Yielded(values)).expect("yield: resumer channel closed");
    resume_rx.recv().expect("yield: resume channel closed")
}

thread_local! {
    /// Per-`may`-coroutine id of the joule coroutine currently executing on
    /// this green thread, if any. Used by the stdlib's `coroutine.running`.
    static CURRENT_COROUTINE: Cell<Option<u64>> = const { Cell::new(None) };
}

pub fn set_current(id: Option<u64>) {
    CURRENT_COROUTINE.with(|c| c.set(id));
}

pub fn current() -> Option<u64> {
    CURRENT_COROUTINE.with(|c| c.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_stack_size_valid() {
        assert_eq!(parse_stack_size(Some("8192".to_string())), 8192);
    }

    #[test]
    fn parse_stack_size_zero_falls_back() {
        assert_eq!(parse_stack_size(Some("0".to_string())), DEFAULT_STACK_SIZE);
    }

    #[test]
    fn parse_stack_size_invalid_falls_back() {
        assert_eq!(parse_stack_size(Some("nope".to_string())), DEFAULT_STACK_SIZE);
    }

    #[test]
    fn parse_stack_size_absent_uses_default() {
        assert_eq!(parse_stack_size(None), DEFAULT_STACK_SIZE);
    }

    #[test]
    fn ids_are_monotonic_and_unique() {
        let a = next_id();
        let b = next_id();
        assert!(b > a);
    }

    #[test]
    fn current_coroutine_defaults_to_none() {
        assert_eq!(current(), None);
        set_current(Some(7));
        assert_eq!(current(), Some(7));
        set_current(None);
    }

    #[test]
    fn resume_yield_round_trip_over_channels() {
        let chans = make_channels();
        let inside_sender = chans.out_of_co.clone();
        let inside_receiver = chans.resume_rx.clone();
        let handle = may::coroutine::spawn(move || {
            let args = inside_receiver.recv().unwrap();
            let got = args[0];
            let next = yield_values(&inside_sender, &inside_receiver, vec![got]);
            inside_sender.send(Handoff::Returned(next)).unwrap();
        });

        chans.into_co.send(vec![Value::number(1.0)]).unwrap();
        match chans.handoff_rx.recv().unwrap() {
            Handoff::Yielded(vs) => assert_eq!(vs[0].as_f64(), Some(1.0)),
            _ => panic!("expected a yield"),
        }
        chans.into_co.send(vec![Value::number(2.0)]).unwrap();
        match chans.handoff_rx.recv().unwrap() {
            Handoff::Returned(vs) => assert_eq!(vs[0].as_f64(), Some(2.0)),
            _ => panic!("expected a return"),
        }
        handle.join().unwrap();
    }
}
