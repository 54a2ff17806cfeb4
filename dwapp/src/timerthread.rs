//! The timer wheel (spec §4.4.5 / §9 Design Notes): one background thread
//! tracks every link's T1/T3/TM201 deadlines and feeds `DL_TIMER_EXPIRY`
//! back onto the DLQ when they fire. `dwcore::timer::LinkTimer` only knows
//! about durations and elapsed time; this is the piece that supplies a real
//! clock, grounded on the same "push events from a dedicated thread" shape
//! as the teacher's reader/writer threads.

use std::collections::{BinaryHeap, HashMap};
use std::cmp::Reverse;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use dwcore::dlsm::TimerKind;

use crate::dlq::{DlqSender, LinkKey};

#[derive(Debug, Clone)]
pub enum TimerCommand {
    Start {
        key: LinkKey,
        kind: TimerKind,
        duration: Duration,
    },
    Stop {
        key: LinkKey,
        kind: TimerKind,
    },
}

#[derive(Clone)]
pub struct TimerSender(Sender<TimerCommand>);

impl TimerSender {
    pub fn start(&self, key: LinkKey, kind: TimerKind, duration: Duration) {
        let _ = self.0.send(TimerCommand::Start {
            key,
            kind,
            duration,
        });
    }

    pub fn stop(&self, key: LinkKey, kind: TimerKind) {
        let _ = self.0.send(TimerCommand::Stop { key, kind });
    }
}

pub fn channel() -> (TimerSender, Receiver<TimerCommand>) {
    let (tx, rx) = mpsc::channel();
    (TimerSender(tx), rx)
}

struct Deadline {
    at: Instant,
    key: LinkKey,
    kind: TimerKind,
    generation: u64,
}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}
impl Eq for Deadline {}
impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at.cmp(&other.at)
    }
}

/// Runs until `commands`'s sender side is dropped. Stale heap entries (a
/// timer that was stopped or restarted since it was scheduled) are
/// discarded by comparing against `active`'s current generation for that
/// (key, kind) pair rather than removed from the heap in place.
pub fn run_timer_wheel(commands: Receiver<TimerCommand>, dlq: DlqSender) {
    let mut heap: BinaryHeap<Reverse<Deadline>> = BinaryHeap::new();
    let mut active: HashMap<(LinkKey, TimerKind), u64> = HashMap::new();
    let mut next_generation: u64 = 0;

    loop {
        let wait = heap
            .peek()
            .map(|Reverse(d)| d.at.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::from_secs(3600));

        match commands.recv_timeout(wait) {
            Ok(TimerCommand::Start {
                key,
                kind,
                duration,
            }) => {
                next_generation += 1;
                active.insert((key.clone(), kind), next_generation);
                heap.push(Reverse(Deadline {
                    at: Instant::now() + duration,
                    key,
                    kind,
                    generation: next_generation,
                }));
            }
            Ok(TimerCommand::Stop { key, kind }) => {
                active.remove(&(key, kind));
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                while let Some(Reverse(d)) = heap.peek() {
                    if d.at > Instant::now() {
                        break;
                    }
                    let Reverse(d) = heap.pop().unwrap();
                    let still_active = active
                        .get(&(d.key.clone(), d.kind))
                        .is_some_and(|g| *g == d.generation);
                    if still_active {
                        active.remove(&(d.key.clone(), d.kind));
                        if dlq.timer_expiry(d.key, d.kind).is_err() {
                            return;
                        }
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                log::info!("timer wheel shutting down: command channel closed");
                return;
            }
        }
    }
}
