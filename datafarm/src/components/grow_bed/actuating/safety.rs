use crate::{
    components::grow_bed::actuating::registry::{ActuatorRegistry, ActuatorState},
    error::AgentError,
};
use priority_queue::DoublePriorityQueue;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, error, warn};

/// Entry in the scheduler queue. The generation is captured when the timer
/// is armed, the entry is stale once the actuator generation moves on.
#[derive(Hash, PartialEq, Eq, Clone, Debug)]
pub struct SafetyDeadline {
    /// Actuator to force off.
    pub actuator: String,
    /// Generation the entry was armed with.
    pub generation: u64,
}

/// Forces hazardous actuators off after a fixed time. Every timer lives in
/// a single scheduler task ordering deadlines in a priority queue, arming
/// and cancelling only touch the generation counters and the channel.
pub struct SafetyTimer {
    generations: Arc<HashMap<String, AtomicU64>>,
    sender: UnboundedSender<(SafetyDeadline, Instant)>,
}

impl SafetyTimer {
    /// Spawn the scheduler task on the current runtime. The task ends once
    /// the timer is dropped and the remaining deadlines have fired.
    ///
    /// * `registry`: actuators the timer may force off.
    pub fn start(registry: Arc<ActuatorRegistry>) -> (Self, JoinHandle<()>) {
        let generations: Arc<HashMap<String, AtomicU64>> = Arc::new(
            registry
                .names()
                .map(|name| (String::from(name), AtomicU64::new(0)))
                .collect(),
        );
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(schedule(registry, generations.clone(), receiver));
        (
            Self {
                generations,
                sender,
            },
            handle,
        )
    }

    fn generation(&self, name: &str) -> Result<&AtomicU64, AgentError> {
        self.generations
            .get(name)
            .ok_or_else(|| AgentError::UnknownActuator(String::from(name)))
    }

    /// Schedule a forced off, superseding any pending one for the actuator.
    /// Call before switching the actuator on.
    ///
    /// * `name`: actuator name.
    /// * `duration`: time until the actuator is forced off.
    pub fn arm(&self, name: &str, duration: Duration) -> Result<(), AgentError> {
        let generation = self.generation(name)?.fetch_add(1, Ordering::SeqCst) + 1;
        let deadline = SafetyDeadline {
            actuator: String::from(name),
            generation,
        };
        debug!(actuator = name, generation, ?duration, "safety timer armed");
        self.sender
            .send((deadline, Instant::now() + duration))
            .map_err(|_| AgentError::Config(String::from("safety scheduler has stopped")))
    }

    /// Invalidate any pending forced off for the actuator.
    ///
    /// * `name`: actuator name.
    pub fn cancel(&self, name: &str) -> Result<(), AgentError> {
        let generation = self.generation(name)?.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(actuator = name, generation, "safety timer cancelled");
        Ok(())
    }
}

/// Scheduler loop. Pending deadlines are kept in a min queue keyed on the
/// instant they fire.
async fn schedule(
    registry: Arc<ActuatorRegistry>,
    generations: Arc<HashMap<String, AtomicU64>>,
    mut receiver: UnboundedReceiver<(SafetyDeadline, Instant)>,
) {
    let mut queue: DoublePriorityQueue<SafetyDeadline, Instant> = DoublePriorityQueue::new();
    let mut open = true;
    loop {
        let next = queue.peek_min().map(|(_, at)| *at);
        tokio::select! {
            received = receiver.recv(), if open => match received {
                Some((deadline, at)) => {
                    queue.push(deadline, at);
                }
                None => open = false,
            },
            () = tokio::time::sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                if let Some((deadline, _)) = queue.pop_min() {
                    fire(&registry, &generations, &deadline);
                }
            },
            else => break,
        }
    }
    debug!("safety scheduler stopped");
}

fn fire(
    registry: &ActuatorRegistry,
    generations: &HashMap<String, AtomicU64>,
    deadline: &SafetyDeadline,
) {
    // Compared under the actuator lock. Switching on bumps the generation
    // first, so a stale deadline can never land after that write.
    let live = || {
        generations
            .get(&deadline.actuator)
            .map(|g| g.load(Ordering::SeqCst))
            == Some(deadline.generation)
    };
    match registry.set_if(&deadline.actuator, ActuatorState::Off, live) {
        Ok(true) => warn!(actuator = %deadline.actuator, "safety timer expired, forced off"),
        Ok(false) => debug!(
            actuator = %deadline.actuator,
            generation = deadline.generation,
            "stale safety deadline dropped"
        ),
        Err(e) => error!(actuator = %deadline.actuator, "forced off failed: {e}"),
    }
}
