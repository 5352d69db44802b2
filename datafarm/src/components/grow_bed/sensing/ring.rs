use crate::error::AgentError;
use ringbuffer::{GrowableAllocRingBuffer, RingBuffer};
use static_assertions::assert_impl_all;

/// Fixed length window of samples for one environmental quantity.
///
/// The window starts filled with zeros and the average is always taken over
/// the full capacity, so the first few averages after a start are biased
/// low until the window has been written through once.
pub struct SampleRing {
    // Trimmed to `capacity` on push. `AllocRingBuffer` is only Send with
    // power of two capacities.
    samples: GrowableAllocRingBuffer<f64>,
    capacity: usize,
    /// Slot the next sample lands in, always within `[0, capacity)`.
    cursor: usize,
}

impl SampleRing {
    /// Zero seeded ring.
    ///
    /// * `capacity`: number of samples averaged, must not be zero.
    pub fn new(capacity: usize) -> Result<Self, AgentError> {
        if capacity == 0 {
            return Err(AgentError::Config(String::from(
                "ring capacity must be at least one",
            )));
        }
        let mut samples = GrowableAllocRingBuffer::with_capacity(capacity);
        for _ in 0..capacity {
            samples.push(0.0);
        }
        Ok(Self {
            samples,
            capacity,
            cursor: 0,
        })
    }

    /// Overwrite the slot at the cursor and advance it.
    pub fn push(&mut self, value: f64) {
        // The ring is always full, so the evicted sample is the one that was
        // written at the cursor a full lap ago.
        self.samples.push(value);
        while self.samples.len() > self.capacity {
            self.samples.dequeue();
        }
        self.cursor = (self.cursor + 1) % self.capacity;
    }

    /// Mean over the full capacity.
    pub fn average(&self) -> f64 {
        self.samples.iter().sum::<f64>() / self.capacity as f64
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

assert_impl_all!(SampleRing: Send, Sync);
