//! Engine Notifications
//!
//! Lock-free reporting from the real-time callback to the control thread.
//! Uses an rtrb ring buffer (single producer, single consumer); the audio
//! side never waits for space and drops notifications when the ring is full.

use rtrb::{Consumer, Producer, RingBuffer};

/// Default capacity of the notification ring.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Things the real-time side reports to the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// The stages are now running at this sample rate.
    SampleRateChanged(u32),
    /// The engine now accepts blocks of up to this many frames.
    BufferSizeChanged(u32),
    /// A block was larger than the negotiated buffer size and was skipped.
    BlockRejected { nframes: usize, buffer_size: usize },
    /// MIDI events dropped because the per-block queue was full.
    MidiOverflow { dropped: usize },
}

/// Creates a connected sender/receiver pair.
pub fn notification_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = RingBuffer::new(capacity);
    (EventSender { tx }, EventReceiver { rx })
}

/// Real-time side of the ring.
pub struct EventSender {
    tx: Producer<EngineEvent>,
}

impl EventSender {
    /// Sends an event, returning it back if the ring is full.
    ///
    /// REAL-TIME SAFE: Non-blocking operation.
    pub fn send(&mut self, event: EngineEvent) -> Result<(), EngineEvent> {
        self.tx
            .push(event)
            .map_err(|rtrb::PushError::Full(event)| event)
    }

    /// Sends an event, dropping it silently if the ring is full.
    ///
    /// REAL-TIME SAFE: Non-blocking, no allocations.
    pub fn send_lossy(&mut self, event: EngineEvent) {
        let _ = self.tx.push(event);
    }

    pub fn slots_available(&self) -> usize {
        self.tx.slots()
    }
}

/// Control side of the ring.
pub struct EventReceiver {
    rx: Consumer<EngineEvent>,
}

impl EventReceiver {
    /// Receives one pending event, if any.
    pub fn recv(&mut self) -> Option<EngineEvent> {
        self.rx.pop().ok()
    }

    /// Drains every pending event.
    pub fn drain(&mut self) -> impl Iterator<Item = EngineEvent> + '_ {
        std::iter::from_fn(|| self.recv())
    }

    /// Number of events waiting to be read.
    pub fn pending(&self) -> usize {
        self.rx.slots()
    }
}
