//! MIDI decoding
//!
//! Turns the raw per-block MIDI buffer handed over by the audio server into
//! typed events. Only channel-voice NoteOn, NoteOff and ControlChange are
//! modelled; every other status byte is skipped without interrupting the
//! rest of the block.

/// Default capacity of the per-block event queue.
pub const DEFAULT_MIDI_BUFFER_SIZE: usize = 512;

/// Status nibbles of the modelled channel-voice messages.
const NOTE_OFF: u8 = 0x8;
const NOTE_ON: u8 = 0x9;
const CONTROL_CHANGE: u8 = 0xB;

/// A raw MIDI event as delivered by the server for one block.
///
/// Fixed-size so it can cross the lock-free rings without allocation.
/// Messages longer than three bytes keep only their head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiPacket {
    /// Sample offset inside the block reported by the server.
    pub time: u32,
    /// Number of valid bytes in `data`.
    pub len: u8,
    /// Status byte followed by up to two data bytes.
    pub data: [u8; 3],
}

impl MidiPacket {
    /// Builds a packet from raw wire bytes.
    pub fn new(time: u32, bytes: &[u8]) -> Self {
        let mut data = [0u8; 3];
        let len = bytes.len().min(data.len());
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            time,
            len: len as u8,
            data,
        }
    }

    /// The valid bytes of this packet.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// A decoded MIDI event. `offset` is the sample index within the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    /// Note On event. Velocity 0 is passed through unchanged.
    NoteOn {
        /// MIDI channel (0-15).
        channel: u8,
        /// Note number (0-127).
        key: u8,
        /// Velocity (0-127).
        velocity: u8,
        /// Intra-block sample offset.
        offset: u32,
    },
    /// Note Off event.
    NoteOff {
        /// MIDI channel (0-15).
        channel: u8,
        /// Note number (0-127).
        key: u8,
        /// Release velocity (0-127).
        velocity: u8,
        /// Intra-block sample offset.
        offset: u32,
    },
    /// Control Change (CC) event.
    ControlChange {
        /// MIDI channel (0-15).
        channel: u8,
        /// Controller number (0-127).
        controller: u8,
        /// Controller value (0-127).
        value: u8,
        /// Intra-block sample offset.
        offset: u32,
    },
}

impl MidiEvent {
    /// Parses a single raw message.
    ///
    /// Returns None for message types that are not modelled and for messages
    /// missing their data bytes.
    pub fn from_bytes(bytes: &[u8], offset: u32) -> Option<Self> {
        let (&status, payload) = bytes.split_first()?;
        let kind = status >> 4;
        let channel = status & 0x0F;

        if !matches!(kind, NOTE_OFF | NOTE_ON | CONTROL_CHANGE) {
            return None;
        }

        let [first, second, ..] = payload else {
            return None;
        };
        let first = *first & 0x7F;
        let second = *second & 0x7F;

        Some(match kind {
            NOTE_OFF => MidiEvent::NoteOff {
                channel,
                key: first,
                velocity: second,
                offset,
            },
            NOTE_ON => MidiEvent::NoteOn {
                channel,
                key: first,
                velocity: second,
                offset,
            },
            _ => MidiEvent::ControlChange {
                channel,
                controller: first,
                value: second,
                offset,
            },
        })
    }

    /// Get the MIDI channel for this event.
    pub fn channel(&self) -> u8 {
        match self {
            MidiEvent::NoteOn { channel, .. } => *channel,
            MidiEvent::NoteOff { channel, .. } => *channel,
            MidiEvent::ControlChange { channel, .. } => *channel,
        }
    }

    /// Get the intra-block sample offset for this event.
    pub fn offset(&self) -> u32 {
        match self {
            MidiEvent::NoteOn { offset, .. } => *offset,
            MidiEvent::NoteOff { offset, .. } => *offset,
            MidiEvent::ControlChange { offset, .. } => *offset,
        }
    }
}

/// Ordered events of the current block.
///
/// Pre-allocated; pushes beyond capacity are dropped and counted so the
/// audio thread never reallocates.
#[derive(Debug)]
pub struct MidiEventQueue {
    events: Vec<MidiEvent>,
    limit: usize,
    dropped: usize,
}

impl MidiEventQueue {
    /// Creates an empty queue able to hold `capacity` events per block.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            limit: capacity,
            dropped: 0,
        }
    }

    /// Removes all events and resets the overflow counter.
    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }

    /// Appends an event, returning false if the queue was full.
    pub fn push(&mut self, event: MidiEvent) -> bool {
        if self.events.len() >= self.limit {
            self.dropped += 1;
            return false;
        }
        self.events.push(event);
        true
    }

    /// Events in arrival order.
    pub fn as_slice(&self) -> &[MidiEvent] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MidiEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.limit
    }

    /// Events dropped this block because the queue was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl<'a> IntoIterator for &'a MidiEventQueue {
    type Item = &'a MidiEvent;
    type IntoIter = std::slice::Iter<'a, MidiEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// Decodes one block of raw MIDI into `queue`.
///
/// The queue is cleared first so nothing carries over from the previous
/// block. Packets are decoded in server order; the server-provided time
/// becomes the event offset. Returns the number of events appended.
///
/// REAL-TIME SAFE: no allocation.
pub fn decode_block(packets: &[MidiPacket], queue: &mut MidiEventQueue) -> usize {
    queue.clear();
    for packet in packets {
        if let Some(event) = MidiEvent::from_bytes(packet.bytes(), packet.time) {
            queue.push(event);
        }
    }
    queue.len()
}
