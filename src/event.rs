//! Note and parameter events, and the preallocated lists that carry them
//! between graph nodes and processors.
//!
//! All timings are sample offsets within the current block.

/// The polyphonic expression types a note can carry. These match the
/// per-voice expressions modern plug-in APIs expose; a processor is free to
/// ignore the ones it doesn't model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expression {
    /// Voltage gain ratio, where 1.0 is unity gain.
    Volume,
    /// Stereo position, from -1 (hard left) to 1 (hard right).
    Pan,
    /// Tuning offset in semitones, from -120 to 120.
    Tuning,
    /// Vibrato amount, from 0 to 1.
    Vibrato,
    /// Expression amount, from 0 to 1.
    Expression,
    /// Brightness amount, from 0 to 1.
    Brightness,
    /// Polyphonic pressure/aftertouch, from 0 to 1.
    Pressure,
}

/// The number of [`Expression`] variants, for per-voice expression maps.
pub const NUM_EXPRESSIONS: usize = 7;

impl Expression {
    /// Index into a per-voice expression array.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The neutral value for this expression, used to initialize voices.
    pub fn neutral(self) -> f32 {
        match self {
            Expression::Volume => 1.0,
            Expression::Pan => 0.0,
            Expression::Tuning => 0.0,
            Expression::Vibrato => 0.0,
            Expression::Expression => 1.0,
            Expression::Brightness => 0.5,
            Expression::Pressure => 0.0,
        }
    }
}

/// An event travelling through the graph's event ports. The note events carry
/// a `note_id` so a host or sequencer can address one voice out of several
/// playing the same key; -1 means no specific voice.
#[derive(Debug, Clone, Copy, PartialEq)]
#[non_exhaustive]
pub enum Event {
    NoteOn {
        timing: u32,
        /// The note's channel, from 0 to 15.
        channel: u8,
        /// The note's MIDI key number, from 0 to 127.
        key: u8,
        /// The note's velocity, from 0 to 1.
        velocity: f32,
        /// A unique identifier for this note instance, or -1.
        note_id: i32,
    },
    NoteOff {
        timing: u32,
        channel: u8,
        key: u8,
        /// The release velocity, from 0 to 1.
        velocity: f32,
        note_id: i32,
    },
    /// Immediately silence a note instead of letting it release.
    NoteChoke {
        timing: u32,
        channel: u8,
        key: u8,
        note_id: i32,
    },
    /// A per-note expression change, routed to the matching voice.
    NoteExpression {
        timing: u32,
        /// Which note this applies to; -1 addresses all notes on the key.
        note_id: i32,
        key: u8,
        expression: Expression,
        value: f32,
    },
    /// A parameter automation point targeting the receiving processor.
    ParamValue {
        timing: u32,
        param_id: u32,
        value: f32,
    },
    /// A raw 3-byte MIDI channel message for processors that want the wire
    /// format.
    Midi { timing: u32, data: [u8; 3] },
}

impl Event {
    /// Return the sample within the current block this event belongs to.
    #[inline]
    pub fn timing(&self) -> u32 {
        match self {
            Event::NoteOn { timing, .. } => *timing,
            Event::NoteOff { timing, .. } => *timing,
            Event::NoteChoke { timing, .. } => *timing,
            Event::NoteExpression { timing, .. } => *timing,
            Event::ParamValue { timing, .. } => *timing,
            Event::Midi { timing, .. } => *timing,
        }
    }

    /// Tie-break order for events on the same sample: parameters land before
    /// notes, and offs/chokes before ons so retriggers release first.
    #[inline]
    fn sort_rank(&self) -> u8 {
        match self {
            Event::ParamValue { .. } => 0,
            Event::NoteChoke { .. } => 1,
            Event::NoteOff { .. } => 2,
            Event::NoteExpression { .. } => 3,
            Event::Midi { .. } => 4,
            Event::NoteOn { .. } => 5,
        }
    }
}

/// A fixed-capacity event list. The backing storage is allocated once when the
/// graph is built; pushing past the capacity drops the event and bumps an
/// overflow counter instead of reallocating, since these lists are written on
/// the audio thread.
#[derive(Debug)]
pub struct EventList {
    events: Vec<Event>,
    /// Events dropped because the list was full, since the last `clear()`.
    overflowed: u32,
}

impl EventList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            overflowed: 0,
        }
    }

    /// Append an event. Producers may push out of order and call
    /// [`sort_by_timing`][Self::sort_by_timing] once at the end; processors
    /// apply events in list order.
    pub fn push(&mut self, event: Event) -> bool {
        if self.events.len() == self.events.capacity() {
            self.overflowed = self.overflowed.saturating_add(1);
            return false;
        }

        self.events.push(event);
        true
    }

    /// Sort into timeline order. At equal timings parameter changes come
    /// first and note-offs precede note-ons so same-sample retriggers stay
    /// deterministic. In-place and allocation-free.
    pub fn sort_by_timing(&mut self) {
        self.events
            .sort_unstable_by_key(|event| (event.timing(), event.sort_rank()));
    }

    /// Copy all events from `other`, preserving order.
    pub fn extend_from(&mut self, other: &EventList) {
        for event in other.iter() {
            self.push(*event);
        }
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    #[inline]
    pub fn as_slice(&self) -> &[Event] {
        &self.events
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The number of events dropped since the last `clear()`.
    #[inline]
    pub fn overflowed(&self) -> u32 {
        self.overflowed
    }

    /// Empty the list without giving back its storage.
    pub fn clear(&mut self) {
        self.events.clear();
        self.overflowed = 0;
    }
}
