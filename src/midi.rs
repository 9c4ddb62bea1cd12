//! MIDI ingestion: the SPSC ring fed by the device poll thread, the 3-byte
//! wire parser, and the fixed controller map (faders, mutes, smart-param
//! knobs, transport keys, scene launches).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use midi_consts::channel_event::{
    CHANNEL_KEY_PRESSURE, CONTROL_CHANGE, NOTE_OFF, NOTE_ON, PITCH_BEND_CHANGE, PROGRAM_CHANGE,
};

/// Capacity of the input ring; power of two, sized for several blocks of a
/// busy controller.
pub const MIDI_RING_CAPACITY: usize = 1024;

/// Scene launches live on channel 10 (index 9), the classic drum-pad channel.
pub const SCENE_LAUNCH_CHANNEL: u8 = 9;
pub const SCENE_LAUNCH_FIRST_NOTE: u8 = 36;
pub const SCENE_LAUNCH_LAST_NOTE: u8 = 43;

/// The eight smart-param knobs in page order.
pub const SMART_KNOB_CCS: [u8; 8] = [71, 72, 73, 74, 75, 76, 77, 93];

const CC_FADER_FIRST: u8 = 33;
const CC_FADER_LAST: u8 = 40;
const CC_MUTE_FIRST: u8 = 49;
const CC_MUTE_LAST: u8 = 56;
const CC_SMART_PAGE_PREV: u8 = 98;
const CC_SMART_PAGE_NEXT: u8 = 99;
const CC_STOP: u8 = 114;
const CC_PLAY: u8 = 115;
const CC_LOOP: u8 = 116;
const CC_RECORD: u8 = 117;

/// Faders map linearly onto the track volume range.
const FADER_RANGE: f32 = 1.5;

/// Create the input ring. The producer half goes to the MIDI poll thread,
/// the consumer half into the engine.
pub fn midi_ring() -> (MidiInput, rtrb::Consumer<[u8; 3]>) {
    let (producer, consumer) = rtrb::RingBuffer::new(MIDI_RING_CAPACITY);
    (
        MidiInput {
            producer,
            dropped: Arc::new(AtomicU32::new(0)),
        },
        consumer,
    )
}

/// Producer handle for the device poll thread. On overflow the newest event
/// is dropped and counted; stale-but-consistent beats torn-but-current for
/// controller data.
pub struct MidiInput {
    producer: rtrb::Producer<[u8; 3]>,
    dropped: Arc<AtomicU32>,
}

impl MidiInput {
    pub fn push(&mut self, bytes: [u8; 3]) -> bool {
        match self.producer.push(bytes) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Shared drop counter, for surfacing overflow in the UI.
    pub fn dropped_counter(&self) -> Arc<AtomicU32> {
        self.dropped.clone()
    }
}

/// A classified controller action, block-aligned (`sample_offset = 0`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MidiAction {
    NoteOn { channel: u8, key: u8, velocity: f32 },
    NoteOff { channel: u8, key: u8, velocity: f32 },
    SceneLaunch { scene: u8 },
    Fader { track: u8, volume: f32 },
    MuteToggle { track: u8 },
    SmartKnob { knob: u8, value: f32 },
    SmartPagePrev,
    SmartPageNext,
    Stop,
    Play,
    LoopToggle,
    RecordToggle,
    PitchBend { channel: u8, value: f32 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, pressure: f32 },
    OtherCc { channel: u8, cc: u8, value: f32 },
}

/// Drains the ring once per block and classifies each event against the
/// controller map. Edge-triggered CCs (mutes, transport, paging) fire on the
/// low→high transition only.
pub struct MidiDispatcher {
    consumer: rtrb::Consumer<[u8; 3]>,
    /// Previous value per CC number for edge detection.
    cc_values: [u8; 128],
}

impl MidiDispatcher {
    pub fn new(consumer: rtrb::Consumer<[u8; 3]>) -> Self {
        Self {
            consumer,
            cc_values: [0; 128],
        }
    }

    /// Drain all pending events, invoking `sink` for each recognized action
    /// in arrival order.
    pub fn drain(&mut self, mut sink: impl FnMut(MidiAction)) {
        while let Ok(bytes) = self.consumer.pop() {
            if let Some(action) = self.classify(bytes) {
                sink(action);
            }
        }
    }

    fn classify(&mut self, bytes: [u8; 3]) -> Option<MidiAction> {
        let status = bytes[0] & 0xf0;
        let channel = bytes[0] & 0x0f;
        let data1 = bytes[1] & 0x7f;
        let data2 = bytes[2] & 0x7f;

        match status {
            NOTE_ON if data2 == 0 => self.classify_note_off(channel, data1, 0.0),
            NOTE_ON => {
                if channel == SCENE_LAUNCH_CHANNEL
                    && (SCENE_LAUNCH_FIRST_NOTE..=SCENE_LAUNCH_LAST_NOTE).contains(&data1)
                {
                    Some(MidiAction::SceneLaunch {
                        scene: data1 - SCENE_LAUNCH_FIRST_NOTE,
                    })
                } else {
                    Some(MidiAction::NoteOn {
                        channel,
                        key: data1,
                        velocity: data2 as f32 / 127.0,
                    })
                }
            }
            NOTE_OFF => self.classify_note_off(channel, data1, data2 as f32 / 127.0),
            CONTROL_CHANGE => self.classify_cc(channel, data1, data2),
            PROGRAM_CHANGE => Some(MidiAction::ProgramChange {
                channel,
                program: data1,
            }),
            CHANNEL_KEY_PRESSURE => Some(MidiAction::ChannelPressure {
                channel,
                pressure: data1 as f32 / 127.0,
            }),
            PITCH_BEND_CHANGE => {
                let raw = (data2 as u16) << 7 | data1 as u16;
                Some(MidiAction::PitchBend {
                    channel,
                    // 0.5 is centered, matching the event convention
                    value: raw as f32 / 16_383.0,
                })
            }
            _ => None,
        }
    }

    fn classify_note_off(&self, channel: u8, key: u8, velocity: f32) -> Option<MidiAction> {
        if channel == SCENE_LAUNCH_CHANNEL
            && (SCENE_LAUNCH_FIRST_NOTE..=SCENE_LAUNCH_LAST_NOTE).contains(&key)
        {
            // Scene pads fire on the press; the release is swallowed
            None
        } else {
            Some(MidiAction::NoteOff {
                channel,
                key,
                velocity,
            })
        }
    }

    fn classify_cc(&mut self, channel: u8, cc: u8, value: u8) -> Option<MidiAction> {
        let rising = value >= 64 && self.cc_values[cc as usize] < 64;
        self.cc_values[cc as usize] = value;
        let norm = value as f32 / 127.0;

        match cc {
            CC_FADER_FIRST..=CC_FADER_LAST => Some(MidiAction::Fader {
                track: cc - CC_FADER_FIRST,
                volume: norm * FADER_RANGE,
            }),
            CC_MUTE_FIRST..=CC_MUTE_LAST => rising.then_some(MidiAction::MuteToggle {
                track: cc - CC_MUTE_FIRST,
            }),
            CC_SMART_PAGE_PREV => rising.then_some(MidiAction::SmartPagePrev),
            CC_SMART_PAGE_NEXT => rising.then_some(MidiAction::SmartPageNext),
            CC_STOP => rising.then_some(MidiAction::Stop),
            CC_PLAY => rising.then_some(MidiAction::Play),
            CC_LOOP => rising.then_some(MidiAction::LoopToggle),
            CC_RECORD => rising.then_some(MidiAction::RecordToggle),
            _ if SMART_KNOB_CCS.contains(&cc) => {
                let knob = SMART_KNOB_CCS.iter().position(|&k| k == cc).unwrap() as u8;
                Some(MidiAction::SmartKnob { knob, value: norm })
            }
            _ => Some(MidiAction::OtherCc {
                channel,
                cc,
                value: norm,
            }),
        }
    }
}

/// The live key grid: which keys are down right now versus at the start of
/// the block, with note-on velocities. The recorder diffs the two to place
/// notes, and a fresh recording opens notes for keys that were already held.
pub struct KeyGrid {
    pressed: [bool; 128],
    prev: [bool; 128],
    velocity: [f32; 128],
}

impl KeyGrid {
    pub fn new() -> Self {
        Self {
            pressed: [false; 128],
            prev: [false; 128],
            velocity: [0.0; 128],
        }
    }

    /// Snapshot the current state as "previous" before draining this block's
    /// events.
    pub fn begin_block(&mut self) {
        self.prev = self.pressed;
    }

    pub fn note_on(&mut self, key: u8, velocity: f32) {
        self.pressed[key as usize] = true;
        self.velocity[key as usize] = velocity;
    }

    pub fn note_off(&mut self, key: u8) {
        self.pressed[key as usize] = false;
    }

    pub fn is_pressed(&self, key: u8) -> bool {
        self.pressed[key as usize]
    }

    pub fn velocity(&self, key: u8) -> f32 {
        self.velocity[key as usize]
    }

    /// Keys that went down this block.
    pub fn just_pressed(&self) -> impl Iterator<Item = u8> + '_ {
        (0..128u8).filter(|&k| self.pressed[k as usize] && !self.prev[k as usize])
    }

    /// Keys that came up this block.
    pub fn just_released(&self) -> impl Iterator<Item = u8> + '_ {
        (0..128u8).filter(|&k| !self.pressed[k as usize] && self.prev[k as usize])
    }

    /// All keys currently down.
    pub fn held(&self) -> impl Iterator<Item = u8> + '_ {
        (0..128u8).filter(|&k| self.pressed[k as usize])
    }
}

impl Default for KeyGrid {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_one(dispatcher: &mut MidiDispatcher, input: &mut MidiInput, bytes: [u8; 3]) -> Vec<MidiAction> {
        input.push(bytes);
        let mut actions = Vec::new();
        dispatcher.drain(|a| actions.push(a));
        actions
    }

    #[test]
    fn notes_parse_with_running_velocity_zero_as_off() {
        let (mut input, consumer) = midi_ring();
        let mut dispatcher = MidiDispatcher::new(consumer);

        let on = drain_one(&mut dispatcher, &mut input, [0x90, 60, 100]);
        assert_eq!(
            on,
            vec![MidiAction::NoteOn {
                channel: 0,
                key: 60,
                velocity: 100.0 / 127.0
            }]
        );

        let off = drain_one(&mut dispatcher, &mut input, [0x90, 60, 0]);
        assert!(matches!(off[0], MidiAction::NoteOff { key: 60, .. }));
    }

    #[test]
    fn scene_pads_on_channel_ten() {
        let (mut input, consumer) = midi_ring();
        let mut dispatcher = MidiDispatcher::new(consumer);

        let launch = drain_one(&mut dispatcher, &mut input, [0x99, 38, 127]);
        assert_eq!(launch, vec![MidiAction::SceneLaunch { scene: 2 }]);

        // A regular channel plays notes even in the pad range
        let note = drain_one(&mut dispatcher, &mut input, [0x90, 38, 127]);
        assert!(matches!(note[0], MidiAction::NoteOn { key: 38, .. }));
    }

    #[test]
    fn transport_ccs_are_edge_triggered() {
        let (mut input, consumer) = midi_ring();
        let mut dispatcher = MidiDispatcher::new(consumer);

        assert_eq!(
            drain_one(&mut dispatcher, &mut input, [0xb0, 115, 127]),
            vec![MidiAction::Play]
        );
        // Still high: no retrigger
        assert!(drain_one(&mut dispatcher, &mut input, [0xb0, 115, 127]).is_empty());
        // Release then press again
        assert!(drain_one(&mut dispatcher, &mut input, [0xb0, 115, 0]).is_empty());
        assert_eq!(
            drain_one(&mut dispatcher, &mut input, [0xb0, 115, 127]),
            vec![MidiAction::Play]
        );
    }

    #[test]
    fn faders_scale_to_the_volume_range() {
        let (mut input, consumer) = midi_ring();
        let mut dispatcher = MidiDispatcher::new(consumer);

        let action = drain_one(&mut dispatcher, &mut input, [0xb0, 35, 127]);
        assert_eq!(
            action,
            vec![MidiAction::Fader {
                track: 2,
                volume: 1.5
            }]
        );
    }

    #[test]
    fn smart_knobs_map_in_page_order() {
        let (mut input, consumer) = midi_ring();
        let mut dispatcher = MidiDispatcher::new(consumer);

        let knob0 = drain_one(&mut dispatcher, &mut input, [0xb0, 71, 64]);
        assert!(matches!(knob0[0], MidiAction::SmartKnob { knob: 0, .. }));
        let knob7 = drain_one(&mut dispatcher, &mut input, [0xb0, 93, 64]);
        assert!(matches!(knob7[0], MidiAction::SmartKnob { knob: 7, .. }));
    }

    #[test]
    fn key_grid_diffs_between_blocks() {
        let mut grid = KeyGrid::new();
        grid.begin_block();
        grid.note_on(60, 0.8);
        grid.note_on(64, 0.6);
        assert_eq!(grid.just_pressed().collect::<Vec<_>>(), vec![60, 64]);

        grid.begin_block();
        grid.note_off(60);
        assert_eq!(grid.just_released().collect::<Vec<_>>(), vec![60]);
        assert_eq!(grid.held().collect::<Vec<_>>(), vec![64]);
    }

    #[test]
    fn overflow_drops_newest_and_counts() {
        let (mut input, _consumer) = midi_ring();
        let dropped = input.dropped_counter();
        for _ in 0..MIDI_RING_CAPACITY {
            assert!(input.push([0x90, 60, 100]));
        }
        assert!(!input.push([0x90, 61, 100]));
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
    }
}
