//! The real-time core of a clip-launching DAW: a lock-free audio graph
//! evaluated once per callback, a clip/scene launcher scheduled against a
//! musical transport, and an analog-modeling synth voice engine. The UI,
//! audio/MIDI device opening, and project persistence all live outside this
//! crate; they talk to the engine through a double-buffered session snapshot,
//! an SPSC MIDI ring, and a feedback ring going the other way.

// Re-export the macros' dependency so the `deck_*!` macros can be used from
// other crates without also depending on `log` directly.
pub use log;

#[macro_use]
pub mod debug;

/// Everything needed to embed the engine. Import this with `use clipdeck::prelude::*;`.
pub mod prelude;

pub mod dsp;
pub mod engine;
pub mod error;
pub mod event;
pub mod graph;
pub mod midi;
pub mod params;
pub mod processor;
pub mod session;
pub mod synth;
pub mod util;
