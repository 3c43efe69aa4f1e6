//! # Plectrum 6
//!
//! Real-time physical modeling synthesis engine for a six-string plucked
//! instrument. Notes go in as control events, interleaved stereo comes out
//! of a pull-based render call driven by the host's audio callback.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  control threads                 audio thread                │
//! │                                                              │
//! │  EngineController ──ring──▶ AudioProcessor                   │
//! │   note_on / strum            │ drain commands at block start │
//! │   set_* parameters           ▼                               │
//! │                         ┌─────────┐                          │
//! │                         │ Guitar  │  6 × StringVoice         │
//! │                         │         │  (Karplus-Strong or      │
//! │                         │         │   digital waveguide)     │
//! │                         └────┬────┘                          │
//! │                              │ mono sum                      │
//! │                     ┌────────┴────────┐                      │
//! │                     ▼                 ▼                      │
//! │               GuitarBody 95Hz   GuitarBody 105Hz             │
//! │                     │                 │                      │
//! │                     ▼                 ▼                      │
//! │                  [Left]            [Right]                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both string algorithms implement [`StringVoice`]; the instrument holds a
//! homogeneous bank of one variant at a time and swaps the whole bank at a
//! block boundary when the strategy changes. All DSP buffers are sized for
//! the lowest supported pitch up front, so the audio thread never allocates.

pub mod body;
pub mod engine;
pub mod filters;
pub mod guitar;
pub mod karplus;
pub mod music;
pub mod voice;
pub mod waveguide;

pub use engine::{
    create_engine, AudioProcessor, EngineCommand, EngineController, EngineWarning, StrumDirection,
};
pub use guitar::Guitar;
pub use karplus::KarplusVoice;
pub use music::{chord_frequencies, note_to_freq, NoteError};
pub use voice::{InstrumentConfig, StringVoice, Synthesis};
pub use waveguide::WaveguideVoice;

/// Sample rate the engine is tuned and tested at. Other rates in the
/// 22.05 kHz - 96 kHz range work but are not characterized.
pub const DEFAULT_SAMPLE_RATE: f32 = 44_100.0;

/// Lowest supported pitch; bounds every delay-line allocation.
pub const MIN_FREQUENCY: f32 = 20.0;

/// Largest host block rendered in one pass; bigger requests are chunked.
pub const MAX_BLOCK: usize = 4096;

/// Default lowpass cutoff applied to the pluck excitation burst.
pub const EXCITATION_CUTOFF_HZ: f32 = 4000.0;
