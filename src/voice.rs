//! The shared capability set of the string synthesis algorithms
//!
//! Both algorithms model the same physical object and expose the same
//! surface: tune, pluck, render, introspect. The instrument holds a
//! homogeneous bank of one concrete variant at a time and dispatches once
//! per block, never per sample.

/// Which string model the instrument is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Synthesis {
    /// Single delay line with a lowpass in the feedback loop
    KarplusStrong,
    /// Twin traveling-wave delay lines with bridge/nut reflections
    DigitalWaveguide,
}

/// A plucked-string voice.
///
/// One voice is one physical string: it is created once, retuned and
/// re-excited many times, and never deallocated while the instrument lives.
/// All buffers are sized for the lowest supported pitch at construction so
/// none of these calls allocate.
pub trait StringVoice: Send {
    /// Retune the string to `frequency` Hz with the requested T60 sustain
    /// in seconds. Takes effect immediately; an already ringing string keeps
    /// ringing unless the delay-line length changes.
    fn set_pitch(&mut self, frequency: f32, sustain: f32);

    /// Pluck the string. `velocity` in [0, 1] scales the excitation.
    fn excite(&mut self, velocity: f32);

    /// Render mono output into `out`, overwriting it.
    fn render(&mut self, out: &mut [f32]);

    /// The pitch most recently requested via `set_pitch`.
    fn frequency(&self) -> f32;

    /// The pitch the tuned loop actually produces, reconstructed from the
    /// delay-line length and the filter group delays.
    fn effective_frequency(&self) -> f32;

    /// Change the stiffness target and retune so the total loop delay stays
    /// budgeted to the string period.
    fn set_stiffness(&mut self, stiffness: f32);
}

/// Construction-time physical configuration of the instrument.
#[derive(Debug, Clone)]
pub struct InstrumentConfig {
    /// Pickup locations as fractions of string length, used by the
    /// waveguide's pickup output mode.
    pub pickup_positions: Vec<f32>,
    /// true = listen to the force at the bridge (acoustic),
    /// false = average the displacement at the pickups (electric).
    pub use_bridge_output: bool,
    /// Reflection loss at the bridge before a note is tuned; `set_pitch`
    /// replaces it with the gain derived from the requested sustain. Metal
    /// strings ring near 0.999, nylon nearer 0.997.
    pub string_damping: f32,
    /// Finger contact area in samples: the excitation apex is smoothed over
    /// this many samples on each side.
    pub pluck_width: usize,
    /// Stiffness coefficient for the dispersion cascade, in [-0.99, 0.99].
    pub stiffness: f32,
}

impl Default for InstrumentConfig {
    /// Acoustic preset: bridge output, soft finger, nylon-ish damping.
    fn default() -> Self {
        InstrumentConfig {
            pickup_positions: vec![0.08, 0.2, 0.35],
            use_bridge_output: true,
            string_damping: 0.997,
            pluck_width: 40,
            stiffness: -0.2,
        }
    }
}

impl InstrumentConfig {
    /// Electric preset: neck pickup, sharp pick, bright strings.
    pub fn electric() -> Self {
        InstrumentConfig {
            pickup_positions: vec![0.2],
            use_bridge_output: false,
            string_damping: 0.999,
            pluck_width: 10,
            stiffness: -0.2,
        }
    }
}
