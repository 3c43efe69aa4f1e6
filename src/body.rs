//! Resonant guitar body model
//!
//! One channel of the body: a Butterworth lowpass models the wood absorbing
//! the string's top end, a narrow bandpass models the Helmholtz air
//! resonance of the sound hole, and a tanh stage saturates gently at high
//! drive. The instrument runs two of these with slightly detuned resonances
//! for stereo width.

use crate::filters::{Biquad, NoiseSource};

/// Wood damping cutoff
const WOOD_CUTOFF_HZ: f32 = 3000.0;

/// Width of the Helmholtz resonance band
const RESONANCE_BANDWIDTH_HZ: f32 = 40.0;

/// How loud the resonance band is mixed over the damped signal
const BOOM_GAIN: f32 = 1.5;

/// Air-coupling noise floor, roughly -70 dBFS. Also keeps the filter
/// recursions out of denormal territory as notes decay.
const NOISE_FLOOR: f32 = 3.2e-4;

/// Length of the attack thump injected on each pluck
const KICK_SAMPLES: usize = 100;

/// One body channel with persistent filter state
pub struct GuitarBody {
    lowpass: Biquad,
    bandpass: Biquad,
    noise: NoiseSource,
}

impl GuitarBody {
    pub fn new(sample_rate: f32, resonance_hz: f32) -> Self {
        GuitarBody {
            lowpass: Biquad::lowpass(
                WOOD_CUTOFF_HZ,
                std::f32::consts::FRAC_1_SQRT_2,
                sample_rate,
            ),
            bandpass: Biquad::bandpass(resonance_hz, RESONANCE_BANDWIDTH_HZ, sample_rate),
            // Seed per resonance so the two channels carry uncorrelated air.
            noise: NoiseSource::new(resonance_hz.to_bits()),
        }
    }

    /// Filter a block of string signal into body-colored output.
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        for (x, y) in input.iter().zip(output.iter_mut()) {
            let damped = self.lowpass.process_sample(*x);
            let boom = self.bandpass.process_sample(*x);
            let air = self.noise.next_gaussian() * NOISE_FLOOR;
            *y = (damped + BOOM_GAIN * boom + air).tanh();
        }
    }

    /// Kick the resonance with a short noise burst when a note starts.
    ///
    /// The output is discarded; the point is to leave energy in the
    /// bandpass state so the resonance rings into the next blocks, which
    /// gives the attack its thump.
    pub fn kick(&mut self, velocity: f32) {
        for _ in 0..KICK_SAMPLES {
            let burst = self.noise.next() * 0.1 * velocity;
            self.lowpass.process_sample(burst);
            self.bandpass.process_sample(burst);
        }
    }

    /// Clear all filter state.
    pub fn reset(&mut self) {
        self.lowpass.reset();
        self.bandpass.reset();
    }
}
