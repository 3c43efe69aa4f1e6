//! Bidirectional digital waveguide string synthesis
//!
//! Models the string as two counter-propagating wave components on twin
//! circular buffers sharing one pointer. The bridge termination inverts and
//! loses energy through a lowpass and the stiffness cascade; the nut
//! termination inverts through the fractional-delay allpass that fine-tunes
//! the pitch. Displacement at any point is the sum of the two components.
//!
//! Output is tapped either at the bridge (force-like, rich in partials,
//! acoustic character) or as the averaged displacement under a set of
//! pickups (electric character).

use crate::filters::{DispersionFilter, FractionalAllpass, OnePole};
use crate::voice::{InstrumentConfig, StringVoice};
use crate::MIN_FREQUENCY;

/// Allpass stages in the stiffness cascade
const DISPERSION_STAGES: usize = 12;

/// Samples per block-filtered chunk
const CHUNK: usize = 64;

/// Digital waveguide string voice
pub struct WaveguideVoice {
    sample_rate: f32,

    /// Current target pitch in Hz
    frequency: f32,

    /// Requested T60 in seconds
    sustain: f32,

    /// Stiffness the dispersion cascade aims for (budget permitting)
    stiffness_target: f32,

    /// Pluck point as a fraction of string length
    pluck_position: f32,

    /// Finger contact half-width in samples
    pluck_width: usize,

    /// true = bridge force output, false = pickup displacement output
    use_bridge_output: bool,

    /// Pickup locations as fractions of string length
    pickup_positions: Vec<f32>,

    /// Pickup locations in samples for the current length
    pickup_offsets: Vec<usize>,

    /// Right-going traveling wave
    right: Vec<f32>,

    /// Left-going traveling wave
    left: Vec<f32>,

    /// Active length N of both lines (half the period in samples)
    length: usize,

    /// Shared pointer into both lines
    ptr: usize,

    /// Bridge reflection gain for the requested T60
    damping_gain: f32,

    /// Bridge lowpass (frequency-dependent loss)
    damping_filter: OnePole,

    /// Nut fractional-delay tuning filter
    frac: FractionalAllpass,

    /// Bridge stiffness cascade
    dispersion: DispersionFilter,

    /// Chunk scratch: samples arriving at the bridge
    bridge_buf: [f32; CHUNK],

    /// Chunk scratch: samples arriving at the nut (pre-negated)
    nut_buf: [f32; CHUNK],
}

impl WaveguideVoice {
    pub fn new(sample_rate: f32, frequency: f32, config: &InstrumentConfig) -> Self {
        // Half a period per line, so half the Karplus capacity.
        let capacity = (sample_rate / (2.0 * MIN_FREQUENCY)) as usize + 1;
        let mut voice = WaveguideVoice {
            sample_rate,
            frequency,
            sustain: 4.0,
            stiffness_target: config.stiffness,
            pluck_position: 0.2,
            pluck_width: config.pluck_width.max(1),
            use_bridge_output: config.use_bridge_output,
            pickup_positions: config.pickup_positions.clone(),
            pickup_offsets: Vec::with_capacity(config.pickup_positions.len()),
            right: vec![0.0; capacity],
            left: vec![0.0; capacity],
            length: 2,
            ptr: 0,
            // Placeholder until set_pitch derives the gain from the sustain.
            damping_gain: config.string_damping.clamp(0.0, 0.9999),
            damping_filter: OnePole::new(0.1),
            frac: FractionalAllpass::new(),
            dispersion: DispersionFilter::new(config.stiffness, DISPERSION_STAGES),
            bridge_buf: [0.0; CHUNK],
            nut_buf: [0.0; CHUNK],
        };
        voice.set_pitch(frequency, 4.0);
        voice
    }

    /// Where along the string the pluck lands, as a fraction of length.
    pub fn set_pluck_position(&mut self, position: f32) {
        self.pluck_position = position.clamp(0.05, 0.95);
    }

    /// String displacement at a spatial position (0 = bridge end, 1 = nut
    /// end): the sum of the two traveling-wave components.
    pub fn displacement_at(&self, ratio: f32) -> f32 {
        let idx = (self.ptr + (self.length as f32 * ratio) as usize) % self.length;
        self.right[idx] + self.left[idx]
    }

    /// Frequency-dependent loop loss: bright for high notes, warm for low.
    fn adaptive_alpha(frequency: f32) -> f32 {
        if frequency >= 600.0 {
            0.08
        } else if frequency <= 300.0 {
            0.20
        } else {
            0.20 + (frequency - 300.0) / 300.0 * (0.08 - 0.20)
        }
    }
}

impl StringVoice for WaveguideVoice {
    fn set_pitch(&mut self, frequency: f32, sustain: f32) {
        self.frequency = frequency.clamp(MIN_FREQUENCY, self.sample_rate / 2.0);
        self.sustain = sustain.max(0.05);
        self.damping_gain = 10.0f32.powf(-3.0 / (self.frequency * self.sustain));

        let ideal_n = self.sample_rate / (2.0 * self.frequency);
        let stiffness_delay = self
            .dispersion
            .update_stiffness(self.stiffness_target, 0.7 * ideal_n - 1.0);

        self.damping_filter.set_alpha(Self::adaptive_alpha(self.frequency));

        // Loop filters run once per round trip (2N samples), so half their
        // combined group delay comes off the line length. The damping
        // filter's share follows its alpha, which just changed with pitch.
        let fixed_delays = self.damping_filter.group_delay() + stiffness_delay;
        let total_n = (ideal_n - 0.5 * fixed_delays).max(2.0);
        let n = (total_n as usize).min(self.right.len() - 1).max(2);
        let residue = total_n - n as f32;
        self.frac
            .set_coefficient((1.0 - 2.0 * residue) / (1.0 + 2.0 * residue));

        self.length = n;
        self.pickup_offsets.clear();
        for ratio in &self.pickup_positions {
            self.pickup_offsets.push((n as f32 * ratio) as usize % n);
        }
    }

    fn excite(&mut self, velocity: f32) {
        let velocity = velocity.clamp(0.0, 1.0);
        let n = self.length;

        // Fresh start: clear both traveling waves and all loop filter state.
        self.right.fill(0.0);
        self.left.fill(0.0);
        self.damping_filter.reset();
        self.frac.reset();
        self.dispersion.reset();

        let apex = ((n as f32 * self.pluck_position) as usize).clamp(1, n - 1);
        let amplitude = 0.5 * velocity;
        let rise = amplitude / apex as f32;
        let fall = -amplitude / (n - apex) as f32;

        // Triangular displacement with a parabolic cap over the apex: the
        // parabola matches the triangle's value and slope at both window
        // edges, rounding the tip over the finger contact area.
        let w = self.pluck_width.min(apex).min(n - 1 - apex);
        let window_start = apex - w;
        let y_start = rise * window_start as f32;
        let curvature = if w > 0 {
            (fall - rise) / (4.0 * w as f32)
        } else {
            0.0
        };

        for i in 0..n {
            let displacement = if w > 0 && i >= apex - w && i <= apex + w {
                let d = (i - window_start) as f32;
                y_start + rise * d + curvature * d * d
            } else if i <= apex {
                rise * i as f32
            } else {
                amplitude * (n - i) as f32 / (n - apex) as f32
            };

            let idx = (self.ptr + i) % n;
            self.right[idx] = displacement;
            self.left[idx] = displacement;
        }
    }

    fn render(&mut self, out: &mut [f32]) {
        let n = self.length;
        let num_pickups = self.pickup_offsets.len().max(1);

        let mut written = 0;
        while written < out.len() {
            // Chunks never exceed N, so every arrival is read before any
            // reflection write can land on it.
            let chunk = (out.len() - written).min(CHUNK).min(n);

            for i in 0..chunk {
                let idx = (self.ptr + i) % n;
                self.bridge_buf[i] = self.right[idx];
                self.nut_buf[i] = -self.left[idx];
            }

            // Bridge termination: lossy lowpass plus stiffness dispersion.
            self.damping_filter.process_block(&mut self.bridge_buf[..chunk]);
            self.dispersion.process_block(&mut self.bridge_buf[..chunk]);

            // Nut termination: inverting fractional-delay allpass.
            self.frac.process_block(&mut self.nut_buf[..chunk]);

            for i in 0..chunk {
                let idx = (self.ptr + i) % n;
                self.left[idx] = -self.bridge_buf[i] * self.damping_gain;
                self.right[idx] = self.nut_buf[i];

                out[written + i] = if self.use_bridge_output {
                    self.bridge_buf[i]
                } else {
                    let mut total = 0.0;
                    for &offset in &self.pickup_offsets {
                        let tap = (idx + offset) % n;
                        total += self.right[tap] + self.left[tap];
                    }
                    total / num_pickups as f32
                };
            }

            self.ptr = (self.ptr + chunk) % n;
            written += chunk;
        }
    }

    fn frequency(&self) -> f32 {
        self.frequency
    }

    fn effective_frequency(&self) -> f32 {
        let c = self.frac.coefficient();
        let frac_delay = (1.0 - c) / (1.0 + c);
        let total_period = 2.0 * self.length as f32
            + frac_delay
            + self.dispersion.group_delay()
            + self.damping_filter.group_delay();
        self.sample_rate / total_period
    }

    fn set_stiffness(&mut self, stiffness: f32) {
        self.stiffness_target = stiffness.clamp(-0.99, 0.99);
        self.set_pitch(self.frequency, self.sustain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::InstrumentConfig;

    fn cents(actual: f32, target: f32) -> f32 {
        1200.0 * (actual / target).log2()
    }

    #[test]
    fn tuned_loop_lands_within_five_cents() {
        let config = InstrumentConfig::default();
        for target in [82.41f32, 110.0, 196.0, 440.0, 1318.5] {
            let voice = WaveguideVoice::new(44100.0, target, &config);
            let off = cents(voice.effective_frequency(), target).abs();
            assert!(off < 5.0, "{target} Hz tuned {off} cents off");
        }
    }

    #[test]
    fn excitation_peaks_at_the_pluck_point() {
        let config = InstrumentConfig::default();
        let mut voice = WaveguideVoice::new(44100.0, 110.0, &config);
        voice.set_pluck_position(0.3);
        voice.excite(1.0);

        let at_apex = voice.displacement_at(0.3);
        let near_bridge = voice.displacement_at(0.05);
        let near_nut = voice.displacement_at(0.9);

        // Both lines carry 0.5 * velocity * triangle; the parabolic cap
        // shaves the tip, so the summed apex displacement sits below 1.0
        // but well above the rest of the string.
        assert!(at_apex > 0.5, "Apex displacement should dominate, got {at_apex}");
        assert!(at_apex > near_bridge && at_apex > near_nut);
    }

    #[test]
    fn smoothed_apex_has_no_sharp_corner() {
        let config = InstrumentConfig::default();
        let mut voice = WaveguideVoice::new(44100.0, 82.41, &config);
        voice.excite(1.0);

        // Second difference across the apex stays small when the tip is
        // parabolic; a raw triangle would show a jump of rise - fall there.
        let n = voice.length;
        let apex = (n as f32 * 0.2) as usize;
        let probe = |i: usize| voice.right[(voice.ptr + i) % n];
        let second_diff =
            (probe(apex + 1) - 2.0 * probe(apex) + probe(apex - 1)).abs();

        let rise = 0.5 / apex as f32;
        let fall = 0.5 / (n - apex) as f32;
        assert!(
            second_diff < (rise + fall) * 0.5,
            "Apex should be rounded, second difference {second_diff}"
        );
    }

    #[test]
    fn bridge_and_pickup_outputs_differ() {
        let acoustic = InstrumentConfig::default();
        let electric = InstrumentConfig::electric();

        let mut a = WaveguideVoice::new(44100.0, 196.0, &acoustic);
        let mut b = WaveguideVoice::new(44100.0, 196.0, &electric);
        a.excite(1.0);
        b.excite(1.0);

        let mut out_a = vec![0.0f32; 2048];
        let mut out_b = vec![0.0f32; 2048];
        a.render(&mut out_a);
        b.render(&mut out_b);

        assert!(out_a != out_b, "Output taps should produce different signals");
        assert!(out_a.iter().any(|s| s.abs() > 1e-4));
        assert!(out_b.iter().any(|s| s.abs() > 1e-4));
    }

    #[test]
    fn rendering_is_deterministic() {
        let config = InstrumentConfig::default();
        let mut a = WaveguideVoice::new(44100.0, 110.0, &config);
        let mut b = WaveguideVoice::new(44100.0, 110.0, &config);
        a.excite(0.8);
        b.excite(0.8);

        let mut out_a = vec![0.0f32; 8192];
        let mut out_b = vec![0.0f32; 8192];
        a.render(&mut out_a);
        b.render(&mut out_b);
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn output_decays_and_stays_finite() {
        let config = InstrumentConfig::default();
        let mut voice = WaveguideVoice::new(44100.0, 196.0, &config);
        voice.set_pitch(196.0, 1.0);
        voice.excite(1.0);

        let mut out = vec![0.0f32; 44100];
        voice.render(&mut out);

        let early: f32 = out[0..4410].iter().map(|s| s * s).sum::<f32>();
        let late: f32 = out[39690..44100].iter().map(|s| s * s).sum::<f32>();
        assert!(late < early * 0.1, "Energy should decay: early {early}, late {late}");
        assert!(out.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn block_size_does_not_change_the_signal() {
        let config = InstrumentConfig::default();
        let mut a = WaveguideVoice::new(44100.0, 246.9, &config);
        let mut b = WaveguideVoice::new(44100.0, 246.9, &config);
        a.excite(1.0);
        b.excite(1.0);

        let mut whole = vec![0.0f32; 4096];
        a.render(&mut whole);

        let mut pieces = vec![0.0f32; 4096];
        for chunk in pieces.chunks_mut(173) {
            b.render(chunk);
        }
        assert_eq!(whole, pieces, "Chunked rendering must be sample-exact");
    }
}
