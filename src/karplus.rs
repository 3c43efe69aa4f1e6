//! Extended Karplus-Strong string synthesis
//!
//! The classic algorithm models a plucked string with:
//! 1. A delay line whose length determines the pitch
//! 2. A lowpass filter in the feedback loop (energy loss)
//! 3. An initial excitation (a shaped burst of noise)
//!
//! Extensions on top of the classic loop:
//! - Fractional delay via allpass interpolation (precise tuning)
//! - Allpass cascade for stiffness dispersion (inharmonicity)
//! - Gain compensation so the requested T60 holds at any pitch
//! - Pluck-position comb filtering of the excitation

use crate::filters::{DispersionFilter, FractionalAllpass, NoiseSource};
use crate::voice::StringVoice;
use crate::{EXCITATION_CUTOFF_HZ, MIN_FREQUENCY};

/// Allpass stages in the stiffness cascade
const DISPERSION_STAGES: usize = 4;

/// Group delay of the two-tap loop lowpass, subtracted from the period
const LOOP_FILTER_DELAY: f32 = 0.5;

/// Karplus-Strong string voice
pub struct KarplusVoice {
    sample_rate: f32,

    /// Current target pitch in Hz
    frequency: f32,

    /// Requested T60 in seconds
    sustain: f32,

    /// Stiffness the dispersion cascade aims for (budget permitting)
    stiffness_target: f32,

    /// Pluck point as a fraction of string length
    pluck_position: f32,

    /// Circular delay line, pre-allocated for the lowest supported pitch
    delay_line: Vec<f32>,

    /// Active loop length N (integer part of the tuned period)
    length: usize,

    /// Read/write pointer into the delay line
    ptr: usize,

    /// Per-sample decay multiplier (gain-compensated for the loop filter)
    decay: f32,

    /// Sub-sample tuning filter
    frac: FractionalAllpass,

    /// Stiffness cascade
    dispersion: DispersionFilter,

    /// Excitation noise
    noise: NoiseSource,

    /// Scratch for shaping the excitation burst
    burst: Vec<f32>,
}

impl KarplusVoice {
    pub fn new(sample_rate: f32, frequency: f32, stiffness: f32) -> Self {
        let capacity = (sample_rate / MIN_FREQUENCY) as usize + 1;
        let mut voice = KarplusVoice {
            sample_rate,
            frequency,
            sustain: 4.0,
            stiffness_target: stiffness,
            pluck_position: 0.2,
            delay_line: vec![0.0; capacity],
            length: 2,
            ptr: 0,
            decay: 0.99,
            frac: FractionalAllpass::new(),
            dispersion: DispersionFilter::new(stiffness, DISPERSION_STAGES),
            noise: NoiseSource::new(12345),
            burst: vec![0.0; capacity],
        };
        voice.set_pitch(frequency, 4.0);
        voice
    }

    /// Where along the string the pluck lands, as a fraction of length.
    pub fn set_pluck_position(&mut self, position: f32) {
        self.pluck_position = position.clamp(0.05, 0.95);
    }
}

impl StringVoice for KarplusVoice {
    fn set_pitch(&mut self, frequency: f32, sustain: f32) {
        self.frequency = frequency.clamp(MIN_FREQUENCY, self.sample_rate / 2.0);
        self.sustain = sustain.max(0.05);

        let ideal_t = self.sample_rate / self.frequency;

        // The dispersion cascade may not eat more than 70% of the period,
        // less the lowpass correction, or the loop length goes negative.
        let stiffness_delay = self
            .dispersion
            .update_stiffness(self.stiffness_target, 0.7 * ideal_t - LOOP_FILTER_DELAY);

        let total_t = (ideal_t - LOOP_FILTER_DELAY - stiffness_delay).max(2.1);
        let n = (total_t as usize).min(self.delay_line.len() - 1).max(2);
        let residue = total_t - n as f32;
        self.frac.set_coefficient((1.0 - residue) / (1.0 + residue));

        // Gain compensation: the 0.48/0.52 loop filter is not unity at the
        // fundamental, so its magnitude response is folded into the decay
        // and the requested T60 holds regardless of pitch.
        let w = 2.0 * std::f32::consts::PI * self.frequency / self.sample_rate;
        let filter_gain = (0.48f32 * 0.48 + 0.52 * 0.52 + 2.0 * 0.48 * 0.52 * w.cos()).sqrt();
        let target_gain = 10.0f32.powf(-3.0 / (self.frequency * self.sustain));
        self.decay = (target_gain / filter_gain).min(0.999);

        if n != self.length {
            self.length = n;
            self.delay_line[..n].fill(0.0);
            self.ptr = 0;
            self.frac.reset();
            self.dispersion.reset();
        }
    }

    fn excite(&mut self, velocity: f32) {
        let velocity = velocity.clamp(0.0, 1.0);
        let n = self.length;

        // 1. White noise burst over one period.
        for slot in self.burst[..n].iter_mut() {
            *slot = self.noise.next();
        }

        // 2. Leaky integrator tilts the spectrum pinkish.
        let mut last = 0.0f32;
        for slot in self.burst[..n].iter_mut() {
            *slot = (*slot + 0.5 * last) / 1.5;
            last = *slot;
        }

        // 3. Pluck-position comb nulls the overtone whose node sits at the
        //    pluck point: c[i] = b[i] - b[i - p]. Walking backwards keeps
        //    the uncombed b[i - p] values intact without a second scratch.
        let p = ((n as f32 * self.pluck_position) as usize).min(n - 2).max(1);
        for i in (p..n).rev() {
            self.burst[i] -= self.burst[i - p];
        }

        // 4. One-pole lowpass at the excitation cutoff.
        let alpha =
            self.sample_rate / (self.sample_rate + 2.0 * std::f32::consts::PI * EXCITATION_CUTOFF_HZ);
        let mut prev = 0.0f32;
        for slot in self.burst[..n].iter_mut() {
            prev = (1.0 - alpha) * *slot + alpha * prev;
            *slot = prev;
        }

        // 5. Overwrite the delay line, scaled by velocity.
        for i in 0..n {
            self.delay_line[i] = self.burst[i] * velocity;
        }
        self.ptr = 0;
        self.frac.reset();
        self.dispersion.reset();
    }

    fn render(&mut self, out: &mut [f32]) {
        let n = self.length;
        let mut ptr = self.ptr;

        for sample in out.iter_mut() {
            let v0 = self.delay_line[ptr];
            let next = (ptr + 1) % n;
            let v1 = self.delay_line[next];

            let lowpassed = (0.48 * v0 + 0.52 * v1) * self.decay;
            let dispersed = self.dispersion.process_sample(lowpassed);
            let tuned = self.frac.process_sample(dispersed);

            self.delay_line[ptr] = tuned;
            ptr = next;
            *sample = v0;
        }

        self.ptr = ptr;
    }

    fn frequency(&self) -> f32 {
        self.frequency
    }

    fn effective_frequency(&self) -> f32 {
        let c = self.frac.coefficient();
        let frac_delay = (1.0 - c) / (1.0 + c);
        let total_period =
            self.length as f32 + frac_delay + self.dispersion.group_delay() + LOOP_FILTER_DELAY;
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

    fn cents(actual: f32, target: f32) -> f32 {
        1200.0 * (actual / target).log2()
    }

    #[test]
    fn tuned_loop_lands_within_five_cents() {
        for target in [82.41f32, 110.0, 196.0, 440.0, 1318.5] {
            let voice = KarplusVoice::new(44100.0, target, -0.2);
            let off = cents(voice.effective_frequency(), target).abs();
            assert!(off < 5.0, "{target} Hz tuned {off} cents off");
        }
    }

    #[test]
    fn stiffness_change_keeps_tuning() {
        let mut voice = KarplusVoice::new(44100.0, 110.0, 0.0);
        voice.set_stiffness(-0.7);
        let off = cents(voice.effective_frequency(), 110.0).abs();
        assert!(off < 5.0, "Retuned {off} cents off after stiffness change");
    }

    #[test]
    fn silent_before_excitation() {
        let mut voice = KarplusVoice::new(44100.0, 220.0, -0.2);
        let mut out = vec![1.0f32; 512];
        voice.render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn excitation_is_deterministic() {
        let mut a = KarplusVoice::new(44100.0, 196.0, -0.2);
        let mut b = KarplusVoice::new(44100.0, 196.0, -0.2);
        a.excite(1.0);
        b.excite(1.0);
        let mut out_a = vec![0.0f32; 4096];
        let mut out_b = vec![0.0f32; 4096];
        a.render(&mut out_a);
        b.render(&mut out_b);
        assert_eq!(out_a, out_b, "Same seed and events must be bit-identical");
    }

    #[test]
    fn output_decays_and_stays_finite() {
        let mut voice = KarplusVoice::new(44100.0, 196.0, -0.2);
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
    fn re_excite_restores_amplitude() {
        let mut voice = KarplusVoice::new(44100.0, 330.0, -0.2);
        voice.set_pitch(330.0, 0.5);
        voice.excite(1.0);

        let mut out = vec![0.0f32; 22050];
        voice.render(&mut out);
        let faded = out[22000..].iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        voice.excite(1.0);
        let mut fresh = vec![0.0f32; 1024];
        voice.render(&mut fresh);
        let peak = fresh.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        assert!(peak > faded * 4.0, "Re-pluck should re-rise ({peak} vs {faded})");
    }
}
