//! Digital filters shared by the string voices and the body model
//!
//! Contains:
//! - OnePole: first-order lowpass used for loop damping and excitation shaping
//! - FractionalAllpass: first-order allpass for sub-sample delay tuning
//! - DispersionFilter: allpass cascade modelling string stiffness
//! - Biquad: second-order Butterworth sections for the body
//! - NoiseSource: seeded uniform/gaussian noise generator

use std::f32::consts::PI;

/// One-pole lowpass filter
///
/// y[n] = (1 - alpha) * x[n] + alpha * y[n-1]
///
/// alpha near 0 is transparent, alpha near 1 is heavy damping.
pub struct OnePole {
    alpha: f32,
    prev_output: f32,
}

impl OnePole {
    pub fn new(alpha: f32) -> Self {
        OnePole {
            alpha: alpha.clamp(0.0, 0.9999),
            prev_output: 0.0,
        }
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        self.alpha = alpha.clamp(0.0, 0.9999);
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Low-frequency group delay in samples: alpha / (1 - alpha).
    pub fn group_delay(&self) -> f32 {
        self.alpha / (1.0 - self.alpha)
    }

    /// Process one sample
    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        let output = (1.0 - self.alpha) * input + self.alpha * self.prev_output;
        self.prev_output = output;
        output
    }

    /// Process a block in place
    ///
    /// Block form of the same recurrence: b = [1 - alpha], a = [1, -alpha].
    pub fn process_block(&mut self, buffer: &mut [f32]) {
        let b0 = 1.0 - self.alpha;
        let mut y = self.prev_output;
        for sample in buffer.iter_mut() {
            y = b0 * *sample + self.alpha * y;
            *sample = y;
        }
        self.prev_output = y;
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        self.prev_output = 0.0;
    }
}

/// First-order allpass filter for fractional delay
///
/// y[n] = c * x[n] + x[n-1] - c * y[n-1]
///
/// For a desired fractional delay d in [0, 1] the coefficient is
/// c = (1 - d) / (1 + d), giving a low-frequency group delay of d samples.
pub struct FractionalAllpass {
    coefficient: f32,
    x_prev: f32,
    y_prev: f32,
}

impl FractionalAllpass {
    pub fn new() -> Self {
        FractionalAllpass {
            coefficient: 0.0,
            x_prev: 0.0,
            y_prev: 0.0,
        }
    }

    pub fn set_coefficient(&mut self, coefficient: f32) {
        self.coefficient = coefficient.clamp(-0.99, 0.99);
    }

    pub fn coefficient(&self) -> f32 {
        self.coefficient
    }

    /// Process one sample
    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        let output = self.coefficient * input + self.x_prev - self.coefficient * self.y_prev;
        self.x_prev = input;
        self.y_prev = output;
        output
    }

    /// Process a block in place
    pub fn process_block(&mut self, buffer: &mut [f32]) {
        let c = self.coefficient;
        for sample in buffer.iter_mut() {
            let output = c * *sample + self.x_prev - c * self.y_prev;
            self.x_prev = *sample;
            self.y_prev = output;
            *sample = output;
        }
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        self.x_prev = 0.0;
        self.y_prev = 0.0;
    }
}

impl Default for FractionalAllpass {
    fn default() -> Self {
        Self::new()
    }
}

/// Stiffness dispersion: a cascade of identical first-order allpass stages
///
/// Real strings propagate high frequencies faster than low ones, stretching
/// the overtones above integer multiples of the fundamental. Each stage runs
/// y = a*x + x_prev - a*y_prev with independent history.
pub struct DispersionFilter {
    a: f32,
    stages: usize,
    x_prev: Vec<f32>,
    y_prev: Vec<f32>,
}

impl DispersionFilter {
    pub fn new(stiffness: f32, stages: usize) -> Self {
        DispersionFilter {
            a: stiffness.clamp(-0.99, 0.99),
            stages,
            x_prev: vec![0.0; stages],
            y_prev: vec![0.0; stages],
        }
    }

    pub fn coefficient(&self) -> f32 {
        self.a
    }

    /// Total sample delay introduced by all stages at low frequencies
    pub fn group_delay(&self) -> f32 {
        let mut denom = 1.0 + self.a;
        if denom.abs() < 1e-6 {
            denom = 1e-6;
        }
        self.stages as f32 * (1.0 - self.a) / denom
    }

    /// Retarget the stiffness coefficient under a delay budget
    ///
    /// Clamps |a| to 0.99, then if the resulting group delay exceeds
    /// `max_delay_budget` solves a = (K - D) / (K + D) so the cascade fits
    /// inside the budget. Returns the achieved delay so the caller can
    /// subtract it from the string period.
    pub fn update_stiffness(&mut self, target_stiffness: f32, max_delay_budget: f32) -> f32 {
        let mut s = target_stiffness.clamp(-0.99, 0.99);
        let k = self.stages as f32;
        let mut delay = k * (1.0 - s) / (1.0 + s);
        if delay > max_delay_budget {
            let d = max_delay_budget.max(0.1);
            s = (k - d) / (k + d);
            delay = d;
        }
        self.a = s;
        delay
    }

    /// Process one sample through every stage
    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        let mut current = input;
        for i in 0..self.stages {
            let output = self.a * current + self.x_prev[i] - self.a * self.y_prev[i];
            self.x_prev[i] = current;
            self.y_prev[i] = output;
            current = output;
        }
        current
    }

    /// Process a block in place, one stage at a time
    pub fn process_block(&mut self, buffer: &mut [f32]) {
        for i in 0..self.stages {
            let a = self.a;
            let mut x_prev = self.x_prev[i];
            let mut y_prev = self.y_prev[i];
            for sample in buffer.iter_mut() {
                let output = a * *sample + x_prev - a * y_prev;
                x_prev = *sample;
                y_prev = output;
                *sample = output;
            }
            self.x_prev[i] = x_prev;
            self.y_prev[i] = y_prev;
        }
    }

    /// Reset every stage's history
    pub fn reset(&mut self) {
        self.x_prev.fill(0.0);
        self.y_prev.fill(0.0);
    }
}

/// Second-order biquad filter (Direct Form II Transposed)
///
/// Coefficients are designed once via Butterworth formulas; the two-sample
/// state persists across blocks so streaming is continuous.
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl Biquad {
    /// Butterworth lowpass (q = 1/sqrt(2) for the maximally flat response)
    pub fn lowpass(cutoff_hz: f32, q: f32, sample_rate: f32) -> Self {
        let omega = 2.0 * PI * cutoff_hz / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);

        let b0 = (1.0 - cos_omega) / 2.0;
        let b1 = 1.0 - cos_omega;
        let b2 = (1.0 - cos_omega) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        Biquad {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Constant-peak bandpass centered on `center_hz` with the given bandwidth
    pub fn bandpass(center_hz: f32, bandwidth_hz: f32, sample_rate: f32) -> Self {
        let q = center_hz / bandwidth_hz.max(1.0);
        let omega = 2.0 * PI * center_hz / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);

        let b0 = alpha;
        let b1 = 0.0;
        let b2 = -alpha;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        Biquad {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Process one sample
    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        let output = self.b0 * input + self.z1;
        self.z1 = self.b1 * input - self.a1 * output + self.z2;
        self.z2 = self.b2 * input - self.a2 * output;
        output
    }

    /// Process a block, writing into `output`
    pub fn process_block(&mut self, input: &[f32], output: &mut [f32]) {
        for (x, y) in input.iter().zip(output.iter_mut()) {
            *y = self.process_sample(*x);
        }
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// Seeded noise generator (linear congruential)
///
/// Deterministic per seed, which makes rendered output reproducible for a
/// given event stream.
pub struct NoiseSource {
    state: u32,
}

impl NoiseSource {
    pub fn new(seed: u32) -> Self {
        NoiseSource { state: seed }
    }

    /// Uniform noise in [-1, 1]
    #[inline]
    pub fn next(&mut self) -> f32 {
        self.state = self.state.wrapping_mul(1103515245).wrapping_add(12345);
        (self.state as f32 / u32::MAX as f32) * 2.0 - 1.0
    }

    /// Approximately gaussian noise with unit variance (sum of four uniforms)
    #[inline]
    pub fn next_gaussian(&mut self) -> f32 {
        (self.next() + self.next() + self.next() + self.next()) * 0.866
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_pole_is_transparent_at_zero_alpha() {
        let mut lp = OnePole::new(0.0);
        for x in [0.3, -0.7, 1.0, 0.0] {
            let y = lp.process_sample(x);
            assert!((y - x).abs() < 1e-6, "Expected {x}, got {y}");
        }
    }

    #[test]
    fn one_pole_converges_to_dc_input() {
        let mut lp = OnePole::new(0.9);
        let mut y = 0.0;
        for _ in 0..2000 {
            y = lp.process_sample(1.0);
        }
        assert!((y - 1.0).abs() < 1e-4, "DC gain should be unity, got {y}");
    }

    #[test]
    fn one_pole_block_matches_samplewise() {
        let input: Vec<f32> = (0..64).map(|i| ((i as f32) * 0.37).sin()).collect();

        let mut a = OnePole::new(0.6);
        let expected: Vec<f32> = input.iter().map(|&x| a.process_sample(x)).collect();

        let mut b = OnePole::new(0.6);
        let mut block = input.clone();
        b.process_block(&mut block);

        for (i, (x, y)) in expected.iter().zip(block.iter()).enumerate() {
            assert!((x - y).abs() < 1e-6, "Mismatch at sample {i}: {x} vs {y}");
        }
    }

    #[test]
    fn allpass_with_zero_coefficient_is_unit_delay() {
        let mut ap = FractionalAllpass::new();
        ap.set_coefficient(0.0);
        assert_eq!(ap.process_sample(1.0), 0.0);
        assert_eq!(ap.process_sample(0.0), 1.0);
        assert_eq!(ap.process_sample(0.0), 0.0);
    }

    #[test]
    fn allpass_block_matches_samplewise() {
        let input: Vec<f32> = (0..64).map(|i| ((i as f32) * 0.11).cos()).collect();

        let mut a = FractionalAllpass::new();
        a.set_coefficient(0.4);
        let expected: Vec<f32> = input.iter().map(|&x| a.process_sample(x)).collect();

        let mut b = FractionalAllpass::new();
        b.set_coefficient(0.4);
        let mut block = input.clone();
        b.process_block(&mut block);

        for (x, y) in expected.iter().zip(block.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn dispersion_group_delay_matches_formula() {
        let disp = DispersionFilter::new(-0.5, 4);
        let expected = 4.0 * 1.5 / 0.5;
        assert!((disp.group_delay() - expected).abs() < 1e-4);
    }

    #[test]
    fn dispersion_at_zero_is_pure_delay() {
        // a = 0 turns each stage into a one-sample delay: an impulse comes
        // out exactly `stages` samples later, undistorted.
        let mut disp = DispersionFilter::new(0.0, 4);
        let mut out = Vec::new();
        out.push(disp.process_sample(1.0));
        for _ in 0..6 {
            out.push(disp.process_sample(0.0));
        }
        assert!((out[4] - 1.0).abs() < 1e-6, "Impulse should appear at n=4");
        let leak: f32 = out
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 4)
            .map(|(_, v)| v.abs())
            .sum();
        assert!(leak < 1e-6, "No energy outside the delayed impulse");
    }

    #[test]
    fn update_stiffness_respects_budget() {
        let mut disp = DispersionFilter::new(0.0, 4);
        // -0.9 would want 4 * 1.9 / 0.1 = 76 samples; the budget caps it.
        let delay = disp.update_stiffness(-0.9, 5.0);
        assert!((delay - 5.0).abs() < 1e-4, "Delay should clamp to budget, got {delay}");
        assert!((disp.group_delay() - 5.0).abs() < 1e-3);
        assert!(disp.coefficient().abs() <= 0.99);
    }

    #[test]
    fn update_stiffness_unconstrained_hits_target() {
        let mut disp = DispersionFilter::new(0.0, 4);
        let delay = disp.update_stiffness(-0.2, 100.0);
        assert!((disp.coefficient() + 0.2).abs() < 1e-6);
        assert!((delay - disp.group_delay()).abs() < 1e-4);
    }

    #[test]
    fn dispersion_block_matches_samplewise() {
        let input: Vec<f32> = (0..128).map(|i| ((i as f32) * 0.23).sin()).collect();

        let mut a = DispersionFilter::new(-0.7, 12);
        let expected: Vec<f32> = input.iter().map(|&x| a.process_sample(x)).collect();

        let mut b = DispersionFilter::new(-0.7, 12);
        let mut block = input.clone();
        b.process_block(&mut block);

        for (x, y) in expected.iter().zip(block.iter()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    /// Steady-state RMS gain of a filter for a sine at the given frequency.
    fn sine_gain(filter: &mut Biquad, freq: f32, sample_rate: f32) -> f32 {
        let n = (sample_rate as usize) / 2;
        let mut in_rms = 0.0f64;
        let mut out_rms = 0.0f64;
        for i in 0..n {
            let x = (2.0 * PI * freq * i as f32 / sample_rate).sin();
            let y = filter.process_sample(x);
            // Skip the startup transient.
            if i > n / 4 {
                in_rms += (x as f64) * (x as f64);
                out_rms += (y as f64) * (y as f64);
            }
        }
        (out_rms / in_rms).sqrt() as f32
    }

    #[test]
    fn lowpass_passes_low_and_rejects_high() {
        let fs = 44100.0;
        let mut lp = Biquad::lowpass(3000.0, std::f32::consts::FRAC_1_SQRT_2, fs);
        let low = sine_gain(&mut lp, 100.0, fs);
        lp.reset();
        let high = sine_gain(&mut lp, 12000.0, fs);
        assert!((low - 1.0).abs() < 0.05, "Passband gain should be ~1, got {low}");
        assert!(high < 0.1, "12 kHz should be strongly attenuated, got {high}");
    }

    #[test]
    fn bandpass_is_selective_around_center() {
        let fs = 44100.0;
        let mut bp = Biquad::bandpass(100.0, 40.0, fs);
        let center = sine_gain(&mut bp, 100.0, fs);
        bp.reset();
        let above = sine_gain(&mut bp, 400.0, fs);
        assert!((center - 1.0).abs() < 0.1, "Center gain should be ~1, got {center}");
        assert!(above < 0.2, "400 Hz should be rejected, got {above}");
    }

    #[test]
    fn noise_is_deterministic_and_bounded() {
        let mut a = NoiseSource::new(12345);
        let mut b = NoiseSource::new(12345);
        for _ in 0..1000 {
            let x = a.next();
            assert_eq!(x, b.next());
            assert!((-1.0..=1.0).contains(&x));
        }
    }
}
