//! Polyphonic six-string instrument
//!
//! Holds a fixed bank of string voices in standard tuning, routes incoming
//! notes to the right string, mixes the bank down and colors it with the
//! stereo body pair. The two body channels resonate at slightly different
//! frequencies, which is what spreads the image.

use crate::body::GuitarBody;
use crate::karplus::KarplusVoice;
use crate::music::pitch_to_freq;
use crate::voice::{InstrumentConfig, StringVoice, Synthesis};
use crate::waveguide::WaveguideVoice;
use crate::MAX_BLOCK;

/// Standard tuning as (semitone, octave) pairs: E2 A2 D3 G3 B3 E4
const STANDARD_TUNING: [(i32, i32); 6] = [(4, 2), (9, 2), (2, 3), (7, 3), (11, 3), (4, 4)];

/// Helmholtz resonance centers for the two body channels
const RESONANCE_LEFT_HZ: f32 = 95.0;
const RESONANCE_RIGHT_HZ: f32 = 105.0;

/// Headroom applied to the final mix
const OUTPUT_SCALE: f32 = 0.3;

/// Six plucked strings, a stereo body, and a string-selection policy
pub struct Guitar {
    sample_rate: f32,
    config: InstrumentConfig,
    synthesis: Synthesis,
    voices: Vec<Box<dyn StringVoice>>,
    open_frequencies: Vec<f32>,
    body_left: GuitarBody,
    body_right: GuitarBody,
    resonance_enabled: bool,
    last_played: Option<usize>,

    // Scratch buffers, sized once so rendering never allocates.
    mix: Vec<f32>,
    voice_buf: Vec<f32>,
    left_buf: Vec<f32>,
    right_buf: Vec<f32>,
}

fn make_voice(
    synthesis: Synthesis,
    sample_rate: f32,
    frequency: f32,
    config: &InstrumentConfig,
) -> Box<dyn StringVoice> {
    match synthesis {
        Synthesis::KarplusStrong => {
            Box::new(KarplusVoice::new(sample_rate, frequency, config.stiffness))
        }
        Synthesis::DigitalWaveguide => Box::new(WaveguideVoice::new(sample_rate, frequency, config)),
    }
}

impl Guitar {
    pub fn new(sample_rate: f32, config: InstrumentConfig) -> Self {
        let synthesis = Synthesis::DigitalWaveguide;
        let open_frequencies: Vec<f32> = STANDARD_TUNING
            .iter()
            .map(|&(semitone, octave)| pitch_to_freq(semitone, octave))
            .collect();
        let voices = open_frequencies
            .iter()
            .map(|&freq| make_voice(synthesis, sample_rate, freq, &config))
            .collect();

        Guitar {
            sample_rate,
            config,
            synthesis,
            voices,
            open_frequencies,
            body_left: GuitarBody::new(sample_rate, RESONANCE_LEFT_HZ),
            body_right: GuitarBody::new(sample_rate, RESONANCE_RIGHT_HZ),
            resonance_enabled: true,
            last_played: None,
            mix: vec![0.0; MAX_BLOCK],
            voice_buf: vec![0.0; MAX_BLOCK],
            left_buf: vec![0.0; MAX_BLOCK],
            right_buf: vec![0.0; MAX_BLOCK],
        }
    }

    /// The thickest string that can fret up to `target`: the highest open
    /// frequency not above target + 1 Hz. Notes below the low E fall back
    /// to string 0.
    fn select_string(&self, target: f32) -> usize {
        let mut best: Option<(usize, f32)> = None;
        for (i, &open) in self.open_frequencies.iter().enumerate() {
            if open <= target + 1.0 && best.map_or(true, |(_, f)| open > f) {
                best = Some((i, open));
            }
        }
        best.map_or(0, |(i, _)| i)
    }

    /// Fret and pluck a note.
    pub fn play(&mut self, frequency: f32, velocity: f32, sustain: f32) {
        let index = self.select_string(frequency);
        self.voices[index].set_pitch(frequency, sustain);
        self.voices[index].excite(velocity);
        self.last_played = Some(index);

        // The attack also shakes the body directly; kicking the filters
        // with a tiny burst gives high notes their thump.
        self.body_left.kick(velocity);
        self.body_right.kick(velocity);
    }

    /// Render interleaved stereo into `out`.
    pub fn render(&mut self, out: &mut [f32]) {
        for block in out.chunks_mut(2 * MAX_BLOCK) {
            let frames = block.len() / 2;
            self.mix[..frames].fill(0.0);

            for voice in &mut self.voices {
                voice.render(&mut self.voice_buf[..frames]);
                for (acc, s) in self.mix[..frames].iter_mut().zip(&self.voice_buf[..frames]) {
                    *acc += *s;
                }
            }

            if self.resonance_enabled {
                self.body_left
                    .process_block(&self.mix[..frames], &mut self.left_buf[..frames]);
                self.body_right
                    .process_block(&self.mix[..frames], &mut self.right_buf[..frames]);
            } else {
                self.left_buf[..frames].copy_from_slice(&self.mix[..frames]);
                self.right_buf[..frames].copy_from_slice(&self.mix[..frames]);
            }

            for i in 0..frames {
                block[2 * i] = (self.left_buf[i] * OUTPUT_SCALE).clamp(-1.0, 1.0);
                block[2 * i + 1] = (self.right_buf[i] * OUTPUT_SCALE).clamp(-1.0, 1.0);
            }
        }
    }

    /// Swap the synthesis algorithm for every string.
    ///
    /// Swapping to the algorithm already in use is a no-op so ringing
    /// strings keep ringing; a real swap rebuilds the whole bank seeded
    /// with the open tunings.
    pub fn set_synthesis(&mut self, synthesis: Synthesis) {
        if synthesis == self.synthesis {
            return;
        }
        self.synthesis = synthesis;
        self.voices = self
            .open_frequencies
            .iter()
            .map(|&freq| make_voice(synthesis, self.sample_rate, freq, &self.config))
            .collect();
        self.last_played = None;
    }

    pub fn synthesis(&self) -> Synthesis {
        self.synthesis
    }

    pub fn set_resonance(&mut self, enabled: bool) {
        self.resonance_enabled = enabled;
    }

    pub fn resonance_enabled(&self) -> bool {
        self.resonance_enabled
    }

    /// Retarget every string's decay time.
    pub fn set_sustain(&mut self, sustain: f32) {
        for voice in &mut self.voices {
            let frequency = voice.frequency();
            voice.set_pitch(frequency, sustain);
        }
    }

    /// Retarget every string's stiffness (and retune around it).
    pub fn set_stiffness(&mut self, stiffness: f32) {
        for voice in &mut self.voices {
            voice.set_stiffness(stiffness);
        }
    }

    /// The actual loop frequency of the most recently played string.
    pub fn effective_frequency(&self) -> f32 {
        self.last_played
            .map_or(0.0, |i| self.voices[i].effective_frequency())
    }

    pub fn open_frequencies(&self) -> &[f32] {
        &self.open_frequencies
    }
}
