//! Note names, equal temperament, and open-chord voicings
//!
//! The DSP core deals only in Hz; everything here runs on the control side,
//! turning note spellings like `C#3` into frequencies before they are
//! submitted to the engine.

use thiserror::Error;

/// Why a note spelling failed to parse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NoteError {
    /// The leading letters are not one of C, C#, D, ... B.
    #[error("unknown pitch class in note `{0}`")]
    UnknownPitchClass(String),
    /// No octave digits, or digits that do not form an integer.
    #[error("missing or invalid octave in note `{0}`")]
    InvalidOctave(String),
}

/// Equal-temperament frequency for a pitch class (C = 0 ... B = 11) and
/// octave, referenced to A4 = 440 Hz.
#[inline]
pub fn pitch_to_freq(semitone: i32, octave: i32) -> f32 {
    let midi_note = semitone + (octave + 1) * 12;
    440.0 * 2.0_f32.powf((midi_note as f32 - 69.0) / 12.0)
}

/// Parse a note spelling of the form `[A-G][#]?[-]?digit` into Hz.
pub fn note_to_freq(note: &str) -> Result<f32, NoteError> {
    if !note.is_ascii() {
        return Err(NoteError::UnknownPitchClass(note.to_string()));
    }
    let class_len = if note.len() >= 2 && note.as_bytes().get(1) == Some(&b'#') {
        2
    } else {
        1
    };
    if note.len() <= class_len {
        return Err(NoteError::InvalidOctave(note.to_string()));
    }

    let semitone = match &note[..class_len] {
        "C" => 0,
        "C#" => 1,
        "D" => 2,
        "D#" => 3,
        "E" => 4,
        "F" => 5,
        "F#" => 6,
        "G" => 7,
        "G#" => 8,
        "A" => 9,
        "A#" => 10,
        "B" => 11,
        _ => return Err(NoteError::UnknownPitchClass(note.to_string())),
    };

    let octave: i32 = note[class_len..]
        .parse()
        .map_err(|_| NoteError::InvalidOctave(note.to_string()))?;

    Ok(pitch_to_freq(semitone, octave))
}

/// Standard open guitar voicings, low string first. `"x"` marks a muted
/// string; callers filter those before submitting frequencies.
pub const CHORD_SHAPES: [(&str, [&str; 6]); 10] = [
    ("C_Major", ["x", "C3", "E3", "G3", "C4", "E4"]),
    ("G_Major", ["G2", "B2", "D3", "G3", "B3", "G4"]),
    ("D_Major", ["x", "x", "D3", "A3", "D4", "F#4"]),
    ("A_Major", ["x", "A2", "E3", "A3", "C#4", "E4"]),
    ("E_Major", ["E2", "B2", "E3", "G#3", "B3", "E4"]),
    ("F_Major", ["F2", "C3", "F3", "A3", "C4", "F4"]),
    ("Am", ["x", "A2", "E3", "A3", "C4", "E4"]),
    ("Em", ["E2", "B2", "E3", "G3", "B3", "E4"]),
    ("Dm", ["x", "x", "D3", "A3", "D4", "F4"]),
    ("Bm", ["x", "B2", "F#3", "B3", "D4", "F#4"]),
];

/// Look up a chord voicing by name.
pub fn chord_shape(name: &str) -> Option<&'static [&'static str; 6]> {
    CHORD_SHAPES
        .iter()
        .find(|(chord, _)| *chord == name)
        .map(|(_, notes)| notes)
}

/// Frequencies for a named chord, muted strings filtered out.
pub fn chord_frequencies(name: &str) -> Option<Vec<f32>> {
    chord_shape(name).map(|notes| {
        notes
            .iter()
            .filter(|note| **note != "x")
            .filter_map(|note| note_to_freq(note).ok())
            .collect()
    })
}
