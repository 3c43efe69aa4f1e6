//! Control-thread to audio-thread bridge
//!
//! The engine splits into two halves at construction:
//!
//! - [`EngineController`] lives on the control side (UI, sequencers). It is
//!   cheap to clone, may block freely, and only ever enqueues commands.
//! - [`AudioProcessor`] moves onto the audio thread. It owns the instrument
//!   and all DSP state, drains the command queue at the start of every
//!   block, and renders. It never locks, blocks or allocates.
//!
//! Commands travel over a lock-free ring buffer and become audible at the
//! next block boundary, never mid-block. Anomalies are clamped on the audio
//! thread and surfaced through a one-slot warning atomic the control thread
//! polls.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use ringbuf::{traits::*, HeapRb};

use crate::guitar::Guitar;
use crate::voice::{InstrumentConfig, Synthesis};
use crate::MIN_FREQUENCY;

/// Depth of the command ring. A strum is six commands; 256 is plenty of
/// headroom for any realistic control burst between two audio blocks.
const COMMAND_CAPACITY: usize = 256;

/// Control-side requests understood by the audio thread.
#[derive(Debug, Clone, Copy)]
pub enum EngineCommand {
    /// Pluck a note at the given pitch.
    NoteOn {
        frequency: f32,
        velocity: f32,
        sustain: f32,
    },
    /// Move the sustain slider (0..1); every voice retargets its decay.
    SetSustain { seconds: f32 },
    /// Set the dispersion stiffness, in [-1, 0], on every voice.
    SetStiffness { value: f32 },
    /// Toggle the resonant body.
    SetResonance(bool),
    /// Swap the string synthesis algorithm.
    SetSynthesis(Synthesis),
}

/// A command stamped with its enqueue order.
#[derive(Debug, Clone, Copy)]
pub struct Command {
    pub seq: u64,
    pub kind: EngineCommand,
}

/// Anomalies reported from the audio thread (and a full queue on the
/// control side). One slot, latest wins, read-and-clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineWarning {
    /// A note-on frequency fell outside the representable range and was
    /// clamped. Reported once per engine lifetime.
    FrequencyClamped,
    /// The host signalled an output underrun.
    Underrun,
    /// The command ring was full and a command was dropped.
    QueueFull,
}

const WARN_NONE: u8 = 0;
const WARN_FREQUENCY_CLAMPED: u8 = 1;
const WARN_UNDERRUN: u8 = 2;
const WARN_QUEUE_FULL: u8 = 3;

fn decode_warning(raw: u8) -> Option<EngineWarning> {
    match raw {
        WARN_FREQUENCY_CLAMPED => Some(EngineWarning::FrequencyClamped),
        WARN_UNDERRUN => Some(EngineWarning::Underrun),
        WARN_QUEUE_FULL => Some(EngineWarning::QueueFull),
        _ => None,
    }
}

/// Strum direction: down goes low string to high, up the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrumDirection {
    Down,
    Up,
}

struct Shared {
    /// Producer half of the command ring. The mutex admits any number of
    /// control threads; the audio thread never touches it.
    producer: Mutex<ringbuf::HeapProd<Command>>,
    warning: AtomicU8,
    sequence: AtomicU64,
}

/// Build an engine: the controller stays on the calling thread, the
/// processor moves into the audio callback.
pub fn create_engine(
    sample_rate: f32,
    config: InstrumentConfig,
) -> (EngineController, AudioProcessor) {
    let rb = HeapRb::new(COMMAND_CAPACITY);
    let (producer, consumer) = rb.split();

    let shared = Arc::new(Shared {
        producer: Mutex::new(producer),
        warning: AtomicU8::new(WARN_NONE),
        sequence: AtomicU64::new(0),
    });

    let controller = EngineController {
        shared: Arc::clone(&shared),
    };
    let processor = AudioProcessor {
        guitar: Guitar::new(sample_rate, config),
        consumer,
        shared,
        sample_rate,
        clamp_reported: false,
    };
    (controller, processor)
}

/// Clonable control surface. Every method enqueues a command; nothing takes
/// effect until the audio thread crosses its next block boundary.
#[derive(Clone)]
pub struct EngineController {
    shared: Arc<Shared>,
}

impl EngineController {
    fn send(&self, kind: EngineCommand) {
        let seq = self.shared.sequence.fetch_add(1, Ordering::Relaxed);
        let command = Command { seq, kind };
        if self.shared.producer.lock().try_push(command).is_err() {
            log::warn!("command ring full, dropping {kind:?}");
            self.shared
                .warning
                .store(WARN_QUEUE_FULL, Ordering::Relaxed);
        }
    }

    /// Pluck a note.
    pub fn note_on(&self, frequency: f32, velocity: f32, sustain: f32) {
        self.send(EngineCommand::NoteOn {
            frequency,
            velocity,
            sustain,
        });
    }

    /// Move the sustain slider (0..1 from the UI).
    pub fn set_sustain(&self, seconds: f32) {
        self.send(EngineCommand::SetSustain { seconds });
    }

    /// Set string stiffness in [-1, 0].
    pub fn set_stiffness(&self, value: f32) {
        self.send(EngineCommand::SetStiffness { value });
    }

    /// Toggle the resonant body.
    pub fn set_resonance(&self, enabled: bool) {
        self.send(EngineCommand::SetResonance(enabled));
    }

    /// Swap the synthesis algorithm.
    pub fn set_synthesis(&self, synthesis: Synthesis) {
        log::info!("requesting synthesis swap to {synthesis:?}");
        self.send(EngineCommand::SetSynthesis(synthesis));
    }

    /// Strum a chord on a background thread: notes fire lowest first (or
    /// highest for an up-strum), spread over `duration` seconds, with the
    /// velocity of every note after the first humanized into [0.8, 1.0].
    ///
    /// The thread is detached by dropping the returned handle; it dies with
    /// the process.
    pub fn strum(
        &self,
        mut frequencies: Vec<f32>,
        duration: f32,
        direction: StrumDirection,
        sustain: f32,
    ) -> thread::JoinHandle<()> {
        let controller = self.clone();
        thread::spawn(move || {
            frequencies.sort_by(|a, b| a.total_cmp(b));
            if direction == StrumDirection::Up {
                frequencies.reverse();
            }
            let count = frequencies.len();
            if count == 0 {
                return;
            }

            let delay = (duration / count.saturating_sub(1).max(1) as f32).max(0.0);
            let mut rng = rand::thread_rng();
            for (i, freq) in frequencies.into_iter().enumerate() {
                let velocity = if i == 0 { 1.0 } else { rng.gen_range(0.8..=1.0) };
                controller.note_on(freq, velocity, sustain);
                if i + 1 < count {
                    thread::sleep(Duration::from_secs_f32(delay));
                }
            }
        })
    }

    /// Read and clear the latest warning.
    pub fn take_warning(&self) -> Option<EngineWarning> {
        decode_warning(self.shared.warning.swap(WARN_NONE, Ordering::Relaxed))
    }
}

/// Audio-thread half: owns the instrument, applies commands at block
/// boundaries, renders interleaved stereo.
pub struct AudioProcessor {
    guitar: Guitar,
    consumer: ringbuf::HeapCons<Command>,
    shared: Arc<Shared>,
    sample_rate: f32,
    clamp_reported: bool,
}

impl AudioProcessor {
    /// Render one host block of interleaved stereo. Pending commands are
    /// applied first, in FIFO order, so they become audible exactly at this
    /// block boundary.
    pub fn render(&mut self, out: &mut [f32]) {
        while let Some(command) = self.consumer.try_pop() {
            self.apply(command.kind);
        }
        self.guitar.render(out);
    }

    fn apply(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::NoteOn {
                frequency,
                velocity,
                sustain,
            } => {
                let clamped = frequency.clamp(MIN_FREQUENCY, self.sample_rate / 2.0);
                if clamped != frequency && !self.clamp_reported {
                    self.shared
                        .warning
                        .store(WARN_FREQUENCY_CLAMPED, Ordering::Relaxed);
                    self.clamp_reported = true;
                }
                self.guitar.play(clamped, velocity, sustain.max(0.05));
            }
            EngineCommand::SetSustain { seconds } => {
                // Slider mapping: 0..1 becomes roughly 0.1..10.1 seconds.
                let mapped = 10.0 * (seconds - 0.5) / 0.5 + 0.1;
                self.guitar.set_sustain(mapped.max(0.05));
            }
            EngineCommand::SetStiffness { value } => {
                self.guitar.set_stiffness(value.clamp(-1.0, 0.0));
            }
            EngineCommand::SetResonance(enabled) => {
                self.guitar.set_resonance(enabled);
            }
            EngineCommand::SetSynthesis(synthesis) => {
                self.guitar.set_synthesis(synthesis);
            }
        }
    }

    /// Forward a host-reported output underrun to the status slot.
    pub fn note_underrun(&self) {
        self.shared.warning.store(WARN_UNDERRUN, Ordering::Relaxed);
    }

    /// The actual loop frequency of the most recently played string.
    pub fn effective_frequency(&self) -> f32 {
        self.guitar.effective_frequency()
    }

    /// Direct access to the instrument, for hosts that render offline.
    pub fn guitar(&self) -> &Guitar {
        &self.guitar
    }
}
