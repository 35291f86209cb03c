//! String vocabulary spanning several tracks: one bar of every track per call

use serde::{Deserialize, Serialize};

use crate::bar::Bar;
use crate::durations::{bin_velocity, default_note_values, default_step_sizes, velocity_bins};
use crate::error::TokenisationError;
use crate::message::{Message, MessageKind, MessageType};
use crate::sequence::Sequence;
use crate::settings::Settings;

use super::{
    EncoderState, TIME_SIGNATURE_EIGHTHS, TokenId, Vocabulary, assemble, default_eighths,
    pitch_index, time_signature_eighths,
};

const PAIRING_KINDS: [MessageType; 3] =
    [MessageType::NoteOn, MessageType::NoteOff, MessageType::Internal];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiTrackConfig {
    pub tracks: u8,
    /// Spell a note as one `trk-pit-val-vel` token instead of four
    pub fused: bool,
    pub velocity_bins: u8,
    pub running_time_signature: bool,
    /// Rest sizes available to the greedy rest decomposition
    pub step_sizes: Vec<u64>,
    pub note_values: Vec<u64>,
}

impl Default for MultiTrackConfig {
    fn default() -> Self {
        Self {
            tracks: 1,
            fused: true,
            velocity_bins: Settings::global().velocity_bins,
            running_time_signature: false,
            step_sizes: default_step_sizes(0, 1),
            note_values: default_note_values(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NoteAttributes {
    track: u8,
    pitch: u8,
    value: u64,
    velocity: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Meaning {
    Pad,
    Start,
    Stop,
    Bar,
    Rest(u64),
    Track(u8),
    Pitch(u8),
    Value(u64),
    Velocity(u8),
    Note(NoteAttributes),
    TimeSignature(u8),
}

fn rest_name(ticks: u64) -> String {
    format!("rst_{ticks:02}")
}

fn track_name(track: u8) -> String {
    format!("trk_{track:02}")
}

fn pitch_name(pitch: u8) -> String {
    format!("pit_{pitch:03}")
}

fn value_name(value: u64) -> String {
    format!("val_{value:02}")
}

fn velocity_name(velocity: u8) -> String {
    format!("vel_{velocity:03}")
}

fn note_name(note: &NoteAttributes) -> String {
    format!(
        "{}-{}-{}-{}",
        track_name(note.track),
        pitch_name(note.pitch),
        value_name(note.value),
        velocity_name(note.velocity)
    )
}

fn time_signature_name(eighths: u8) -> String {
    format!("tsg_{eighths:02}_08")
}

fn capacity(eighths: u8) -> u64 {
    u64::from(eighths) * Settings::global().ppqn / 2
}

/// `pad, sta, sto, bar, rst_XX, trk_XX, pit_XXX, val_XX, vel_XXX, tsg_XX_08`
///
/// Works on string tokens. Each call encodes one bar of every track, notes of all tracks
/// interleaved by onset, and ends in a `bar` token covering whatever the bar has left.
#[derive(Debug, Clone)]
pub struct MultiTrackLargeVocabularyNotelikeTokeniser {
    config: MultiTrackConfig,
    state: EncoderState,
    vocabulary: Vocabulary,
    meanings: Vec<Meaning>,
    /// Descending
    steps: Vec<u64>,
    /// Ascending
    values: Vec<u64>,
    /// Upper bin edges, ascending
    velocities: Vec<u8>,
}

impl MultiTrackLargeVocabularyNotelikeTokeniser {
    pub fn new(config: MultiTrackConfig) -> Self {
        let settings = Settings::global();

        let mut steps = config.step_sizes.clone();
        steps.retain(|&step| step > 0);
        steps.sort_unstable_by(|a, b| b.cmp(a));
        steps.dedup();
        let mut values = config.note_values.clone();
        values.retain(|&value| value > 0);
        values.sort_unstable();
        values.dedup();
        let mut velocities = velocity_bins(settings.velocity_max, config.velocity_bins);
        velocities.dedup();

        let mut entries: Vec<(String, Meaning)> = vec![
            ("pad".into(), Meaning::Pad),
            ("sta".into(), Meaning::Start),
            ("sto".into(), Meaning::Stop),
            ("bar".into(), Meaning::Bar),
        ];
        entries.extend(
            steps
                .iter()
                .rev()
                .map(|&step| (rest_name(step), Meaning::Rest(step))),
        );

        if config.fused {
            for track in 0..config.tracks {
                for pitch in settings.pitch_range() {
                    for &value in &values {
                        for &velocity in &velocities {
                            let note = NoteAttributes {
                                track,
                                pitch,
                                value,
                                velocity,
                            };
                            entries.push((note_name(&note), Meaning::Note(note)));
                        }
                    }
                }
            }
        } else {
            entries.extend((0..config.tracks).map(|t| (track_name(t), Meaning::Track(t))));
            entries.extend(
                settings
                    .pitch_range()
                    .map(|p| (pitch_name(p), Meaning::Pitch(p))),
            );
            entries.extend(values.iter().map(|&v| (value_name(v), Meaning::Value(v))));
            entries.extend(
                velocities
                    .iter()
                    .map(|&v| (velocity_name(v), Meaning::Velocity(v))),
            );
        }

        entries.extend(
            TIME_SIGNATURE_EIGHTHS.map(|e| (time_signature_name(e), Meaning::TimeSignature(e))),
        );

        let (names, meanings): (Vec<String>, Vec<Meaning>) = entries.into_iter().unzip();
        Self {
            config,
            state: EncoderState::default(),
            vocabulary: Vocabulary::from_unique(names),
            meanings,
            steps,
            values,
            velocities,
        }
    }

    pub fn config(&self) -> &MultiTrackConfig {
        &self.config
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// String tokens to ids.
    pub fn encode<S: AsRef<str>>(&self, tokens: &[S]) -> Result<Vec<TokenId>, TokenisationError> {
        self.vocabulary.encode(tokens)
    }

    /// Ids to string tokens.
    pub fn decode(&self, tokens: &[TokenId]) -> Result<Vec<String>, TokenisationError> {
        self.vocabulary.decode(tokens)
    }

    fn velocity_edge(&self, velocity: u8) -> u8 {
        let index = bin_velocity(velocity, &self.velocities);
        self.velocities
            .get(index)
            .or(self.velocities.last())
            .copied()
            .unwrap_or(velocity)
    }

    /// Greedy decomposition over the step sizes, largest first.
    fn flush_rests(&self, mut ticks: u64, tokens: &mut Vec<String>) -> Result<(), TokenisationError> {
        for &step in &self.steps {
            while ticks >= step {
                tokens.push(rest_name(step));
                ticks -= step;
            }
        }
        if ticks > 0 {
            return Err(TokenisationError::InvalidRest(ticks));
        }
        Ok(())
    }

    fn push_note(&self, note: NoteAttributes, tokens: &mut Vec<String>) {
        if self.config.fused {
            tokens.push(note_name(&note));
        } else {
            tokens.push(track_name(note.track));
            tokens.push(pitch_name(note.pitch));
            tokens.push(value_name(note.value));
            tokens.push(velocity_name(note.velocity));
        }
    }

    /// Encode one bar per track, all covering the same span of time.
    pub fn tokenise(&mut self, bars: &[Bar]) -> Result<Vec<String>, TokenisationError> {
        let expected = usize::from(self.config.tracks);
        if bars.len() != expected {
            return Err(TokenisationError::TrackCountMismatch {
                expected,
                found: bars.len(),
            });
        }
        let Some(first) = bars.first() else {
            return Ok(Vec::new());
        };

        let mut tokens = Vec::new();
        let eighths = time_signature_eighths(first.numerator, first.denominator)?;
        if self
            .state
            .announce_time_signature(eighths, self.config.running_time_signature)
        {
            tokens.push(time_signature_name(eighths));
        }

        let mut messages = Vec::new();
        for (track, bar) in bars.iter().enumerate() {
            if (bar.numerator, bar.denominator) != (first.numerator, first.denominator) {
                tracing::warn!(
                    track,
                    numerator = bar.numerator,
                    denominator = bar.denominator,
                    "Track disagrees on the time signature, using the first track's"
                );
            }
            messages.extend(
                bar.sequence
                    .abs()
                    .messages()
                    .iter()
                    .map(|m| m.on_channel(track as u8)),
            );
        }
        let merged = Sequence::from_absolute_messages(messages);

        let ppqn = Settings::global().ppqn;
        for (track, pairing) in merged.interleaved_pairings(&PAIRING_KINDS, ppqn, true) {
            let MessageKind::NoteOn { note, velocity } = pairing.start.kind else {
                continue;
            };
            pitch_index(note)?;
            let value = pairing.duration().unwrap_or(0);
            if self.values.binary_search(&value).is_err() {
                return Err(TokenisationError::UnsupportedDuration(value));
            }

            let start = pairing.start.time;
            if start > self.state.cur_time {
                self.flush_rests(start - self.state.cur_time, &mut tokens)?;
                self.state.cur_time = start;
            }
            self.push_note(
                NoteAttributes {
                    track,
                    pitch: note,
                    value,
                    velocity: self.velocity_edge(velocity),
                },
                &mut tokens,
            );
        }

        tokens.push("bar".into());
        self.state.reset_time();
        Ok(tokens)
    }

    /// `sta`, every step of parallel bars, `sto`.
    ///
    /// `steps[i]` holds the i-th bar of every track.
    pub fn tokenise_bars(&mut self, steps: &[Vec<Bar>]) -> Result<Vec<String>, TokenisationError> {
        self.reset();
        let mut tokens = vec!["sta".to_string()];
        for bars in steps {
            tokens.extend(self.tokenise(bars)?);
        }
        tokens.push("sto".into());
        tracing::debug!(bars = steps.len(), tokens = tokens.len(), "Tokenised multi-track bars");
        Ok(tokens)
    }

    /// One sequence per track.
    pub fn detokenise<S: AsRef<str>>(
        &self,
        tokens: &[S],
    ) -> Result<Vec<Sequence>, TokenisationError> {
        let mut tracks: Vec<Vec<Message>> = vec![Vec::new(); usize::from(self.config.tracks)];
        let mut bar_start = 0;
        let mut bar_time = 0;
        let mut bar_capacity = capacity(default_eighths());

        let mut track: Option<u8> = None;
        let mut pitch: Option<u8> = None;
        let mut value: Option<u64> = None;

        for token in tokens {
            let name = token.as_ref();
            let id = self
                .vocabulary
                .id(name)
                .ok_or_else(|| TokenisationError::UnknownTokenString(name.to_string()))?;
            let meaning = self
                .meanings
                .get(id as usize)
                .copied()
                .ok_or(TokenisationError::UnknownToken(id))?;

            let note = match meaning {
                Meaning::Pad | Meaning::Start | Meaning::Stop => None,
                Meaning::Bar => {
                    bar_start += bar_capacity;
                    bar_time = 0;
                    None
                }
                Meaning::Rest(ticks) => {
                    let remaining = bar_capacity.saturating_sub(bar_time);
                    if ticks > remaining {
                        return Err(TokenisationError::CapacityUnderflow {
                            token: id,
                            required: ticks,
                            remaining,
                        });
                    }
                    bar_time += ticks;
                    None
                }
                Meaning::TimeSignature(eighths) => {
                    if bar_time != 0 {
                        return Err(TokenisationError::MidBarTimeSignature(bar_start + bar_time));
                    }
                    bar_capacity = capacity(eighths);
                    for messages in &mut tracks {
                        messages.push(Message::time_signature(eighths, 8).at(bar_start));
                    }
                    None
                }
                Meaning::Track(t) => {
                    track = Some(t);
                    None
                }
                Meaning::Pitch(p) => {
                    pitch = Some(p);
                    None
                }
                Meaning::Value(v) => {
                    value = Some(v);
                    None
                }
                Meaning::Velocity(velocity) => {
                    let note = NoteAttributes {
                        track: track.take().unwrap_or(0),
                        pitch: pitch.take().ok_or(TokenisationError::UndefinedPitch(id))?,
                        value: value.take().ok_or(TokenisationError::UndefinedValue(id))?,
                        velocity,
                    };
                    Some(note)
                }
                Meaning::Note(note) => Some(note),
            };

            if let Some(note) = note {
                let start = bar_start + bar_time;
                if let Some(messages) = tracks.get_mut(usize::from(note.track)) {
                    messages.push(Message::note_on(note.pitch, note.velocity).at(start));
                    messages.push(Message::note_off(note.pitch).at(start + note.value));
                }
            }
        }

        let end = bar_start + bar_time;
        Ok(tracks
            .into_iter()
            .map(|messages| assemble(messages, end))
            .collect())
    }
}
