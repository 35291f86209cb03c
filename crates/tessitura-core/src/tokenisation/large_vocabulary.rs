//! Note tokens fusing pitch and length

use serde::{Deserialize, Serialize};

use crate::durations::default_note_values;
use crate::error::TokenisationError;
use crate::message::MessageKind;
use crate::sequence::Sequence;
use crate::settings::Settings;
use crate::theory::CircleOfFifths;

use super::notelike::NOTELIKE_KINDS;
use super::vocabulary::{Band, LayoutBuilder};
use super::{
    BarClock, EncoderState, TOKEN_BAR, TOKEN_PAD, TOKEN_START, TOKEN_STOP, TokenId, Tokeniser,
    TokenisationFlags, Vocabulary, assemble, eighths_from_index, eighths_index, note_messages,
    pitch_from_index, pitch_index, rest_chunks, time_signature_eighths,
};

/// Position of a token in time and, for notes, in pitch space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub position: usize,
    /// Tick at which the token takes effect
    pub time: u64,
    /// Ticks since the last bar line
    pub bar_time: u64,
    /// Offset of the pitch from the lowest supported pitch
    pub pitch: Option<u8>,
    pub circle_of_fifths: Option<i32>,
}

/// `pad, sta, sto, bar, wai_XX, nte_XXX-val_XX, tsg_XX_08`
///
/// Every supported note value has its own band of pitches, in ascending value order.
#[derive(Debug, Clone)]
pub struct LargeVocabularyNotelikeTokeniser {
    flags: TokenisationFlags,
    state: EncoderState,
    vocabulary: Vocabulary,
    values: Vec<u64>,
    pitches: u32,
    wait: Band,
    note: Band,
    time_signature: Band,
}

impl LargeVocabularyNotelikeTokeniser {
    pub fn new(flags: TokenisationFlags) -> Self {
        Self::with_max_rest_value(flags, Settings::global().ppqn)
    }

    pub fn with_max_rest_value(flags: TokenisationFlags, max_rest_value: u64) -> Self {
        let mut values = default_note_values();
        values.sort_unstable();
        values.dedup();

        let settings = Settings::global();
        let mut layout = LayoutBuilder::new();
        layout.control("pad");
        layout.control("sta");
        layout.control("sto");
        layout.control("bar");
        let wait = layout.value_band("wai", max_rest_value);
        let note = layout.band(values.iter().flat_map(|value| {
            settings
                .pitch_range()
                .map(move |pitch| format!("nte_{pitch:03}-val_{value:02}"))
        }));
        let time_signature = layout.time_signature_band();
        let pitches = settings.pitch_range().count() as u32;

        Self {
            flags,
            state: EncoderState::default(),
            vocabulary: layout.finish(),
            values,
            pitches,
            wait,
            note,
            time_signature,
        }
    }

    /// Supported note values in ascending order.
    pub fn values(&self) -> &[u64] {
        &self.values
    }

    pub fn wait_band(&self) -> Band {
        self.wait
    }

    pub fn note_band(&self) -> Band {
        self.note
    }

    pub fn time_signature_band(&self) -> Band {
        self.time_signature
    }

    /// Pitch and value of a note token.
    pub fn note(&self, token: TokenId) -> Option<(u8, u64)> {
        let index = self.note.index(token)?;
        let value = *self.values.get((index / self.pitches) as usize)?;
        Some((pitch_from_index(index % self.pitches), value))
    }

    pub fn note_token(&self, pitch: u8, value: u64) -> Result<TokenId, TokenisationError> {
        let pitch = pitch_index(pitch)?;
        let value_index = self
            .values
            .binary_search(&value)
            .map_err(|_| TokenisationError::UnsupportedDuration(value))?;
        Ok(self.note.id(value_index as u32 * self.pitches + pitch))
    }

    fn flush_rests(&mut self, tokens: &mut Vec<TokenId>) {
        for chunk in rest_chunks(self.state.rest_buffer, u64::from(self.wait.len)) {
            tokens.push(self.wait.id(chunk as u32 - 1));
        }
        self.state.rest_buffer = 0;
    }

    /// Time, bar position and pitch information for every token.
    pub fn token_info(&self, tokens: &[TokenId]) -> Result<Vec<TokenInfo>, TokenisationError> {
        let lower = Settings::global().note_lower_bound;
        let mut time = 0;
        let mut bar_time = 0;
        let mut infos = Vec::with_capacity(tokens.len());

        for (position, &token) in tokens.iter().enumerate() {
            let mut info = TokenInfo {
                position,
                time,
                bar_time,
                pitch: None,
                circle_of_fifths: None,
            };
            match token {
                TOKEN_PAD | TOKEN_START | TOKEN_STOP => {}
                TOKEN_BAR => bar_time = 0,
                _ => {
                    if let Some(index) = self.wait.index(token) {
                        time += u64::from(index) + 1;
                        bar_time += u64::from(index) + 1;
                    } else if let Some((pitch, _)) = self.note(token) {
                        info.pitch = Some(pitch - lower);
                        info.circle_of_fifths = Some(CircleOfFifths::position(pitch));
                    } else if !self.time_signature.contains(token) {
                        return Err(TokenisationError::UnknownToken(token));
                    }
                }
            }
            infos.push(info);
        }
        Ok(infos)
    }
}

impl Tokeniser for LargeVocabularyNotelikeTokeniser {
    fn name(&self) -> &'static str {
        "large-vocabulary"
    }

    fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    fn flags(&self) -> TokenisationFlags {
        self.flags
    }

    fn tokenise(&mut self, sequence: &Sequence) -> Result<Vec<TokenId>, TokenisationError> {
        let ppqn = Settings::global().ppqn;
        let mut tokens = Vec::new();

        for (_, pairing) in sequence.interleaved_pairings(&NOTELIKE_KINDS, ppqn, true) {
            let start = pairing.start;
            if let MessageKind::Internal = start.kind {
                self.state.cur_time_target = self.state.cur_time_target.max(start.time);
                continue;
            }
            if start.time > self.state.cur_time {
                self.state.rest_buffer += start.time - self.state.cur_time;
                self.state.cur_time = start.time;
            }

            match start.kind {
                MessageKind::NoteOn { note, .. } => {
                    let value = pairing.duration().unwrap_or(0);
                    let token = self.note_token(note, value)?;
                    self.flush_rests(&mut tokens);
                    tokens.push(token);
                    self.state.prv_note = Some(note);
                    self.state.cur_time_target =
                        self.state.cur_time_target.max(self.state.cur_time + value);
                }
                MessageKind::TimeSignature {
                    numerator,
                    denominator,
                } => {
                    let eighths = time_signature_eighths(numerator, denominator)?;
                    let running = self.flags.running_time_signature;
                    if self.state.announce_time_signature(eighths, running) {
                        self.flush_rests(&mut tokens);
                        tokens.push(self.time_signature.id(eighths_index(eighths)));
                    }
                }
                _ => {}
            }
        }

        if self.state.cur_time_target > self.state.cur_time {
            self.state.rest_buffer += self.state.cur_time_target - self.state.cur_time;
        }
        self.flush_rests(&mut tokens);
        self.state.reset_time();
        Ok(tokens)
    }

    fn detokenise(&self, tokens: &[TokenId]) -> Result<Sequence, TokenisationError> {
        let mut clock = BarClock::new();
        let mut messages = Vec::new();

        for &token in tokens {
            match token {
                TOKEN_PAD | TOKEN_START | TOKEN_STOP => {}
                TOKEN_BAR => clock.bar(),
                _ => {
                    if let Some(index) = self.wait.index(token) {
                        clock.advance(u64::from(index) + 1);
                    } else if let Some((pitch, value)) = self.note(token) {
                        messages.extend(note_messages(pitch, clock.time, value));
                    } else if let Some(index) = self.time_signature.index(token) {
                        messages.push(clock.time_signature(eighths_from_index(index))?);
                    } else {
                        return Err(TokenisationError::UnknownToken(token));
                    }
                }
            }
        }
        Ok(assemble(messages, clock.time))
    }

    fn reset(&mut self) {
        self.state.reset();
    }

    fn reset_time(&mut self) {
        self.state.reset_time();
    }
}
