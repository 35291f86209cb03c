//! Event to token vocabularies
//!
//! Every tokeniser partitions a contiguous id space into bands (control tokens, rests, notes,
//! time signatures) and converts sequences into token streams and back. Tokenisers are
//! stateful: running flags compress repeated values across calls, so each worker owns its own
//! instance.

mod gridlike;
mod large_vocabulary;
pub mod mask;
mod midilike;
mod multi_track;
mod notelike;
mod transposed;
mod vocabulary;

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bar::Bar;
use crate::error::TokenisationError;
use crate::message::Message;
use crate::sequence::Sequence;
use crate::settings::Settings;

pub use gridlike::GridlikeTokeniser;
pub use large_vocabulary::{LargeVocabularyNotelikeTokeniser, TokenInfo};
pub use mask::{MaskState, masks};
pub use midilike::{CoFMidilikeTokeniser, StandardMidilikeTokeniser};
pub use multi_track::{MultiTrackConfig, MultiTrackLargeVocabularyNotelikeTokeniser};
pub use notelike::{CoFNotelikeTokeniser, StandardNotelikeTokeniser};
pub use transposed::TransposedNotelikeTokeniser;
pub use vocabulary::{Band, Vocabulary};

pub type TokenId = u32;

pub const TOKEN_PAD: TokenId = 0;
pub const TOKEN_START: TokenId = 1;
pub const TOKEN_STOP: TokenId = 2;
pub const TOKEN_BAR: TokenId = 3;

/// Time signature numerators, in eighths, that have a token.
pub const TIME_SIGNATURE_EIGHTHS: RangeInclusive<u8> = 2..=16;

/// Pitch the circle-of-fifths vocabularies measure their first note from (A4).
pub(crate) const ANCHOR_PITCH: u8 = 69;
pub(crate) const ANCHOR_OCTAVE: i32 = 4;

/// Suppression of tokens that repeat what the previous emission already established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenisationFlags {
    pub running_value: bool,
    pub running_pitch: bool,
    pub running_octave: bool,
    pub running_time_signature: bool,
}

/// Encoding state carried by a tokeniser instance across calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderState {
    pub cur_time: u64,
    /// Tick the pending rests have to reach at the end of the call
    pub cur_time_target: u64,
    pub rest_buffer: u64,
    pub prv_value: Option<u64>,
    pub prv_note: Option<u8>,
    pub prv_octave: Option<i32>,
    pub prv_numerator: Option<u8>,
}

impl EncoderState {
    pub fn reset_time(&mut self) {
        self.cur_time = 0;
        self.cur_time_target = 0;
        self.rest_buffer = 0;
    }

    pub fn reset_previous(&mut self) {
        self.prv_value = None;
        self.prv_note = None;
        self.prv_octave = None;
        self.prv_numerator = None;
    }

    pub fn reset(&mut self) {
        self.reset_time();
        self.reset_previous();
    }

    /// Whether a time signature token has to be emitted, recording it as the previous one.
    pub(crate) fn announce_time_signature(&mut self, eighths: u8, running: bool) -> bool {
        let repeated = running && self.prv_numerator == Some(eighths);
        self.prv_numerator = Some(eighths);
        !repeated
    }
}

/// Converts between sequences and token streams of one vocabulary.
pub trait Tokeniser: Send {
    fn name(&self) -> &'static str;
    fn vocabulary(&self) -> &Vocabulary;
    fn flags(&self) -> TokenisationFlags;
    fn tokenise(&mut self, sequence: &Sequence) -> Result<Vec<TokenId>, TokenisationError>;
    fn detokenise(&self, tokens: &[TokenId]) -> Result<Sequence, TokenisationError>;
    /// Forget all carried state.
    fn reset(&mut self);
    /// Forget timing state, keeping the running values.
    fn reset_time(&mut self);

    /// Token placed between consecutive bars by [`tokenise_bars`](Self::tokenise_bars).
    fn bar_separator(&self) -> Option<TokenId> {
        Some(TOKEN_BAR)
    }

    /// Tokenise a run of bars as `start, bar 1, separator, bar 2, ..., stop`.
    fn tokenise_bars(&mut self, bars: &[Bar]) -> Result<Vec<TokenId>, TokenisationError> {
        self.reset();
        let mut tokens = vec![TOKEN_START];
        for (i, bar) in bars.iter().enumerate() {
            if i > 0 {
                tokens.extend(self.bar_separator());
            }
            tokens.extend(self.tokenise(&bar.sequence)?);
        }
        tokens.push(TOKEN_STOP);
        tracing::debug!(
            tokeniser = self.name(),
            bars = bars.len(),
            tokens = tokens.len(),
            "Tokenised bars"
        );
        Ok(tokens)
    }
}

/// Every single-track vocabulary, addressable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokeniserKind {
    #[serde(rename = "midilike")]
    StandardMidilike,
    #[serde(rename = "cof-midilike")]
    CoFMidilike,
    #[serde(rename = "notelike")]
    StandardNotelike,
    #[serde(rename = "cof-notelike")]
    CoFNotelike,
    #[serde(rename = "large-vocabulary")]
    LargeVocabulary,
    #[serde(rename = "gridlike")]
    Gridlike,
    #[serde(rename = "transposed")]
    Transposed,
}

impl TokeniserKind {
    pub const ALL: [TokeniserKind; 7] = [
        Self::StandardMidilike,
        Self::CoFMidilike,
        Self::StandardNotelike,
        Self::CoFNotelike,
        Self::LargeVocabulary,
        Self::Gridlike,
        Self::Transposed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::StandardMidilike => "midilike",
            Self::CoFMidilike => "cof-midilike",
            Self::StandardNotelike => "notelike",
            Self::CoFNotelike => "cof-notelike",
            Self::LargeVocabulary => "large-vocabulary",
            Self::Gridlike => "gridlike",
            Self::Transposed => "transposed",
        }
    }

    pub fn build(self, flags: TokenisationFlags) -> Box<dyn Tokeniser> {
        match self {
            Self::StandardMidilike => Box::new(StandardMidilikeTokeniser::new(flags)),
            Self::CoFMidilike => Box::new(CoFMidilikeTokeniser::new(flags)),
            Self::StandardNotelike => Box::new(StandardNotelikeTokeniser::new(flags)),
            Self::CoFNotelike => Box::new(CoFNotelikeTokeniser::new(flags)),
            Self::LargeVocabulary => Box::new(LargeVocabularyNotelikeTokeniser::new(flags)),
            Self::Gridlike => Box::new(GridlikeTokeniser::new(flags)),
            Self::Transposed => Box::new(TransposedNotelikeTokeniser::new(flags)),
        }
    }
}

impl fmt::Display for TokeniserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TokeniserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|kind| kind.name()).collect();
                format!("unknown vocabulary '{s}', expected one of {}", known.join(", "))
            })
    }
}

// ============================================================================
// Shared encoding helpers
// ============================================================================

/// Bar length in eighths, e.g. 6 for 3/4 and 12 for 12/8.
pub fn time_signature_eighths(numerator: u8, denominator: u8) -> Result<u8, TokenisationError> {
    let scaled = u32::from(numerator) * 8;
    let denominator_wide = u32::from(denominator);
    if denominator == 0 || scaled % denominator_wide != 0 {
        return Err(TokenisationError::UnrepresentableTimeSignature(numerator, denominator));
    }
    u8::try_from(scaled / denominator_wide)
        .ok()
        .filter(|eighths| TIME_SIGNATURE_EIGHTHS.contains(eighths))
        .ok_or(TokenisationError::UnrepresentableTimeSignature(numerator, denominator))
}

pub(crate) fn eighths_index(eighths: u8) -> u32 {
    u32::from(eighths - TIME_SIGNATURE_EIGHTHS.start())
}

pub(crate) fn eighths_from_index(index: u32) -> u8 {
    TIME_SIGNATURE_EIGHTHS.start() + index as u8
}

pub(crate) fn default_eighths() -> u8 {
    let (numerator, denominator) = Settings::global().default_time_signature();
    time_signature_eighths(numerator, denominator).unwrap_or(8)
}

/// Index of `pitch` in the configured pitch range.
pub(crate) fn pitch_index(pitch: u8) -> Result<u32, TokenisationError> {
    let range = Settings::global().pitch_range();
    if range.contains(&pitch) {
        Ok(u32::from(pitch - range.start()))
    } else {
        Err(TokenisationError::PitchOutOfRange(pitch))
    }
}

pub(crate) fn pitch_from_index(index: u32) -> u8 {
    Settings::global().note_lower_bound + index as u8
}

/// Split `ticks` into chunks of at most `max`: full chunks first, then the remainder.
pub(crate) fn rest_chunks(mut ticks: u64, max: u64) -> Vec<u64> {
    let mut chunks = Vec::new();
    if max == 0 {
        return chunks;
    }
    while ticks > max {
        chunks.push(max);
        ticks -= max;
    }
    if ticks > 0 {
        chunks.push(ticks);
    }
    chunks
}

/// Octave of a MIDI pitch, C4 = 60.
pub(crate) fn octave_of(pitch: u8) -> i32 {
    i32::from(pitch) / 12 - 1
}

/// Pitch in `octave` with the pitch class of `class`.
pub(crate) fn pitch_in_octave(class: u8, octave: i32) -> Option<u8> {
    u8::try_from(i32::from(class % 12) + (octave + 1) * 12).ok()
}

// ============================================================================
// Shared decoding helpers
// ============================================================================

/// Tracks absolute time and the position inside the current bar while decoding.
#[derive(Debug, Clone)]
pub(crate) struct BarClock {
    pub time: u64,
    elapsed: u64,
    numerator: u8,
}

impl BarClock {
    pub fn new() -> Self {
        Self {
            time: 0,
            elapsed: 0,
            numerator: default_eighths(),
        }
    }

    pub fn capacity(&self) -> u64 {
        u64::from(self.numerator) * Settings::global().ppqn / 2
    }

    pub fn advance(&mut self, ticks: u64) {
        self.time += ticks;
        self.elapsed += ticks;
        let capacity = self.capacity();
        if capacity > 0 {
            self.elapsed %= capacity;
        }
    }

    pub fn bar(&mut self) {
        self.elapsed = 0;
    }

    /// Switch to a new numerator, only allowed on a bar line.
    pub fn time_signature(&mut self, eighths: u8) -> Result<Message, TokenisationError> {
        if self.elapsed != 0 {
            return Err(TokenisationError::MidBarTimeSignature(self.time));
        }
        self.numerator = eighths;
        Ok(Message::time_signature(eighths, 8).at(self.time))
    }
}

/// Build the decoded sequence, keeping trailing silence up to `end`.
pub(crate) fn assemble(mut messages: Vec<Message>, end: u64) -> Sequence {
    let last = messages.iter().map(|m| m.time).max();
    if end > 0 && last.is_none_or(|time| time < end) {
        messages.push(Message::internal().at(end));
    }
    Sequence::from_absolute_messages(messages)
}

/// Note on and off events of a decoded note.
pub(crate) fn note_messages(pitch: u8, start: u64, duration: u64) -> [Message; 2] {
    [
        Message::note_on(pitch, Settings::global().default_velocity).at(start),
        Message::note_off(pitch).at(start + duration),
    ]
}

/// Two bars in 4/4 covering single notes, a dotted note, a chord and trailing rests.
#[cfg(test)]
pub(crate) fn test_bars() -> Vec<Bar> {
    let sequence = Sequence::from_relative_messages(vec![
        Message::time_signature(4, 4),
        Message::note_on(60, 100),
        Message::wait(24),
        Message::note_off(60),
        Message::note_on(64, 100),
        Message::wait(12),
        Message::note_off(64),
        Message::wait(12),
        Message::note_on(67, 100),
        Message::wait(48),
        Message::note_off(67),
        Message::note_on(48, 100),
        Message::note_on(72, 100),
        Message::wait(72),
        Message::note_off(48),
        Message::note_off(72),
        Message::wait(24),
    ]);
    crate::bar::split_into_bars(&[sequence], 0, true)
        .map(|mut bars| bars.remove(0))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_signature_eighths() {
        assert_eq!(time_signature_eighths(4, 4), Ok(8));
        assert_eq!(time_signature_eighths(3, 4), Ok(6));
        assert_eq!(time_signature_eighths(12, 8), Ok(12));
        assert_eq!(time_signature_eighths(2, 2), Ok(8));
        assert_eq!(
            time_signature_eighths(5, 16),
            Err(TokenisationError::UnrepresentableTimeSignature(5, 16))
        );
        assert_eq!(
            time_signature_eighths(1, 8),
            Err(TokenisationError::UnrepresentableTimeSignature(1, 8))
        );
        assert_eq!(
            time_signature_eighths(4, 0),
            Err(TokenisationError::UnrepresentableTimeSignature(4, 0))
        );
    }

    #[test]
    fn test_rest_chunks() {
        assert_eq!(rest_chunks(50, 24), vec![24, 24, 2]);
        assert_eq!(rest_chunks(48, 24), vec![24, 24]);
        assert_eq!(rest_chunks(0, 24), Vec::<u64>::new());
    }

    #[test]
    fn test_bar_clock_rejects_mid_bar_signature() {
        let mut clock = BarClock::new();
        assert_eq!(clock.capacity(), 96);
        clock.advance(24);
        assert_eq!(
            clock.time_signature(6),
            Err(TokenisationError::MidBarTimeSignature(24))
        );
        clock.advance(72);
        assert_eq!(clock.elapsed, 0);
        assert!(clock.time_signature(6).is_ok());
        assert_eq!(clock.capacity(), 72);
    }

    #[test]
    fn test_kind_names() {
        for kind in TokeniserKind::ALL {
            assert_eq!(kind.name().parse::<TokeniserKind>(), Ok(kind));
            assert_eq!(kind.build(TokenisationFlags::default()).name(), kind.name());
        }
        assert!("abc".parse::<TokeniserKind>().is_err());
    }

    #[test]
    fn test_octaves() {
        assert_eq!(octave_of(60), 4);
        assert_eq!(octave_of(69), 4);
        assert_eq!(pitch_in_octave(9, 4), Some(69));
        assert_eq!(pitch_in_octave(0, -2), None);
    }
}
