//! Event-by-event vocabularies: every note on and note off is its own token

use crate::error::TokenisationError;
use crate::message::{Message, MessageKind};
use crate::sequence::Sequence;
use crate::settings::Settings;
use crate::theory::CircleOfFifths;

use super::vocabulary::{Band, LayoutBuilder};
use super::{
    ANCHOR_OCTAVE, ANCHOR_PITCH, BarClock, EncoderState, TOKEN_BAR, TOKEN_PAD, TOKEN_START,
    TOKEN_STOP, TokenId, Tokeniser, TokenisationFlags, Vocabulary, assemble, eighths_from_index,
    eighths_index, octave_of, pitch_from_index, pitch_in_octave, pitch_index, rest_chunks,
    time_signature_eighths,
};

/// Octave shifts representable by a single token.
const OCTAVE_SHIFTS: std::ops::RangeInclusive<i32> = -8..=8;
/// Circle-of-fifths steps representable by a single token.
const FIFTHS: std::ops::RangeInclusive<i32> = -5..=6;

#[derive(Debug, Clone, Copy)]
enum NoteEdge {
    On,
    Off,
}

/// Walks the relative messages of a sequence, buffering waits until the next token that needs
/// them. `note` writes the tokens of one note edge.
fn encode_events<F>(
    sequence: &Sequence,
    state: &mut EncoderState,
    flags: TokenisationFlags,
    wait: Band,
    time_signature: Band,
    mut note: F,
) -> Result<Vec<TokenId>, TokenisationError>
where
    F: FnMut(&mut EncoderState, NoteEdge, u8, &mut Vec<TokenId>) -> Result<(), TokenisationError>,
{
    let mut tokens = Vec::new();
    let flush = |state: &mut EncoderState, tokens: &mut Vec<TokenId>| {
        for chunk in rest_chunks(state.rest_buffer, u64::from(wait.len)) {
            tokens.push(wait.id(chunk as u32 - 1));
        }
        state.rest_buffer = 0;
    };

    for message in sequence.rel().messages() {
        match message.kind {
            MessageKind::Wait { ticks } => {
                state.rest_buffer += ticks;
                state.cur_time += ticks;
            }
            MessageKind::NoteOn { note: pitch, .. } => {
                flush(state, &mut tokens);
                note(state, NoteEdge::On, pitch, &mut tokens)?;
            }
            MessageKind::NoteOff { note: pitch } => {
                flush(state, &mut tokens);
                note(state, NoteEdge::Off, pitch, &mut tokens)?;
            }
            MessageKind::TimeSignature {
                numerator,
                denominator,
            } => {
                let eighths = time_signature_eighths(numerator, denominator)?;
                flush(state, &mut tokens);
                if state.announce_time_signature(eighths, flags.running_time_signature) {
                    tokens.push(time_signature.id(eighths_index(eighths)));
                }
            }
            _ => {}
        }
    }
    flush(state, &mut tokens);
    state.reset_time();
    Ok(tokens)
}

/// Decodes the control, wait and time signature tokens shared by both variants and hands every
/// other token to `note`. Returns the decoded sequence.
fn decode_events<F>(
    tokens: &[TokenId],
    wait: Band,
    time_signature: Band,
    mut note: F,
) -> Result<Sequence, TokenisationError>
where
    F: FnMut(TokenId, u64, &mut Vec<Message>) -> Result<(), TokenisationError>,
{
    let mut clock = BarClock::new();
    let mut messages = Vec::new();

    for &token in tokens {
        match token {
            TOKEN_PAD | TOKEN_START | TOKEN_STOP => {}
            TOKEN_BAR => clock.bar(),
            _ => {
                if let Some(index) = wait.index(token) {
                    clock.advance(u64::from(index) + 1);
                } else if let Some(index) = time_signature.index(token) {
                    messages.push(clock.time_signature(eighths_from_index(index))?);
                } else {
                    note(token, clock.time, &mut messages)?;
                }
            }
        }
    }
    Ok(assemble(messages, clock.time))
}

// ============================================================================
// Standard
// ============================================================================

/// `pad, sta, sto, bar, wai_XX, non_XXX, nof_XXX, tsg_XX_08`
#[derive(Debug, Clone)]
pub struct StandardMidilikeTokeniser {
    flags: TokenisationFlags,
    state: EncoderState,
    vocabulary: Vocabulary,
    wait: Band,
    note_on: Band,
    note_off: Band,
    time_signature: Band,
}

impl StandardMidilikeTokeniser {
    pub fn new(flags: TokenisationFlags) -> Self {
        Self::with_max_rest_value(flags, Settings::global().ppqn)
    }

    pub fn with_max_rest_value(flags: TokenisationFlags, max_rest_value: u64) -> Self {
        let mut layout = LayoutBuilder::new();
        layout.control("pad");
        layout.control("sta");
        layout.control("sto");
        layout.control("bar");
        let wait = layout.value_band("wai", max_rest_value);
        let note_on = layout.pitch_band("non");
        let note_off = layout.pitch_band("nof");
        let time_signature = layout.time_signature_band();

        Self {
            flags,
            state: EncoderState::default(),
            vocabulary: layout.finish(),
            wait,
            note_on,
            note_off,
            time_signature,
        }
    }

    pub fn state(&self) -> &EncoderState {
        &self.state
    }
}

impl Tokeniser for StandardMidilikeTokeniser {
    fn name(&self) -> &'static str {
        "midilike"
    }

    fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    fn flags(&self) -> TokenisationFlags {
        self.flags
    }

    fn tokenise(&mut self, sequence: &Sequence) -> Result<Vec<TokenId>, TokenisationError> {
        let (note_on, note_off) = (self.note_on, self.note_off);
        encode_events(
            sequence,
            &mut self.state,
            self.flags,
            self.wait,
            self.time_signature,
            |_, edge, pitch, tokens| {
                let band = match edge {
                    NoteEdge::On => note_on,
                    NoteEdge::Off => note_off,
                };
                tokens.push(band.id(pitch_index(pitch)?));
                Ok(())
            },
        )
    }

    fn detokenise(&self, tokens: &[TokenId]) -> Result<Sequence, TokenisationError> {
        let velocity = Settings::global().default_velocity;
        decode_events(tokens, self.wait, self.time_signature, |token, time, messages| {
            if let Some(index) = self.note_on.index(token) {
                messages.push(Message::note_on(pitch_from_index(index), velocity).at(time));
            } else if let Some(index) = self.note_off.index(token) {
                messages.push(Message::note_off(pitch_from_index(index)).at(time));
            } else {
                return Err(TokenisationError::UnknownToken(token));
            }
            Ok(())
        })
    }

    fn reset(&mut self) {
        self.state.reset();
    }

    fn reset_time(&mut self) {
        self.state.reset_time();
    }
}

// ============================================================================
// Circle of fifths
// ============================================================================

/// Midilike with relative pitches: an octave shift followed by the distance on the circle of
/// fifths from the previous note.
///
/// `pad, sta, sto, bar, wai_XX, oct_+XX, con_+XX, cof_+XX, tsg_XX_08`
#[derive(Debug, Clone)]
pub struct CoFMidilikeTokeniser {
    flags: TokenisationFlags,
    state: EncoderState,
    vocabulary: Vocabulary,
    wait: Band,
    octave: Band,
    note_on: Band,
    note_off: Band,
    time_signature: Band,
}

impl CoFMidilikeTokeniser {
    pub fn new(flags: TokenisationFlags) -> Self {
        Self::with_max_rest_value(flags, Settings::global().ppqn)
    }

    pub fn with_max_rest_value(flags: TokenisationFlags, max_rest_value: u64) -> Self {
        let mut layout = LayoutBuilder::new();
        layout.control("pad");
        layout.control("sta");
        layout.control("sto");
        layout.control("bar");
        let wait = layout.value_band("wai", max_rest_value);
        let octave = layout.signed_band("oct", OCTAVE_SHIFTS);
        let note_on = layout.signed_band("con", FIFTHS);
        let note_off = layout.signed_band("cof", FIFTHS);
        let time_signature = layout.time_signature_band();

        Self {
            flags,
            state: EncoderState::default(),
            vocabulary: layout.finish(),
            wait,
            octave,
            note_on,
            note_off,
            time_signature,
        }
    }
}

/// Octave shift and circle-of-fifths tokens reaching `pitch` from the previous note.
pub(crate) fn encode_relative_pitch(
    state: &mut EncoderState,
    running_octave: bool,
    pitch: u8,
    octave: Band,
    fifths: Band,
    tokens: &mut Vec<TokenId>,
) -> Result<(), TokenisationError> {
    pitch_index(pitch)?;
    let target = octave_of(pitch);
    let previous = state.prv_octave.unwrap_or(ANCHOR_OCTAVE);
    if !(running_octave && previous == target) {
        let shift = target - previous;
        if !OCTAVE_SHIFTS.contains(&shift) {
            return Err(TokenisationError::PitchOutOfRange(pitch));
        }
        tokens.push(octave.id((shift - OCTAVE_SHIFTS.start()) as u32));
    }
    state.prv_octave = Some(target);

    let distance = CircleOfFifths::distance(state.prv_note.unwrap_or(ANCHOR_PITCH), pitch);
    tokens.push(fifths.id((distance - FIFTHS.start()) as u32));
    state.prv_note = Some(pitch);
    Ok(())
}

/// Decoder side of [`encode_relative_pitch`].
#[derive(Debug, Clone)]
pub(crate) struct RelativePitch {
    note: u8,
    octave: i32,
}

impl RelativePitch {
    pub fn new() -> Self {
        Self {
            note: ANCHOR_PITCH,
            octave: ANCHOR_OCTAVE,
        }
    }

    pub fn shift(&mut self, index: u32) {
        self.octave += index as i32 + OCTAVE_SHIFTS.start();
    }

    pub fn step(&mut self, token: TokenId, index: u32) -> Result<u8, TokenisationError> {
        let class = CircleOfFifths::from_distance(self.note, index as i32 + FIFTHS.start());
        let pitch = pitch_in_octave(class, self.octave)
            .filter(|&pitch| pitch_index(pitch).is_ok())
            .ok_or(TokenisationError::UndefinedPitch(token))?;
        self.note = pitch;
        Ok(pitch)
    }
}

impl Tokeniser for CoFMidilikeTokeniser {
    fn name(&self) -> &'static str {
        "cof-midilike"
    }

    fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    fn flags(&self) -> TokenisationFlags {
        self.flags
    }

    fn tokenise(&mut self, sequence: &Sequence) -> Result<Vec<TokenId>, TokenisationError> {
        let (octave, note_on, note_off) = (self.octave, self.note_on, self.note_off);
        let running_octave = self.flags.running_octave;
        encode_events(
            sequence,
            &mut self.state,
            self.flags,
            self.wait,
            self.time_signature,
            |state, edge, pitch, tokens| {
                let fifths = match edge {
                    NoteEdge::On => note_on,
                    NoteEdge::Off => note_off,
                };
                encode_relative_pitch(state, running_octave, pitch, octave, fifths, tokens)
            },
        )
    }

    fn detokenise(&self, tokens: &[TokenId]) -> Result<Sequence, TokenisationError> {
        let velocity = Settings::global().default_velocity;
        let mut relative = RelativePitch::new();
        decode_events(tokens, self.wait, self.time_signature, |token, time, messages| {
            if let Some(index) = self.octave.index(token) {
                relative.shift(index);
            } else if let Some(index) = self.note_on.index(token) {
                let pitch = relative.step(token, index)?;
                messages.push(Message::note_on(pitch, velocity).at(time));
            } else if let Some(index) = self.note_off.index(token) {
                let pitch = relative.step(token, index)?;
                messages.push(Message::note_off(pitch).at(time));
            } else {
                return Err(TokenisationError::UnknownToken(token));
            }
            Ok(())
        })
    }

    fn reset(&mut self) {
        self.state.reset();
    }

    fn reset_time(&mut self) {
        self.state.reset_time();
    }
}
