//! Note-by-note vocabularies: a note is one token carrying the last defined value as its length

use crate::error::TokenisationError;
use crate::message::{MessageKind, MessageType};
use crate::sequence::Sequence;
use crate::settings::Settings;

use super::midilike::{RelativePitch, encode_relative_pitch};
use super::vocabulary::{Band, LayoutBuilder};
use super::{
    BarClock, EncoderState, TOKEN_BAR, TOKEN_PAD, TOKEN_START, TOKEN_STOP, TokenId, Tokeniser,
    TokenisationFlags, Vocabulary, assemble, eighths_from_index, eighths_index, note_messages,
    pitch_from_index, pitch_index, rest_chunks, time_signature_eighths,
};

/// Kinds a note-like encoder walks over.
pub(crate) const NOTELIKE_KINDS: [MessageType; 4] = [
    MessageType::NoteOn,
    MessageType::NoteOff,
    MessageType::TimeSignature,
    MessageType::Internal,
];

/// Bands shared by every vocabulary that defines lengths through value tokens.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bands {
    pub wait: TokenId,
    pub value: Band,
    pub time_signature: Band,
}

impl Bands {
    fn max_value(&self) -> u64 {
        u64::from(self.value.len)
    }

    /// Value tokens defining `value`, skipped if the running value already holds it.
    pub fn emit_value(
        &self,
        state: &mut EncoderState,
        running: bool,
        value: u64,
        tokens: &mut Vec<TokenId>,
    ) {
        if running && state.prv_value == Some(value) {
            return;
        }
        for chunk in rest_chunks(value, self.max_value()) {
            tokens.push(self.value.id(chunk as u32 - 1));
        }
        state.prv_value = Some(value);
    }

    pub fn flush_rests(&self, state: &mut EncoderState, running: bool, tokens: &mut Vec<TokenId>) {
        for chunk in rest_chunks(state.rest_buffer, self.max_value()) {
            self.emit_value(state, running, chunk, tokens);
            tokens.push(self.wait);
        }
        state.rest_buffer = 0;
    }
}

fn encode_notes<F>(
    sequence: &Sequence,
    state: &mut EncoderState,
    flags: TokenisationFlags,
    bands: Bands,
    mut pitch_tokens: F,
) -> Result<Vec<TokenId>, TokenisationError>
where
    F: FnMut(&mut EncoderState, u8, &mut Vec<TokenId>) -> Result<(), TokenisationError>,
{
    let ppqn = Settings::global().ppqn;
    let mut tokens = Vec::new();

    for (_, pairing) in sequence.interleaved_pairings(&NOTELIKE_KINDS, ppqn, true) {
        let start = pairing.start;
        if let MessageKind::Internal = start.kind {
            state.cur_time_target = state.cur_time_target.max(start.time);
            continue;
        }
        if start.time > state.cur_time {
            state.rest_buffer += start.time - state.cur_time;
            state.cur_time = start.time;
        }

        match start.kind {
            MessageKind::NoteOn { note, .. } => {
                pitch_index(note)?;
                let value = pairing.duration().unwrap_or(0);
                if value == 0 {
                    return Err(TokenisationError::UnsupportedDuration(0));
                }
                bands.flush_rests(state, flags.running_value, &mut tokens);
                bands.emit_value(state, flags.running_value, value, &mut tokens);
                pitch_tokens(state, note, &mut tokens)?;
                state.cur_time_target = state.cur_time_target.max(state.cur_time + value);
            }
            MessageKind::TimeSignature {
                numerator,
                denominator,
            } => {
                let eighths = time_signature_eighths(numerator, denominator)?;
                bands.flush_rests(state, flags.running_value, &mut tokens);
                if state.announce_time_signature(eighths, flags.running_time_signature) {
                    tokens.push(bands.time_signature.id(eighths_index(eighths)));
                }
            }
            _ => {}
        }
    }

    if state.cur_time_target > state.cur_time {
        state.rest_buffer += state.cur_time_target - state.cur_time;
        state.cur_time = state.cur_time_target;
    }
    bands.flush_rests(state, flags.running_value, &mut tokens);
    state.reset_time();
    Ok(tokens)
}

/// `pitch` resolves the tokens that are not shared between the variants: `Some(pitch)` sounds a
/// note of the current value, `None` means the token only updated decoder state.
fn decode_notes<F>(
    tokens: &[TokenId],
    bands: Bands,
    mut pitch: F,
) -> Result<Sequence, TokenisationError>
where
    F: FnMut(TokenId) -> Result<Option<u8>, TokenisationError>,
{
    let mut clock = BarClock::new();
    let mut messages = Vec::new();
    let mut value: Option<u64> = None;
    let mut defining = false;

    for &token in tokens {
        let mut is_value = false;
        match token {
            TOKEN_PAD | TOKEN_START | TOKEN_STOP => {}
            TOKEN_BAR => clock.bar(),
            _ if token == bands.wait => {
                let ticks = value.ok_or(TokenisationError::UndefinedValue(token))?;
                clock.advance(ticks);
            }
            _ => {
                if let Some(index) = bands.value.index(token) {
                    let ticks = u64::from(index) + 1;
                    value = Some(if defining { value.unwrap_or(0) + ticks } else { ticks });
                    is_value = true;
                } else if let Some(index) = bands.time_signature.index(token) {
                    messages.push(clock.time_signature(eighths_from_index(index))?);
                } else if let Some(pitch) = pitch(token)? {
                    let ticks = value.ok_or(TokenisationError::UndefinedValue(token))?;
                    messages.extend(note_messages(pitch, clock.time, ticks));
                }
            }
        }
        defining = is_value;
    }
    Ok(assemble(messages, clock.time))
}

// ============================================================================
// Standard
// ============================================================================

/// `pad, sta, sto, bar, wai, ply, val_XX, nte_XXX, tsg_XX_08`
///
/// Value tokens set the length used by the following `wai` or note token; consecutive value
/// tokens add up. `ply` repeats the previous pitch when running pitches are enabled.
#[derive(Debug, Clone)]
pub struct StandardNotelikeTokeniser {
    flags: TokenisationFlags,
    state: EncoderState,
    vocabulary: Vocabulary,
    bands: Bands,
    play: TokenId,
    note: Band,
}

impl StandardNotelikeTokeniser {
    pub fn new(flags: TokenisationFlags) -> Self {
        Self::with_max_rest_value(flags, Settings::global().ppqn)
    }

    pub fn with_max_rest_value(flags: TokenisationFlags, max_rest_value: u64) -> Self {
        let mut layout = LayoutBuilder::new();
        layout.control("pad");
        layout.control("sta");
        layout.control("sto");
        layout.control("bar");
        let wait = layout.control("wai");
        let play = layout.control("ply");
        let value = layout.value_band("val", max_rest_value);
        let note = layout.pitch_band("nte");
        let time_signature = layout.time_signature_band();

        Self {
            flags,
            state: EncoderState::default(),
            vocabulary: layout.finish(),
            bands: Bands {
                wait,
                value,
                time_signature,
            },
            play,
            note,
        }
    }
}

impl Tokeniser for StandardNotelikeTokeniser {
    fn name(&self) -> &'static str {
        "notelike"
    }

    fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    fn flags(&self) -> TokenisationFlags {
        self.flags
    }

    fn tokenise(&mut self, sequence: &Sequence) -> Result<Vec<TokenId>, TokenisationError> {
        let (play, note) = (self.play, self.note);
        let running_pitch = self.flags.running_pitch;
        encode_notes(
            sequence,
            &mut self.state,
            self.flags,
            self.bands,
            |state, pitch, tokens| {
                if running_pitch && state.prv_note == Some(pitch) {
                    tokens.push(play);
                } else {
                    tokens.push(note.id(pitch_index(pitch)?));
                }
                state.prv_note = Some(pitch);
                Ok(())
            },
        )
    }

    fn detokenise(&self, tokens: &[TokenId]) -> Result<Sequence, TokenisationError> {
        let mut previous: Option<u8> = None;
        decode_notes(tokens, self.bands, |token| {
            let pitch = if token == self.play {
                previous.ok_or(TokenisationError::UndefinedPitch(token))?
            } else {
                let index = self
                    .note
                    .index(token)
                    .ok_or(TokenisationError::UnknownToken(token))?;
                pitch_from_index(index)
            };
            previous = Some(pitch);
            Ok(Some(pitch))
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

/// Notelike with relative pitches.
///
/// `pad, sta, sto, bar, wai, val_XX, oct_+XX, nte_+XX, tsg_XX_08`
#[derive(Debug, Clone)]
pub struct CoFNotelikeTokeniser {
    flags: TokenisationFlags,
    state: EncoderState,
    vocabulary: Vocabulary,
    bands: Bands,
    octave: Band,
    fifths: Band,
}

impl CoFNotelikeTokeniser {
    pub fn new(flags: TokenisationFlags) -> Self {
        Self::with_max_rest_value(flags, Settings::global().ppqn)
    }

    pub fn with_max_rest_value(flags: TokenisationFlags, max_rest_value: u64) -> Self {
        let mut layout = LayoutBuilder::new();
        layout.control("pad");
        layout.control("sta");
        layout.control("sto");
        layout.control("bar");
        let wait = layout.control("wai");
        let value = layout.value_band("val", max_rest_value);
        let octave = layout.signed_band("oct", -8..=8);
        let fifths = layout.signed_band("nte", -5..=6);
        let time_signature = layout.time_signature_band();

        Self {
            flags,
            state: EncoderState::default(),
            vocabulary: layout.finish(),
            bands: Bands {
                wait,
                value,
                time_signature,
            },
            octave,
            fifths,
        }
    }
}

impl Tokeniser for CoFNotelikeTokeniser {
    fn name(&self) -> &'static str {
        "cof-notelike"
    }

    fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    fn flags(&self) -> TokenisationFlags {
        self.flags
    }

    fn tokenise(&mut self, sequence: &Sequence) -> Result<Vec<TokenId>, TokenisationError> {
        let (octave, fifths) = (self.octave, self.fifths);
        let running_octave = self.flags.running_octave;
        encode_notes(
            sequence,
            &mut self.state,
            self.flags,
            self.bands,
            |state, pitch, tokens| {
                encode_relative_pitch(state, running_octave, pitch, octave, fifths, tokens)
            },
        )
    }

    fn detokenise(&self, tokens: &[TokenId]) -> Result<Sequence, TokenisationError> {
        let mut relative = RelativePitch::new();
        decode_notes(tokens, self.bands, |token| {
            if let Some(index) = self.octave.index(token) {
                relative.shift(index);
                Ok(None)
            } else if let Some(index) = self.fifths.index(token) {
                relative.step(token, index).map(Some)
            } else {
                Err(TokenisationError::UnknownToken(token))
            }
        })
    }

    fn reset(&mut self) {
        self.state.reset();
    }

    fn reset_time(&mut self) {
        self.state.reset_time();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::Bar;
    use crate::message::Message;
    use crate::tokenisation::test_bars;

    fn names(tokeniser: &dyn Tokeniser, tokens: &[TokenId]) -> Vec<String> {
        tokeniser.vocabulary().decode(tokens).unwrap()
    }

    #[test]
    fn test_long_rest_is_chunked() {
        let mut tokeniser = StandardNotelikeTokeniser::new(TokenisationFlags::default());
        let sequence = Sequence::from_relative_messages(vec![Message::wait(50)]);
        let tokens = tokeniser.tokenise(&sequence).unwrap();
        assert_eq!(
            names(&tokeniser, &tokens),
            vec!["val_24", "wai", "val_24", "wai", "val_02", "wai"]
        );
    }

    #[test]
    fn test_running_value_and_pitch() {
        let flags = TokenisationFlags {
            running_value: true,
            running_pitch: true,
            ..Default::default()
        };
        let mut tokeniser = StandardNotelikeTokeniser::new(flags);
        let sequence = Sequence::from_relative_messages(vec![
            Message::note_on(60, 90),
            Message::wait(12),
            Message::note_off(60),
            Message::note_on(60, 90),
            Message::wait(12),
            Message::note_off(60),
            Message::note_on(62, 90),
            Message::wait(48),
            Message::note_off(62),
        ]);
        let tokens = tokeniser.tokenise(&sequence).unwrap();
        assert_eq!(
            names(&tokeniser, &tokens),
            vec![
                "val_12", "nte_060", "wai", "ply", "wai", "val_24", "val_24", "nte_062", "val_24",
                "wai", "wai"
            ]
        );

        let decoded = tokeniser.detokenise(&tokens).unwrap();
        assert!(decoded.is_equivalent(&sequence));
    }

    #[test]
    fn test_zero_length_note_is_rejected() {
        let mut tokeniser = StandardNotelikeTokeniser::new(TokenisationFlags::default());
        // The re-attack closes the first note at its own start.
        let sequence = Sequence::from_absolute_messages(vec![
            Message::note_on(60, 90).at(0),
            Message::note_on(60, 90).at(0),
            Message::note_off(60).at(24),
        ]);
        assert_eq!(
            tokeniser.tokenise(&sequence).unwrap_err(),
            TokenisationError::UnsupportedDuration(0)
        );
    }

    #[test]
    fn test_wait_without_value() {
        let tokeniser = StandardNotelikeTokeniser::new(TokenisationFlags::default());
        let wait = tokeniser.bands.wait;
        assert_eq!(
            tokeniser.detokenise(&[TOKEN_START, wait]).unwrap_err(),
            TokenisationError::UndefinedValue(wait)
        );
        let play = tokeniser.play;
        assert_eq!(
            tokeniser.detokenise(&[TOKEN_START, play]).unwrap_err(),
            TokenisationError::UndefinedPitch(play)
        );
    }

    #[test]
    fn test_round_trip() {
        let bars = test_bars();
        let flags = TokenisationFlags {
            running_value: true,
            running_pitch: true,
            running_time_signature: true,
            ..Default::default()
        };
        let mut tokeniser = StandardNotelikeTokeniser::new(flags);
        let tokens = tokeniser.tokenise_bars(&bars).unwrap();
        let decoded = tokeniser.detokenise(&tokens).unwrap();
        assert!(decoded.is_equivalent(&Bar::to_sequence(&bars)));
        assert_eq!(decoded.duration(), 192);
    }

    #[test]
    fn test_cof_round_trip() {
        let bars = test_bars();
        let flags = TokenisationFlags {
            running_value: true,
            running_octave: true,
            ..Default::default()
        };
        let mut tokeniser = CoFNotelikeTokeniser::new(flags);
        let tokens = tokeniser.tokenise_bars(&bars).unwrap();
        let decoded = tokeniser.detokenise(&tokens).unwrap();
        assert!(decoded.is_equivalent(&Bar::to_sequence(&bars)));
    }
}
