//! Pitch-major vocabulary: every occurrence of one pitch in a bar before the next pitch

use crate::error::TokenisationError;
use crate::message::{Message, MessageKind};
use crate::sequence::{Pairing, Sequence};
use crate::settings::Settings;

use super::notelike::{Bands, NOTELIKE_KINDS};
use super::vocabulary::{Band, LayoutBuilder};
use super::{
    EncoderState, TOKEN_PAD, TOKEN_START, TOKEN_STOP, TokenId, Tokeniser, TokenisationFlags,
    Vocabulary, assemble, default_eighths, eighths_from_index, eighths_index, note_messages,
    pitch_from_index, pitch_index, time_signature_eighths,
};

/// `pad, sta, sto, ply, wai, brd, val_XX, nte_XXX, tsg_XX_08`
///
/// Input sequences are expected to be bars. A note token restarts the bar-local clock, value and
/// wait tokens move it, `ply` sounds the defined pitch and `brd` closes the bar.
#[derive(Debug, Clone)]
pub struct TransposedNotelikeTokeniser {
    flags: TokenisationFlags,
    state: EncoderState,
    vocabulary: Vocabulary,
    bands: Bands,
    play: TokenId,
    border: TokenId,
    note: Band,
}

impl TransposedNotelikeTokeniser {
    pub fn new(flags: TokenisationFlags) -> Self {
        Self::with_max_rest_value(flags, Settings::global().ppqn)
    }

    pub fn with_max_rest_value(flags: TokenisationFlags, max_rest_value: u64) -> Self {
        let mut layout = LayoutBuilder::new();
        layout.control("pad");
        layout.control("sta");
        layout.control("sto");
        let play = layout.control("ply");
        let wait = layout.control("wai");
        let border = layout.control("brd");
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
            border,
            note,
        }
    }
}

fn capacity(eighths: u8) -> u64 {
    u64::from(eighths) * Settings::global().ppqn / 2
}

impl Tokeniser for TransposedNotelikeTokeniser {
    fn name(&self) -> &'static str {
        "transposed"
    }

    fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    fn flags(&self) -> TokenisationFlags {
        self.flags
    }

    /// Every bar ends in its own border token.
    fn bar_separator(&self) -> Option<TokenId> {
        None
    }

    fn tokenise(&mut self, sequence: &Sequence) -> Result<Vec<TokenId>, TokenisationError> {
        let ppqn = Settings::global().ppqn;
        let running_value = self.flags.running_value;
        let mut tokens = Vec::new();

        // Notes grouped by pitch, pitches in order of first appearance
        let mut groups: Vec<(u8, Vec<Pairing>)> = Vec::new();
        let mut eighths = self.state.prv_numerator.unwrap_or_else(default_eighths);
        let mut announced = false;

        for (_, pairing) in sequence.interleaved_pairings(&NOTELIKE_KINDS, ppqn, true) {
            match pairing.start.kind {
                MessageKind::NoteOn { note, .. } => {
                    pitch_index(note)?;
                    match groups.iter_mut().find(|(pitch, _)| *pitch == note) {
                        Some((_, pairings)) => pairings.push(pairing),
                        None => groups.push((note, vec![pairing])),
                    }
                }
                MessageKind::TimeSignature {
                    numerator,
                    denominator,
                } => {
                    if pairing.start.time > 0 {
                        return Err(TokenisationError::MidBarTimeSignature(pairing.start.time));
                    }
                    eighths = time_signature_eighths(numerator, denominator)?;
                    if !announced
                        && self
                            .state
                            .announce_time_signature(eighths, self.flags.running_time_signature)
                    {
                        tokens.push(self.bands.time_signature.id(eighths_index(eighths)));
                    }
                    announced = true;
                }
                _ => {}
            }
        }

        let duration = sequence.duration();
        let capacity = capacity(eighths);
        if duration != capacity {
            return Err(TokenisationError::BarLengthMismatch { duration, capacity });
        }

        for (pitch, pairings) in &groups {
            tokens.push(self.note.id(pitch_index(*pitch)?));
            self.state.cur_time = 0;

            for pairing in pairings {
                let start = pairing.start.time;
                let value = pairing.duration().unwrap_or(0);
                if value == 0 {
                    return Err(TokenisationError::UnsupportedDuration(0));
                }
                if start > self.state.cur_time {
                    self.state.rest_buffer += start - self.state.cur_time;
                    self.state.cur_time = start;
                }
                self.bands.flush_rests(&mut self.state, running_value, &mut tokens);
                self.bands
                    .emit_value(&mut self.state, running_value, value, &mut tokens);
                tokens.push(self.play);
            }
        }

        tokens.push(self.border);
        self.state.reset_time();
        Ok(tokens)
    }

    fn detokenise(&self, tokens: &[TokenId]) -> Result<Sequence, TokenisationError> {
        let mut messages = Vec::new();
        let mut bar_start = 0;
        let mut bar_time = 0;
        let mut eighths = default_eighths();
        let mut note: Option<u8> = None;
        let mut value: Option<u64> = None;
        let mut defining = false;

        for &token in tokens {
            let mut is_value = false;
            match token {
                TOKEN_PAD | TOKEN_START | TOKEN_STOP => {}
                _ if token == self.play => {
                    let pitch = note.ok_or(TokenisationError::UndefinedPitch(token))?;
                    let ticks = value.ok_or(TokenisationError::UndefinedValue(token))?;
                    messages.extend(note_messages(pitch, bar_start + bar_time, ticks));
                }
                _ if token == self.bands.wait => {
                    bar_time += value.ok_or(TokenisationError::UndefinedValue(token))?;
                }
                _ if token == self.border => {
                    bar_start += capacity(eighths);
                    bar_time = 0;
                    note = None;
                }
                _ => {
                    if let Some(index) = self.bands.value.index(token) {
                        let ticks = u64::from(index) + 1;
                        value = Some(if defining { value.unwrap_or(0) + ticks } else { ticks });
                        is_value = true;
                    } else if let Some(index) = self.note.index(token) {
                        note = Some(pitch_from_index(index));
                        bar_time = 0;
                    } else if let Some(index) = self.bands.time_signature.index(token) {
                        if note.is_some() || bar_time != 0 {
                            return Err(TokenisationError::MidBarTimeSignature(bar_start + bar_time));
                        }
                        eighths = eighths_from_index(index);
                        messages.push(Message::time_signature(eighths, 8).at(bar_start));
                    } else {
                        return Err(TokenisationError::UnknownToken(token));
                    }
                }
            }
            defining = is_value;
        }
        Ok(assemble(messages, bar_start))
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
    use crate::tokenisation::test_bars;

    #[test]
    fn test_groups_by_pitch() {
        let mut tokeniser = TransposedNotelikeTokeniser::new(TokenisationFlags {
            running_value: true,
            ..Default::default()
        });
        let sequence = Sequence::from_relative_messages(vec![
            Message::time_signature(2, 4),
            Message::note_on(62, 90),
            Message::wait(12),
            Message::note_off(62),
            Message::note_on(60, 90),
            Message::wait(12),
            Message::note_off(60),
            Message::note_on(62, 90),
            Message::wait(12),
            Message::note_off(62),
            Message::wait(12),
        ]);
        let tokens = tokeniser.tokenise(&sequence).unwrap();
        let names = tokeniser.vocabulary().decode(&tokens).unwrap();
        assert_eq!(
            names,
            vec![
                "tsg_04_08", "nte_062", "val_12", "ply", "val_24", "wai", "val_12", "ply",
                "nte_060", "wai", "ply", "brd"
            ]
        );

        let decoded = tokeniser.detokenise(&tokens).unwrap();
        assert!(decoded.is_equivalent(&sequence));
        assert_eq!(decoded.duration(), 48);
    }

    #[test]
    fn test_bar_length_mismatch() {
        let mut tokeniser = TransposedNotelikeTokeniser::new(TokenisationFlags::default());
        let sequence = Sequence::from_relative_messages(vec![
            Message::time_signature(4, 4),
            Message::wait(48),
        ]);
        assert_eq!(
            tokeniser.tokenise(&sequence).unwrap_err(),
            TokenisationError::BarLengthMismatch {
                duration: 48,
                capacity: 96
            }
        );
    }

    #[test]
    fn test_signature_after_note_definition() {
        let tokeniser = TransposedNotelikeTokeniser::new(TokenisationFlags::default());
        let note = tokeniser.note.id(39);
        let signature = tokeniser.bands.time_signature.id(6);
        assert_eq!(
            tokeniser.detokenise(&[TOKEN_START, note, signature]).unwrap_err(),
            TokenisationError::MidBarTimeSignature(0)
        );
    }

    #[test]
    fn test_round_trip() {
        let bars = test_bars();
        let mut tokeniser = TransposedNotelikeTokeniser::new(TokenisationFlags {
            running_value: true,
            running_time_signature: true,
            ..Default::default()
        });
        let tokens = tokeniser.tokenise_bars(&bars).unwrap();
        let borders = tokens.iter().filter(|&&t| t == tokeniser.border).count();
        assert_eq!(borders, 2);
        let decoded = tokeniser.detokenise(&tokens).unwrap();
        assert!(decoded.is_equivalent(&Bar::to_sequence(&bars)));
        assert_eq!(decoded.duration(), 192);
    }
}
