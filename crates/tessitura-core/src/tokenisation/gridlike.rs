//! Bar-wise grid vocabulary: every bar fixes a step size and spells its rests as grid steps

use crate::durations::gcd;
use crate::error::TokenisationError;
use crate::message::{Message, MessageKind};
use crate::sequence::Sequence;
use crate::settings::Settings;

use super::vocabulary::{Band, LayoutBuilder};
use super::{
    BarClock, EncoderState, TOKEN_PAD, TOKEN_START, TOKEN_STOP, TokenId, Tokeniser,
    TokenisationFlags, Vocabulary, assemble, eighths_from_index, eighths_index, pitch_from_index,
    pitch_index, time_signature_eighths,
};

/// `pad, sta, sto, grd, gdf_XX, non_XXX, nof_XXX, tsg_XX_08`
///
/// Input sequences are expected to be bars: each call starts with a grid definition.
#[derive(Debug, Clone)]
pub struct GridlikeTokeniser {
    flags: TokenisationFlags,
    state: EncoderState,
    vocabulary: Vocabulary,
    step: TokenId,
    grid: Band,
    note_on: Band,
    note_off: Band,
    time_signature: Band,
}

impl GridlikeTokeniser {
    pub fn new(flags: TokenisationFlags) -> Self {
        Self::with_max_rest_value(flags, Settings::global().ppqn)
    }

    pub fn with_max_rest_value(flags: TokenisationFlags, max_rest_value: u64) -> Self {
        let mut layout = LayoutBuilder::new();
        layout.control("pad");
        layout.control("sta");
        layout.control("sto");
        let step = layout.control("grd");
        let grid = layout.value_band("gdf", max_rest_value);
        let note_on = layout.pitch_band("non");
        let note_off = layout.pitch_band("nof");
        let time_signature = layout.time_signature_band();

        Self {
            flags,
            state: EncoderState::default(),
            vocabulary: layout.finish(),
            step,
            grid,
            note_on,
            note_off,
            time_signature,
        }
    }

    /// Largest step dividing every rest run of the sequence, capped at the largest definable grid.
    pub fn grid_size(&self, sequence: &Sequence) -> u64 {
        let max = u64::from(self.grid.len);
        let mut grid = max;
        let mut run = 0;
        for message in sequence.rel().messages() {
            match message.kind {
                MessageKind::Wait { ticks } => run += ticks,
                MessageKind::NoteOn { .. }
                | MessageKind::NoteOff { .. }
                | MessageKind::TimeSignature { .. } => {
                    if run > 0 {
                        grid = gcd(grid, run);
                    }
                    run = 0;
                }
                _ => {}
            }
        }
        if run > 0 {
            grid = gcd(grid, run);
        }
        grid.min(max)
    }

    fn flush_grid(&mut self, grid: u64, tokens: &mut Vec<TokenId>) {
        let steps = self.state.rest_buffer / grid;
        tokens.extend(std::iter::repeat_n(self.step, steps as usize));
        self.state.rest_buffer = 0;
    }
}

impl Tokeniser for GridlikeTokeniser {
    fn name(&self) -> &'static str {
        "gridlike"
    }

    fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    fn flags(&self) -> TokenisationFlags {
        self.flags
    }

    /// The grid definition opens every bar.
    fn bar_separator(&self) -> Option<TokenId> {
        None
    }

    fn tokenise(&mut self, sequence: &Sequence) -> Result<Vec<TokenId>, TokenisationError> {
        let grid = self.grid_size(sequence);
        let mut tokens = Vec::new();
        if grid == 0 {
            return Ok(tokens);
        }
        tokens.push(self.grid.id(grid as u32 - 1));

        for message in sequence.rel().messages() {
            match message.kind {
                MessageKind::Wait { ticks } => {
                    self.state.rest_buffer += ticks;
                    self.state.cur_time += ticks;
                }
                MessageKind::NoteOn { note, .. } => {
                    let token = self.note_on.id(pitch_index(note)?);
                    self.flush_grid(grid, &mut tokens);
                    tokens.push(token);
                }
                MessageKind::NoteOff { note } => {
                    let token = self.note_off.id(pitch_index(note)?);
                    self.flush_grid(grid, &mut tokens);
                    tokens.push(token);
                }
                MessageKind::TimeSignature {
                    numerator,
                    denominator,
                } => {
                    let eighths = time_signature_eighths(numerator, denominator)?;
                    let running = self.flags.running_time_signature;
                    if self.state.announce_time_signature(eighths, running) {
                        self.flush_grid(grid, &mut tokens);
                        tokens.push(self.time_signature.id(eighths_index(eighths)));
                    }
                }
                _ => {}
            }
        }
        self.flush_grid(grid, &mut tokens);
        self.state.reset_time();
        Ok(tokens)
    }

    fn detokenise(&self, tokens: &[TokenId]) -> Result<Sequence, TokenisationError> {
        let velocity = Settings::global().default_velocity;
        let mut clock = BarClock::new();
        let mut messages = Vec::new();
        let mut grid: Option<u64> = None;
        let mut defined = false;

        for &token in tokens {
            let mut is_definition = false;
            match token {
                TOKEN_PAD | TOKEN_START | TOKEN_STOP => {}
                _ if token == self.step => {
                    let ticks = grid.ok_or_else(|| {
                        TokenisationError::GridDefinition("grid step before any definition".into())
                    })?;
                    clock.advance(ticks);
                }
                _ => {
                    if let Some(index) = self.grid.index(token) {
                        if defined {
                            return Err(TokenisationError::GridDefinition(
                                "consecutive grid definitions".into(),
                            ));
                        }
                        grid = Some(u64::from(index) + 1);
                        is_definition = true;
                    } else if let Some(index) = self.note_on.index(token) {
                        messages
                            .push(Message::note_on(pitch_from_index(index), velocity).at(clock.time));
                    } else if let Some(index) = self.note_off.index(token) {
                        messages.push(Message::note_off(pitch_from_index(index)).at(clock.time));
                    } else if let Some(index) = self.time_signature.index(token) {
                        messages.push(clock.time_signature(eighths_from_index(index))?);
                    } else {
                        return Err(TokenisationError::UnknownToken(token));
                    }
                }
            }
            defined = is_definition;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::Bar;
    use crate::tokenisation::test_bars;

    #[test]
    fn test_grid_follows_rest_runs() {
        let mut tokeniser = GridlikeTokeniser::new(TokenisationFlags::default());
        let sequence = Sequence::from_relative_messages(vec![
            Message::time_signature(3, 4),
            Message::note_on(60, 90),
            Message::wait(18),
            Message::note_off(60),
            Message::wait(54),
        ]);
        assert_eq!(tokeniser.grid_size(&sequence), 6);

        let tokens = tokeniser.tokenise(&sequence).unwrap();
        let names = tokeniser.vocabulary().decode(&tokens).unwrap();
        assert_eq!(&names[..3], &["gdf_06", "tsg_06_08", "non_060"]);
        assert_eq!(names.iter().filter(|name| *name == "grd").count(), 12);
        assert_eq!(names[6], "nof_060");
    }

    #[test]
    fn test_grid_definition_errors() {
        let tokeniser = GridlikeTokeniser::new(TokenisationFlags::default());
        let step = tokeniser.step;
        let definition = tokeniser.grid.id(11);
        assert!(matches!(
            tokeniser.detokenise(&[TOKEN_START, step]),
            Err(TokenisationError::GridDefinition(_))
        ));
        assert!(matches!(
            tokeniser.detokenise(&[TOKEN_START, definition, definition]),
            Err(TokenisationError::GridDefinition(_))
        ));
        let decoded = tokeniser
            .detokenise(&[TOKEN_START, definition, step, step, TOKEN_STOP])
            .unwrap();
        assert_eq!(decoded.duration(), 24);
    }

    #[test]
    fn test_round_trip() {
        let bars = test_bars();
        let mut tokeniser = GridlikeTokeniser::new(TokenisationFlags::default());
        let tokens = tokeniser.tokenise_bars(&bars).unwrap();
        let decoded = tokeniser.detokenise(&tokens).unwrap();
        assert!(decoded.is_equivalent(&Bar::to_sequence(&bars)));
        assert_eq!(decoded.duration(), 192);
    }
}
