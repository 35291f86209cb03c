//! Legal-next-token masks for constrained generation
//!
//! The automaton follows a large vocabulary token stream and tracks where it is in the current
//! bar. Its state is plain data so a decoding loop can hand it back on the next call instead of
//! replaying the whole history.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TokenisationError;
use crate::settings::Settings;

use super::large_vocabulary::LargeVocabularyNotelikeTokeniser;
use super::{
    TOKEN_BAR, TOKEN_PAD, TOKEN_START, TOKEN_STOP, TokenId, Tokeniser, default_eighths,
    eighths_from_index,
};

/// Resumable state of the mask automaton.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskState {
    /// Number of tokens consumed so far
    pub step: usize,
    pub time: u64,
    pub bar_capacity: u64,
    pub bar_remaining: u64,
    /// Bar length in eighths
    pub numerator: u8,
    pub started: bool,
    pub stopped: bool,
    pub at_bar_start: bool,
    pub at_bar_end: bool,
    /// End tick of every sounding pitch
    pub sounding: BTreeMap<u8, u64>,
}

impl Default for MaskState {
    fn default() -> Self {
        Self {
            step: 0,
            time: 0,
            bar_capacity: 0,
            bar_remaining: 0,
            numerator: default_eighths(),
            started: false,
            stopped: false,
            at_bar_start: false,
            at_bar_end: false,
            sounding: BTreeMap::new(),
        }
    }
}

impl MaskState {
    fn open_bar(&mut self) {
        self.bar_capacity = u64::from(self.numerator) * Settings::global().ppqn / 2;
        self.bar_remaining = self.bar_capacity;
    }

    fn claim(&mut self, token: TokenId, required: u64) -> Result<(), TokenisationError> {
        if required > self.bar_remaining {
            return Err(TokenisationError::CapacityUnderflow {
                token,
                required,
                remaining: self.bar_remaining,
            });
        }
        Ok(())
    }

    /// Advance the automaton by one token.
    pub fn consume(
        &mut self,
        tokeniser: &LargeVocabularyNotelikeTokeniser,
        token: TokenId,
    ) -> Result<(), TokenisationError> {
        match token {
            TOKEN_PAD => {}
            TOKEN_START => {
                self.started = true;
                self.at_bar_start = true;
                self.open_bar();
            }
            TOKEN_STOP => self.stopped = true,
            TOKEN_BAR => {
                self.at_bar_start = true;
                self.at_bar_end = false;
                self.open_bar();
            }
            _ => {
                if let Some(index) = tokeniser.wait_band().index(token) {
                    let ticks = u64::from(index) + 1;
                    self.claim(token, ticks)?;
                    self.time += ticks;
                    self.bar_remaining -= ticks;
                    self.at_bar_start = false;
                    self.at_bar_end = self.bar_remaining == 0;
                    let time = self.time;
                    self.sounding.retain(|_, end| *end > time);
                } else if let Some((pitch, value)) = tokeniser.note(token) {
                    self.claim(token, value)?;
                    self.at_bar_start = false;
                    self.sounding.insert(pitch, self.time + value);
                } else if let Some(index) = tokeniser.time_signature_band().index(token) {
                    if !self.at_bar_start {
                        return Err(TokenisationError::MidBarTimeSignature(self.time));
                    }
                    self.at_bar_start = false;
                    self.numerator = eighths_from_index(index);
                    self.open_bar();
                } else {
                    return Err(TokenisationError::UnknownToken(token));
                }
            }
        }
        self.step += 1;
        Ok(())
    }

    /// Tokens that may follow the consumed history, indexed by token id.
    pub fn legal_tokens(&self, tokeniser: &LargeVocabularyNotelikeTokeniser) -> Vec<bool> {
        let size = tokeniser.vocabulary().len();

        if !self.started || self.stopped {
            let mut legal = vec![false; size];
            let only = if self.stopped { TOKEN_PAD } else { TOKEN_START };
            legal[only as usize] = true;
            return legal;
        }

        let mut legal = vec![true; size];
        legal[TOKEN_PAD as usize] = false;
        legal[TOKEN_START as usize] = false;

        if !self.at_bar_start {
            for token in tokeniser.time_signature_band().ids() {
                legal[token as usize] = false;
            }
        }
        if !self.at_bar_end {
            legal[TOKEN_STOP as usize] = false;
            legal[TOKEN_BAR as usize] = false;
        }

        let wait = tokeniser.wait_band();
        for token in wait.ids() {
            if u64::from(token - wait.offset) + 1 > self.bar_remaining {
                legal[token as usize] = false;
            }
        }

        for token in tokeniser.note_band().ids() {
            if let Some((pitch, value)) = tokeniser.note(token) {
                if value > self.bar_remaining || self.sounding.contains_key(&pitch) {
                    legal[token as usize] = false;
                }
            }
        }
        legal
    }
}

/// Consume `tokens` from `previous.step` on, at most `limit` of them, and return the legal
/// next tokens after each consumed one together with the state to resume from.
pub fn masks(
    tokeniser: &LargeVocabularyNotelikeTokeniser,
    tokens: &[TokenId],
    previous: Option<MaskState>,
    limit: Option<usize>,
) -> Result<(Vec<Vec<bool>>, MaskState), TokenisationError> {
    let mut state = previous.unwrap_or_default();
    let pending = tokens.get(state.step..).unwrap_or_default();
    let mut result = Vec::new();

    for &token in pending.iter().take(limit.unwrap_or(usize::MAX)) {
        state.consume(tokeniser, token)?;
        result.push(state.legal_tokens(tokeniser));
    }
    tracing::debug!(step = state.step, masks = result.len(), "Computed token masks");
    Ok((result, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenisation::{TokenisationFlags, test_bars};

    fn tokeniser() -> LargeVocabularyNotelikeTokeniser {
        LargeVocabularyNotelikeTokeniser::new(TokenisationFlags::default())
    }

    #[test]
    fn test_only_start_before_start() {
        let tokeniser = tokeniser();
        let legal = MaskState::default().legal_tokens(&tokeniser);
        let allowed: Vec<usize> = (0..legal.len()).filter(|&i| legal[i]).collect();
        assert_eq!(allowed, vec![TOKEN_START as usize]);
    }

    #[test]
    fn test_mask_at_bar_start() {
        let tokeniser = tokeniser();
        let (masks, state) = masks(&tokeniser, &[TOKEN_START], None, None).unwrap();
        assert!(state.started && state.at_bar_start && !state.stopped);
        assert_eq!(state.bar_remaining, 96);

        let legal = &masks[0];
        assert!(tokeniser.time_signature_band().ids().all(|t| legal[t as usize]));
        assert!(tokeniser.wait_band().ids().all(|t| legal[t as usize]));
        let whole = tokeniser.note_token(60, 96).unwrap();
        assert!(legal[whole as usize]);
        assert!(!legal[TOKEN_STOP as usize]);
        assert!(!legal[TOKEN_BAR as usize]);
        assert!(!legal[TOKEN_PAD as usize]);
        assert!(!legal[TOKEN_START as usize]);
    }

    #[test]
    fn test_capacity_and_sounding_notes() {
        let tokeniser = tokeniser();
        let time_signature = tokeniser.time_signature_band().id(4); // 6/8
        let note = tokeniser.note_token(60, 24).unwrap();
        let wait = tokeniser.wait_band().id(11); // 12 ticks
        let tokens = [TOKEN_START, time_signature, note, wait, wait];
        let (masks, state) = masks(&tokeniser, &tokens[..4], None, None).unwrap();
        assert_eq!(state.bar_capacity, 72);
        assert_eq!(state.bar_remaining, 60);
        assert_eq!(state.sounding.get(&60), Some(&24));

        let after_note = &masks[2];
        assert!(!after_note[time_signature as usize]);
        assert!(!after_note[tokeniser.note_token(60, 12).unwrap() as usize]);
        assert!(after_note[tokeniser.note_token(62, 12).unwrap() as usize]);
        assert!(!after_note[tokeniser.note_token(62, 96).unwrap() as usize]);
        assert!(after_note[tokeniser.note_token(62, 72).unwrap() as usize]);

        let after_wait = &masks[3];
        assert!(!after_wait[tokeniser.note_token(62, 72).unwrap() as usize]);
        assert!(after_wait[tokeniser.note_token(62, 48).unwrap() as usize]);
        assert!(!after_wait[tokeniser.note_token(60, 12).unwrap() as usize]);

        let (_, released) = super::masks(&tokeniser, &tokens, None, None).unwrap();
        assert_eq!(released.time, 24);
        assert!(released.sounding.is_empty());
        let legal = released.legal_tokens(&tokeniser);
        assert!(legal[tokeniser.note_token(60, 12).unwrap() as usize]);
        assert!(legal[tokeniser.note_token(60, 48).unwrap() as usize]);
        assert!(!legal[tokeniser.note_token(60, 72).unwrap() as usize]);
    }

    #[test]
    fn test_bar_closes_only_at_capacity() {
        let tokeniser = tokeniser();
        let note = tokeniser.note_token(60, 24).unwrap();
        let quarter = tokeniser.wait_band().id(23);
        let tokens = [
            TOKEN_START,
            note,
            quarter,
            quarter,
            quarter,
            tokeniser.wait_band().id(22),
            tokeniser.wait_band().id(0),
        ];
        let (masks, state) = masks(&tokeniser, &tokens, None, None).unwrap();
        assert_eq!(state.time, 96);
        assert!(state.at_bar_end);

        let almost = &masks[5];
        assert!(!almost[TOKEN_STOP as usize]);
        assert!(!almost[TOKEN_BAR as usize]);
        assert!(almost[tokeniser.wait_band().id(0) as usize]);
        assert!(!almost[tokeniser.wait_band().id(1) as usize]);

        let full = &masks[6];
        assert!(full[TOKEN_STOP as usize]);
        assert!(full[TOKEN_BAR as usize]);
        assert!(tokeniser.wait_band().ids().all(|t| !full[t as usize]));
        assert!(!full[tokeniser.note_token(62, 12).unwrap() as usize]);
    }

    #[test]
    fn test_consumption_errors() {
        let tokeniser = tokeniser();
        let wait = tokeniser.wait_band().id(23);
        let time_signature = tokeniser.time_signature_band().id(0);
        let result = masks(&tokeniser, &[TOKEN_START, wait, time_signature], None, None);
        assert_eq!(result.unwrap_err(), TokenisationError::MidBarTimeSignature(24));

        let long = tokeniser.note_token(60, 96).unwrap();
        let result = masks(&tokeniser, &[TOKEN_START, wait, long], None, None);
        assert_eq!(
            result.unwrap_err(),
            TokenisationError::CapacityUnderflow {
                token: long,
                required: 96,
                remaining: 72
            }
        );

        let unknown = tokeniser.vocabulary().len() as TokenId;
        assert_eq!(
            masks(&tokeniser, &[unknown], None, None).unwrap_err(),
            TokenisationError::UnknownToken(unknown)
        );
    }

    #[test]
    fn test_tokenised_bars_are_legal() {
        let mut tokeniser = tokeniser();
        let tokens = tokeniser.tokenise_bars(&test_bars()).unwrap();
        let (masks, state) = masks(&tokeniser, &tokens, None, None).unwrap();
        assert_eq!(masks.len(), tokens.len());
        for (mask, &next) in masks.iter().zip(&tokens[1..]) {
            assert!(mask[next as usize]);
        }
        assert!(state.stopped);
        assert_eq!(state.time, 192);
        let pad_only: Vec<bool> = (0..mask_len(&tokeniser)).map(|i| i == 0).collect();
        assert_eq!(masks.last(), Some(&pad_only));
    }

    fn mask_len(tokeniser: &LargeVocabularyNotelikeTokeniser) -> usize {
        tokeniser.vocabulary().len()
    }

    #[test]
    fn test_resume_from_serialised_state() {
        let mut tokeniser = tokeniser();
        let tokens = tokeniser.tokenise_bars(&test_bars()).unwrap();
        let (full, _) = masks(&tokeniser, &tokens, None, None).unwrap();

        let (head, state) = masks(&tokeniser, &tokens, None, Some(7)).unwrap();
        assert_eq!(state.step, 7);
        let json = serde_json::to_string(&state).unwrap();
        let restored: MaskState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);

        let (tail, end) = masks(&tokeniser, &tokens, Some(restored), None).unwrap();
        assert_eq!(end.step, tokens.len());
        let mut resumed = head;
        resumed.extend(tail);
        assert_eq!(resumed, full);
    }
}
