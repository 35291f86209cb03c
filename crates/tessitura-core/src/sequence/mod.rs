//! Sequence facade over the absolute and relative timelines

mod absolute;
mod relative;

pub use absolute::{AbsoluteSequence, NOTE_KINDS, Pairing};
pub use relative::RelativeSequence;

use std::cell::OnceCell;
use std::collections::BTreeMap;

use crate::bar::{self, Bar};
use crate::durations::{default_note_values, default_step_sizes};
use crate::error::{Result, SequenceError};
use crate::message::{Message, MessageKind, MessageType};
use crate::settings::Settings;
use crate::theory::Key;

/// Factor for [`Sequence::scale`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleFactor {
    /// Multiply every wait by the factor
    Stretch(u32),
    /// Divide by the factor, grouping bars of equal time signature
    Compress(u32),
}

impl ScaleFactor {
    /// Accept integers and inverses of integers.
    pub fn from_ratio(ratio: f64) -> std::result::Result<Self, SequenceError> {
        const EPSILON: f64 = 1e-9;
        if ratio >= 1.0 && ratio.fract().abs() < EPSILON && ratio <= f64::from(u32::MAX) {
            return Ok(ScaleFactor::Stretch(ratio as u32));
        }
        if ratio > 0.0 && ratio < 1.0 {
            let inverse = 1.0 / ratio;
            if (inverse - inverse.round()).abs() < EPSILON && inverse <= f64::from(u32::MAX) {
                return Ok(ScaleFactor::Compress(inverse.round() as u32));
            }
        }
        Err(SequenceError::NonIntegerScale(ratio))
    }
}

/// The timeline mutators last worked on.
#[derive(Debug, Clone)]
enum Timeline {
    Absolute(AbsoluteSequence),
    Relative(RelativeSequence),
}

impl Default for Timeline {
    fn default() -> Self {
        Timeline::Absolute(AbsoluteSequence::new())
    }
}

/// A piece of music on one timeline, viewable on both.
///
/// One timeline is authoritative; the other is derived on first read and cached until the next
/// mutation. Every mutation goes through [`update_absolute`](Self::update_absolute) or
/// [`update_relative`](Self::update_relative), which promote the edited side and drop the cache.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    timeline: Timeline,
    absolute: OnceCell<AbsoluteSequence>,
    relative: OnceCell<RelativeSequence>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_absolute(absolute: AbsoluteSequence) -> Self {
        Self {
            timeline: Timeline::Absolute(absolute),
            ..Self::default()
        }
    }

    pub fn from_relative(relative: RelativeSequence) -> Self {
        Self {
            timeline: Timeline::Relative(relative),
            ..Self::default()
        }
    }

    pub fn from_absolute_messages(messages: Vec<Message>) -> Self {
        Self::from_absolute(AbsoluteSequence::from_messages(messages))
    }

    pub fn from_relative_messages(messages: Vec<Message>) -> Self {
        Self::from_relative(RelativeSequence::from_messages(messages))
    }

    // ========================================================================
    // Timeline access
    // ========================================================================

    pub fn abs(&self) -> &AbsoluteSequence {
        match &self.timeline {
            Timeline::Absolute(absolute) => absolute,
            Timeline::Relative(relative) => self.absolute.get_or_init(|| relative.to_absolute()),
        }
    }

    pub fn rel(&self) -> &RelativeSequence {
        match &self.timeline {
            Timeline::Relative(relative) => relative,
            Timeline::Absolute(absolute) => self.relative.get_or_init(|| absolute.to_relative()),
        }
    }

    /// True while the absolute view has to be regenerated before it can be read.
    pub fn is_absolute_stale(&self) -> bool {
        matches!(self.timeline, Timeline::Relative(_)) && self.absolute.get().is_none()
    }

    /// True while the relative view has to be regenerated before it can be read.
    pub fn is_relative_stale(&self) -> bool {
        matches!(self.timeline, Timeline::Absolute(_)) && self.relative.get().is_none()
    }

    /// Mutate the absolute timeline, invalidating the relative one.
    pub fn update_absolute<T>(&mut self, f: impl FnOnce(&mut AbsoluteSequence) -> T) -> T {
        let cached = self.absolute.take();
        self.relative.take();
        let mut absolute = match std::mem::take(&mut self.timeline) {
            Timeline::Absolute(absolute) => absolute,
            Timeline::Relative(relative) => cached.unwrap_or_else(|| relative.to_absolute()),
        };
        let result = f(&mut absolute);
        self.timeline = Timeline::Absolute(absolute);
        result
    }

    /// Mutate the relative timeline, invalidating the absolute one.
    pub fn update_relative<T>(&mut self, f: impl FnOnce(&mut RelativeSequence) -> T) -> T {
        let cached = self.relative.take();
        self.absolute.take();
        let mut relative = match std::mem::take(&mut self.timeline) {
            Timeline::Relative(relative) => relative,
            Timeline::Absolute(absolute) => cached.unwrap_or_else(|| absolute.to_relative()),
        };
        let result = f(&mut relative);
        self.timeline = Timeline::Relative(relative);
        result
    }

    // ========================================================================
    // Mutators
    // ========================================================================

    pub fn add_absolute_message(&mut self, message: Message) {
        self.update_absolute(|absolute| absolute.add_message(message));
    }

    pub fn add_relative_message(&mut self, message: Message) {
        self.update_relative(|relative| relative.add_message(message));
    }

    pub fn insert_relative_message(&mut self, index: usize, message: Message) {
        self.update_relative(|relative| relative.insert_message(index, message));
    }

    pub fn overwrite_absolute_messages(&mut self, messages: Vec<Message>) {
        self.update_absolute(|absolute| *absolute = AbsoluteSequence::from_messages(messages));
    }

    pub fn overwrite_relative_messages(&mut self, messages: Vec<Message>) {
        self.update_relative(|relative| *relative = RelativeSequence::from_messages(messages));
    }

    /// Append the given sequences end to end.
    pub fn concatenate(&mut self, others: &[Sequence]) {
        self.update_relative(|relative| relative.concatenate(others.iter().map(Sequence::rel)));
    }

    /// Union of all events, normalised afterwards.
    pub fn merge(&mut self, others: &[Sequence]) {
        self.update_absolute(|absolute| absolute.merge(others.iter().map(Sequence::abs)));
        self.normalise();
    }

    pub fn normalise(&mut self) {
        self.update_relative(RelativeSequence::normalise);
    }

    pub fn pad(&mut self, length: u64) {
        self.update_relative(|relative| relative.pad(length));
    }

    pub fn set_channel(&mut self, channel: u8) {
        self.update_relative(|relative| relative.set_channel(channel));
    }

    pub fn cutoff(&mut self, maximum_length: u64, reduced_length: u64) {
        self.update_absolute(|absolute| absolute.cutoff(maximum_length, reduced_length));
    }

    pub fn quantise(&mut self, step_sizes: &[u64]) {
        self.update_absolute(|absolute| absolute.quantise(step_sizes));
    }

    pub fn quantise_note_lengths(
        &mut self,
        allowed_durations: &[u64],
        standard_length: u64,
        allow_extension: bool,
    ) {
        self.update_absolute(|absolute| {
            absolute.quantise_note_lengths(allowed_durations, standard_length, allow_extension)
        });
    }

    /// Quantise onto the default grid, requantise note lengths onto the default note values and
    /// normalise.
    pub fn quantise_and_normalise(&mut self) {
        let ppqn = Settings::global().ppqn;
        self.quantise(&default_step_sizes(0, 1));
        self.quantise_note_lengths(&default_note_values(), ppqn, true);
        self.normalise();
    }

    /// Transpose by half-tone steps; see [`RelativeSequence::transpose`].
    ///
    /// Wrapped notes may now overlap, so the sequence is normalised and its note lengths
    /// requantised in that case.
    pub fn transpose(&mut self, semitones: i32) -> bool {
        let shifted = self.update_relative(|relative| relative.transpose(semitones));
        if shifted {
            self.normalise();
            let ppqn = Settings::global().ppqn;
            self.quantise_note_lengths(&default_note_values(), ppqn, true);
        }
        shifted
    }

    /// Split into fragments of the given capacities; see [`RelativeSequence::split`].
    pub fn split(&self, capacities: &[u64]) -> Vec<Sequence> {
        self.rel()
            .split(capacities)
            .into_iter()
            .map(Sequence::from_relative)
            .collect()
    }

    /// Scale the timeline.
    ///
    /// Compression splits the sequence into bars along the time signatures of `meta` (the
    /// sequence itself if `None`). Consecutive bars sharing a time signature are compressed into
    /// one group; a bar whose group would mix signatures is compressed on its own and its time
    /// signature rewritten, dividing the numerator if possible and multiplying the denominator
    /// otherwise.
    ///
    /// With `quantise_afterwards` the result is moved back onto the default grid and note values
    /// through [`Sequence::quantise_and_normalise`].
    pub fn scale(
        &mut self,
        factor: ScaleFactor,
        meta: Option<&Sequence>,
        quantise_afterwards: bool,
    ) -> Result<()> {
        match factor {
            ScaleFactor::Stretch(0) | ScaleFactor::Compress(0) => {
                return Err(SequenceError::InvalidScaleFactor(0).into());
            }
            ScaleFactor::Stretch(n) => {
                self.update_relative(|relative| relative.stretch(u64::from(n)));
            }
            ScaleFactor::Compress(1) => {}
            ScaleFactor::Compress(n) => self.compress(n, meta)?,
        }
        if quantise_afterwards {
            self.quantise_and_normalise();
        }
        Ok(())
    }

    fn compress(&mut self, divisor: u32, meta: Option<&Sequence>) -> Result<()> {
        let had_time_signatures = self
            .rel()
            .messages()
            .iter()
            .any(|m| m.message_type() == MessageType::TimeSignature);
        let meta = meta.cloned().unwrap_or_else(|| self.clone());
        let bars = bar::split_into_bars(&[self.clone(), meta], 1, false)?
            .into_iter()
            .next()
            .unwrap_or_default();

        let group_size = divisor as usize;
        let divisor = u64::from(divisor);
        let mut messages = Vec::new();
        let mut i = 0;

        while i < bars.len() {
            let end = (i + group_size).min(bars.len());
            let group = &bars[i..end];
            let signature = (group[0].numerator, group[0].denominator);

            if group.iter().all(|b| (b.numerator, b.denominator) == signature) {
                let group_messages = group
                    .iter()
                    .flat_map(|bar| bar.sequence.rel().messages().iter().copied());
                compress_waits(group_messages, divisor, &mut messages);
                i = end;
            } else {
                let (numerator, denominator) = signature;
                let rewritten = if u64::from(numerator) % divisor == 0 {
                    ((u64::from(numerator) / divisor) as u8, denominator)
                } else {
                    let denominator = u64::from(denominator) * divisor;
                    let denominator = u8::try_from(denominator)
                        .map_err(|_| SequenceError::InvalidScaleFactor(divisor as u32))?;
                    (numerator, denominator)
                };
                let bar_messages = group[0].sequence.rel().messages().iter().map(|m| {
                    match m.kind {
                        MessageKind::TimeSignature { .. } => {
                            Message::time_signature(rewritten.0, rewritten.1).on_channel(m.channel)
                        }
                        _ => *m,
                    }
                });
                compress_waits(bar_messages, divisor, &mut messages);
                i += 1;
            }
        }

        if !had_time_signatures {
            messages.retain(|m| m.message_type() != MessageType::TimeSignature);
        }
        self.overwrite_relative_messages(messages);
        self.normalise();
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn pairings(
        &self,
        kinds: &[MessageType],
        standard_length: u64,
        impute: bool,
    ) -> BTreeMap<u8, Vec<Pairing>> {
        self.abs().pairings(kinds, standard_length, impute)
    }

    pub fn interleaved_pairings(
        &self,
        kinds: &[MessageType],
        standard_length: u64,
        impute: bool,
    ) -> Vec<(u8, Pairing)> {
        self.abs().interleaved_pairings(kinds, standard_length, impute)
    }

    pub fn message_times_of_type(&self, kinds: &[MessageType]) -> Vec<(u64, Message)> {
        self.abs().message_times_of_type(kinds)
    }

    pub fn channel(&self) -> std::result::Result<Option<u8>, SequenceError> {
        self.abs().channel()
    }

    pub fn is_channel_consistent(&self) -> bool {
        self.abs().is_channel_consistent()
    }

    /// Total duration in ticks, read from whichever timeline is authoritative.
    pub fn duration(&self) -> u64 {
        match &self.timeline {
            Timeline::Absolute(absolute) => absolute.duration(),
            Timeline::Relative(relative) => relative.duration(),
        }
    }

    /// Duration in quarter notes.
    pub fn duration_relation(&self) -> f64 {
        self.duration() as f64 / Settings::global().ppqn as f64
    }

    /// True if no note is ever started.
    pub fn is_empty(&self) -> bool {
        match &self.timeline {
            Timeline::Absolute(absolute) => absolute.is_empty(),
            Timeline::Relative(relative) => relative.is_empty(),
        }
    }

    /// Same notes with the same timing; see [`AbsoluteSequence::is_equivalent`].
    pub fn is_equivalent(&self, other: &Sequence) -> bool {
        self.abs()
            .is_equivalent(other.abs(), Settings::global().ppqn)
    }

    pub fn guess_key(&self) -> Key {
        self.rel().guess_key()
    }

    /// Split parallel sequences into index-aligned bars; see [`bar::split_into_bars`].
    pub fn split_into_bars(
        sequences: &[Sequence],
        meta_index: usize,
        quantise_note_lengths: bool,
    ) -> Result<Vec<Vec<Bar>>> {
        bar::split_into_bars(sequences, meta_index, quantise_note_lengths)
    }
}

/// Push `messages` with every wait divided by `divisor`, rounding on the running total so the
/// group's length divides exactly whenever it can.
fn compress_waits<I>(messages: I, divisor: u64, output: &mut Vec<Message>)
where
    I: IntoIterator<Item = Message>,
{
    let mut consumed = 0;
    let mut emitted = 0;
    for message in messages {
        match message.kind {
            MessageKind::Wait { ticks } => {
                consumed += ticks;
                let target = consumed / divisor;
                if target > emitted {
                    output.push(Message::wait(target - emitted).on_channel(message.channel));
                    emitted = target;
                }
            }
            _ => output.push(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Sequence {
        Sequence::from_relative_messages(vec![
            Message::note_on(60, 100),
            Message::wait(48),
            Message::note_off(60),
            Message::wait(48),
        ])
    }

    #[test]
    fn test_empty_sequence() {
        let sequence = Sequence::new();
        assert_eq!(sequence.duration(), 0);
        assert_eq!(sequence.channel(), Ok(None));
        assert!(sequence.is_empty());
    }

    #[test]
    fn test_stale_flags() {
        let mut sequence = Sequence::new();
        sequence.add_absolute_message(Message::note_on(60, 100));
        assert!(!sequence.is_absolute_stale());
        assert!(sequence.is_relative_stale());

        sequence.add_relative_message(Message::wait(24));
        assert!(sequence.is_absolute_stale());
        assert!(!sequence.is_relative_stale());

        assert_eq!(sequence.abs().duration(), 24);
        assert!(!sequence.is_absolute_stale());
        assert!(!sequence.is_relative_stale());

        sequence.add_absolute_message(Message::note_off(60).at(24));
        assert!(sequence.is_relative_stale());
        assert_eq!(sequence.rel().messages().len(), 3);
    }

    #[test]
    fn test_overwrite_messages() {
        let mut sequence = scenario();
        sequence.overwrite_absolute_messages(vec![Message::note_on(62, 80).at(12), Message::note_off(62).at(36)]);
        assert_eq!(
            sequence.rel().messages(),
            &[
                Message::wait(12),
                Message::note_on(62, 80),
                Message::wait(24),
                Message::note_off(62),
            ]
        );
        sequence.overwrite_relative_messages(vec![Message::wait(5)]);
        assert_eq!(sequence.abs().duration(), 5);
    }

    #[test]
    fn test_scale_scenario() {
        let mut stretched = scenario();
        stretched.scale(ScaleFactor::Stretch(2), None, false).unwrap();
        assert_eq!(stretched.duration(), 192);

        let mut compressed = scenario();
        compressed
            .scale(ScaleFactor::from_ratio(0.5).unwrap(), None, false)
            .unwrap();
        assert_eq!(compressed.duration(), 48);
        assert!(
            compressed
                .rel()
                .messages()
                .iter()
                .all(|m| m.message_type() != MessageType::TimeSignature)
        );
    }

    #[test]
    fn test_compress_quantises_afterwards() {
        let short_note = || {
            Sequence::from_relative_messages(vec![
                Message::wait(1),
                Message::note_on(60, 100),
                Message::wait(1),
                Message::note_off(60),
                Message::wait(94),
            ])
        };
        let spans = |sequence: &Sequence| -> Vec<(u64, Option<u64>)> {
            sequence
                .interleaved_pairings(&NOTE_KINDS, 24, false)
                .iter()
                .map(|(_, p)| (p.start.time, p.duration()))
                .collect()
        };

        let mut raw = short_note();
        raw.scale(ScaleFactor::Compress(2), None, false).unwrap();
        assert_eq!(spans(&raw), vec![(0, Some(1))]);

        let mut quantised = short_note();
        quantised.scale(ScaleFactor::Compress(2), None, true).unwrap();
        let spans = spans(&quantised);
        assert_eq!(spans.len(), 1);
        let (start, length) = spans[0];
        assert_eq!(start, 0);
        let length = length.unwrap();
        assert!(default_note_values().contains(&length), "{length} is not a note value");
    }

    #[test]
    fn test_scale_factor_from_ratio() {
        assert_eq!(ScaleFactor::from_ratio(3.0), Ok(ScaleFactor::Stretch(3)));
        assert_eq!(ScaleFactor::from_ratio(0.25), Ok(ScaleFactor::Compress(4)));
        assert!(ScaleFactor::from_ratio(1.5).is_err());
        assert!(ScaleFactor::from_ratio(0.4).is_err());
        assert!(ScaleFactor::from_ratio(-2.0).is_err());
    }

    #[test]
    fn test_compress_rewrites_time_signature_of_mixed_group() {
        let meta = Sequence::from_relative_messages(vec![
            Message::time_signature(3, 4),
            Message::wait(72),
            Message::time_signature(4, 4),
            Message::wait(96),
        ]);
        let mut sequence = meta.clone();
        sequence.scale(ScaleFactor::Compress(2), Some(&meta), false).unwrap();
        let signatures: Vec<_> = sequence
            .rel()
            .messages()
            .iter()
            .filter_map(Message::time_signature_values)
            .collect();
        assert_eq!(signatures, vec![(3, 8), (4, 4)]);
        assert_eq!(sequence.duration(), 84);
    }

    #[test]
    fn test_concatenate_and_split() {
        let mut sequence = scenario();
        sequence.concatenate(&[scenario(), scenario()]);
        assert_eq!(sequence.duration(), 288);
        let fragments = sequence.split(&[96, 96]);
        assert_eq!(fragments.len(), 3);
        assert!(fragments.iter().all(|f| f.duration() == 96));
    }

    #[test]
    fn test_merge_and_equivalence() {
        let mut lower = Sequence::from_absolute_messages(vec![Message::note_on(48, 100), Message::note_off(48).at(24)]);
        let upper = Sequence::from_absolute_messages(vec![Message::note_on(72, 100), Message::note_off(72).at(24)]);
        lower.merge(std::slice::from_ref(&upper));
        assert_eq!(lower.interleaved_pairings(&NOTE_KINDS, 24, true).len(), 2);
        assert!(!lower.is_equivalent(&upper));
        assert!(lower.is_equivalent(&lower.clone()));
    }

    #[test]
    fn test_transpose_requantises_after_wrap() {
        let mut sequence = Sequence::from_relative_messages(vec![
            Message::note_on(100, 100),
            Message::wait(24),
            Message::note_off(100),
        ]);
        assert!(sequence.transpose(12));
        assert_eq!(sequence.abs().messages()[0].note(), Some(100));
    }

    #[test]
    fn test_quantise_and_normalise() {
        let mut sequence = Sequence::from_absolute_messages(vec![
            Message::time_signature(4, 4),
            Message::note_on(60, 100).at(1),
            Message::note_off(60).at(23),
            Message::note_on(64, 100).at(25),
            Message::note_off(64).at(49),
        ]);
        sequence.quantise_and_normalise();
        let spans: Vec<_> = sequence
            .interleaved_pairings(&NOTE_KINDS, 24, false)
            .iter()
            .map(|(_, p)| (p.start.time, p.duration()))
            .collect();
        assert_eq!(spans, vec![(0, Some(24)), (24, Some(24))]);
    }
}
