//! Bars and bar-aligned splitting of parallel sequences

use crate::durations::default_note_values;
use crate::error::{BarError, Result};
use crate::message::{Message, MessageKind, MessageType};
use crate::sequence::Sequence;
use crate::settings::Settings;
use crate::theory::Key;

/// A sequence filling exactly one bar of its time signature.
#[derive(Debug, Clone)]
pub struct Bar {
    pub sequence: Sequence,
    pub numerator: u8,
    pub denominator: u8,
    pub key: Option<Key>,
}

impl Bar {
    /// Build a bar, padding short content to the bar's capacity.
    ///
    /// The resulting sequence starts with exactly one time signature event matching the bar.
    pub fn new(
        sequence: Sequence,
        numerator: u8,
        denominator: u8,
        key: Option<Key>,
    ) -> std::result::Result<Self, BarError> {
        if numerator == 0 || denominator == 0 {
            return Err(BarError::InvalidTimeSignature(numerator, denominator));
        }
        let capacity = Settings::global().bar_capacity(numerator, denominator);

        let found: Vec<(u8, u8)> = sequence
            .rel()
            .messages()
            .iter()
            .filter_map(Message::time_signature_values)
            .collect();
        let mut distinct = found.clone();
        distinct.sort_unstable();
        distinct.dedup();
        match distinct.as_slice() {
            [] => {}
            [single] if *single != (numerator, denominator) => {
                return Err(BarError::InconsistentTimeSignature {
                    expected: (numerator, denominator),
                    found: *single,
                });
            }
            [_] => {
                if found.len() > 1 {
                    tracing::debug!(
                        numerator,
                        denominator,
                        count = found.len(),
                        "Collapsing repeated time signatures in bar"
                    );
                }
            }
            _ => return Err(BarError::MultipleTimeSignatures(distinct)),
        }

        let duration = sequence.duration();
        if duration > capacity {
            return Err(BarError::CapacityExceeded { duration, capacity });
        }

        let channel = sequence
            .rel()
            .messages()
            .iter()
            .find(|m| m.message_type() != MessageType::Wait)
            .map_or(0, |m| m.channel);
        let mut messages = Vec::with_capacity(sequence.rel().messages().len() + 2);
        messages.push(Message::time_signature(numerator, denominator).on_channel(channel));
        messages.extend(
            sequence
                .rel()
                .messages()
                .iter()
                .filter(|m| m.message_type() != MessageType::TimeSignature)
                .copied(),
        );

        let mut sequence = Sequence::from_relative_messages(messages);
        sequence.pad(capacity);

        Ok(Self {
            sequence,
            numerator,
            denominator,
            key,
        })
    }

    /// Length of the bar in ticks.
    pub fn capacity(&self) -> u64 {
        Settings::global().bar_capacity(self.numerator, self.denominator)
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Copy of the bar transposed by half-tone steps, together with whether notes had to be
    /// wrapped into the pitch bounds.
    pub fn transposed(&self, semitones: i32) -> (Bar, bool) {
        let mut bar = self.clone();
        let shifted = bar.sequence.transpose(semitones);
        bar.key = bar.key.map(|key| key.transpose(semitones));
        (bar, shifted)
    }

    /// Concatenate bars into one sequence.
    pub fn to_sequence(bars: &[Bar]) -> Sequence {
        let mut sequence = Sequence::new();
        let parts: Vec<Sequence> = bars.iter().map(|bar| bar.sequence.clone()).collect();
        sequence.concatenate(&parts);
        sequence
    }
}

/// Split parallel sequences into bars along the signatures of `sequences[meta_index]`.
///
/// Time and key signatures are read from the meta sequence; the default time signature applies
/// until the first one. Every sequence yields the same number of bars: sequences that end early
/// are padded with empty bars until the longest one is exhausted. With `quantise_note_lengths`
/// the notes of each bar are requantised onto the default note values without extending them.
pub fn split_into_bars(
    sequences: &[Sequence],
    meta_index: usize,
    quantise_note_lengths: bool,
) -> Result<Vec<Vec<Bar>>> {
    let settings = Settings::global();
    let (mut numerator, mut denominator) = settings.default_time_signature();
    let mut key = None;

    let (time_signatures, key_signatures) = match sequences.get(meta_index) {
        Some(meta) => (
            meta.message_times_of_type(&[MessageType::TimeSignature]),
            meta.message_times_of_type(&[MessageType::KeySignature]),
        ),
        None => {
            tracing::warn!(meta_index, "Meta sequence index out of range, using defaults");
            (Vec::new(), Vec::new())
        }
    };
    let mut time_signatures = time_signatures.into_iter().peekable();
    let mut key_signatures = key_signatures.into_iter().peekable();

    let mut remaining: Vec<Option<Sequence>> = sequences.iter().cloned().map(Some).collect();
    let mut bars: Vec<Vec<Bar>> = vec![Vec::new(); sequences.len()];
    let mut cursor = 0;

    while remaining.iter().any(Option::is_some) {
        while let Some((_, message)) = time_signatures.next_if(|(time, _)| *time <= cursor) {
            if let Some(values) = message.time_signature_values() {
                (numerator, denominator) = values;
            }
        }
        while let Some((_, message)) = key_signatures.next_if(|(time, _)| *time <= cursor) {
            if let MessageKind::KeySignature { key: current } = message.kind {
                key = Some(current);
            }
        }

        let length = settings.bar_capacity(numerator, denominator);
        if length == 0 {
            return Err(BarError::InvalidTimeSignature(numerator, denominator).into());
        }
        cursor += length;

        for (slot, track_bars) in remaining.iter_mut().zip(bars.iter_mut()) {
            let mut fragment = match slot.take() {
                Some(sequence) => {
                    let mut fragments = sequence.split(&[length]).into_iter();
                    let fragment = fragments.next().unwrap_or_default();
                    *slot = fragments
                        .next()
                        .filter(|rest| rest.duration() > 0 || !rest.is_empty());
                    fragment
                }
                None => Sequence::new(),
            };

            if quantise_note_lengths {
                fragment.quantise_note_lengths(&default_note_values(), settings.ppqn, false);
            }
            track_bars.push(Bar::new(fragment, numerator, denominator, key)?);
        }
    }

    tracing::debug!(
        sequences = sequences.len(),
        bars = bars.first().map_or(0, Vec::len),
        "Split sequences into bars"
    );
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TessituraError;

    fn note(pitch: u8, length: u64) -> Vec<Message> {
        vec![
            Message::note_on(pitch, 100),
            Message::wait(length),
            Message::note_off(pitch),
        ]
    }

    #[test]
    fn test_bar_pads_and_places_time_signature() {
        let bar = Bar::new(Sequence::from_relative_messages(note(60, 24)), 4, 4, None).unwrap();
        assert_eq!(bar.sequence.duration(), 96);
        assert_eq!(
            bar.sequence.rel().messages()[0],
            Message::time_signature(4, 4)
        );
        let count = bar
            .sequence
            .rel()
            .messages()
            .iter()
            .filter(|m| m.message_type() == MessageType::TimeSignature)
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_bar_rejects_overflow() {
        let result = Bar::new(Sequence::from_relative_messages(note(60, 100)), 4, 4, None);
        assert_eq!(
            result.unwrap_err(),
            BarError::CapacityExceeded {
                duration: 100,
                capacity: 96
            }
        );
    }

    #[test]
    fn test_bar_time_signature_checks() {
        let mut messages = vec![Message::time_signature(3, 4), Message::time_signature(3, 4)];
        messages.extend(note(60, 24));
        assert!(Bar::new(Sequence::from_relative_messages(messages.clone()), 3, 4, None).is_ok());
        assert_eq!(
            Bar::new(Sequence::from_relative_messages(messages), 4, 4, None).unwrap_err(),
            BarError::InconsistentTimeSignature {
                expected: (4, 4),
                found: (3, 4)
            }
        );

        let mixed = vec![Message::time_signature(3, 4), Message::time_signature(4, 4)];
        assert_eq!(
            Bar::new(Sequence::from_relative_messages(mixed), 4, 4, None).unwrap_err(),
            BarError::MultipleTimeSignatures(vec![(3, 4), (4, 4)])
        );
        assert_eq!(
            Bar::new(Sequence::new(), 4, 0, None).unwrap_err(),
            BarError::InvalidTimeSignature(4, 0)
        );
    }

    #[test]
    fn test_split_into_bars_aligns_tracks() {
        let mut long = note(60, 96);
        long.extend(note(62, 96));
        long.extend(note(64, 48));
        let short = note(48, 24);
        let sequences = vec![
            Sequence::from_relative_messages(long),
            Sequence::from_relative_messages(short),
        ];

        let bars = split_into_bars(&sequences, 0, false).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].len(), 3);
        assert_eq!(bars[1].len(), 3);
        assert!(bars.iter().flatten().all(|bar| bar.sequence.duration() == 96));
        assert!(!bars[1][0].is_empty());
        assert!(bars[1][1].is_empty());
    }

    #[test]
    fn test_split_into_bars_follows_meta_signatures() {
        let meta = Sequence::from_relative_messages(vec![
            Message::time_signature(3, 4),
            Message::key_signature(Key::G),
            Message::wait(72),
            Message::time_signature(6, 8),
            Message::wait(72),
        ]);
        let mut melody = note(67, 72);
        melody.extend(note(69, 72));
        let sequences = vec![Sequence::from_relative_messages(melody), meta];

        let bars = split_into_bars(&sequences, 1, true).unwrap();
        let signatures: Vec<_> = bars[0].iter().map(|b| (b.numerator, b.denominator)).collect();
        assert_eq!(signatures, vec![(3, 4), (6, 8)]);
        assert!(bars[0].iter().all(|b| b.key == Some(Key::G)));
        assert!(bars[0].iter().all(|b| b.sequence.duration() == 72));
    }

    #[test]
    fn test_split_closes_notes_across_bar_lines() {
        let sequences = vec![Sequence::from_relative_messages(note(60, 144))];
        let bars = split_into_bars(&sequences, 0, false).unwrap();
        assert_eq!(bars[0].len(), 2);
        let first = bars[0][0].sequence.interleaved_pairings(&crate::sequence::NOTE_KINDS, 24, false);
        let second = bars[0][1].sequence.interleaved_pairings(&crate::sequence::NOTE_KINDS, 24, false);
        assert_eq!(first[0].1.duration(), Some(96));
        assert_eq!(second[0].1.duration(), Some(48));
    }

    #[test]
    fn test_to_sequence_concatenates() {
        let bars = split_into_bars(
            &[Sequence::from_relative_messages(note(60, 144))],
            0,
            false,
        )
        .unwrap();
        assert_eq!(Bar::to_sequence(&bars[0]).duration(), 192);
    }

    #[test]
    fn test_transposed_is_copy() {
        let bar = Bar::new(Sequence::from_relative_messages(note(60, 24)), 4, 4, Some(Key::C)).unwrap();
        let (up, shifted) = bar.transposed(2);
        assert!(!shifted);
        assert_eq!(up.key, Some(Key::D));
        assert_eq!(bar.key, Some(Key::C));
        assert_eq!(bar.sequence.abs().messages()[1].note(), Some(60));
        assert_eq!(up.sequence.abs().messages()[1].note(), Some(62));
    }

    #[test]
    fn test_split_rejects_zero_length_bars() {
        let meta = Sequence::from_relative_messages(vec![Message::time_signature(0, 4), Message::wait(24)]);
        let result = split_into_bars(&[meta], 0, false);
        assert!(matches!(
            result,
            Err(TessituraError::Bar(BarError::InvalidTimeSignature(0, 4)))
        ));
    }
}
