//! Events in emission order, separated by waits

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageKind};
use crate::sequence::absolute::AbsoluteSequence;
use crate::settings::Settings;
use crate::theory::{self, Key};

/// Timeline where time only passes through [`MessageKind::Wait`] events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativeSequence {
    messages: Vec<Message>,
}

impl RelativeSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Insert at `index`, appending if the index lies past the end.
    pub fn insert_message(&mut self, index: usize, message: Message) {
        let index = index.min(self.messages.len());
        self.messages.insert(index, message);
    }

    pub fn concatenate<'a, I>(&mut self, others: I)
    where
        I: IntoIterator<Item = &'a RelativeSequence>,
    {
        for other in others {
            self.messages.extend_from_slice(&other.messages);
        }
    }

    /// Sum of all waits.
    pub fn duration(&self) -> u64 {
        self.messages.iter().map(Message::wait_ticks).sum()
    }

    /// Duration in quarter notes.
    pub fn duration_relation(&self) -> f64 {
        self.duration() as f64 / Settings::global().ppqn as f64
    }

    /// True if no note is ever started.
    pub fn is_empty(&self) -> bool {
        !self.messages.iter().any(Message::is_note_on)
    }

    pub fn set_channel(&mut self, channel: u8) {
        for message in &mut self.messages {
            message.channel = channel;
        }
    }

    /// Append a wait so the sequence lasts at least `length` ticks.
    pub fn pad(&mut self, length: u64) {
        let duration = self.duration();
        if duration < length {
            self.messages.push(Message::wait(length - duration));
        }
    }

    /// Multiply every wait by `factor`.
    pub fn stretch(&mut self, factor: u64) {
        for message in &mut self.messages {
            if let MessageKind::Wait { ticks } = &mut message.kind {
                *ticks *= factor;
            }
        }
    }

    /// Remove redundant and invalid events.
    ///
    /// Consecutive waits are merged and empty ones dropped, unchanged time and key signatures are
    /// dropped, re-opened notes collapse into the outermost instance, unmatched note offs are
    /// dropped and notes that are never closed are removed.
    pub fn normalise(&mut self) {
        let mut normalised: Vec<Message> = Vec::with_capacity(self.messages.len());
        let mut time_signature: Option<(u8, u8)> = None;
        let mut key: Option<Key> = None;
        // (nesting depth, index of the kept note on)
        let mut open: HashMap<(u8, u8), (usize, usize)> = HashMap::new();

        for message in &self.messages {
            match message.kind {
                MessageKind::TimeSignature { .. } => {
                    let values = message.time_signature_values();
                    if values == time_signature {
                        tracing::debug!(?values, "Dropping repeated time signature");
                        continue;
                    }
                    time_signature = values;
                }
                MessageKind::KeySignature { key: current } => {
                    if key == Some(current) {
                        continue;
                    }
                    key = Some(current);
                }
                MessageKind::NoteOn { note, .. } => {
                    let entry = open.entry((message.channel, note)).or_insert((0, 0));
                    entry.0 += 1;
                    if entry.0 > 1 {
                        continue;
                    }
                    entry.1 = normalised.len();
                }
                MessageKind::NoteOff { note } => match open.get_mut(&(message.channel, note)) {
                    Some(entry) if entry.0 > 0 => {
                        entry.0 -= 1;
                        if entry.0 > 0 {
                            continue;
                        }
                    }
                    _ => {
                        tracing::debug!(note, "Dropping unmatched note off");
                        continue;
                    }
                },
                _ => {}
            }
            normalised.push(*message);
        }

        let mut unclosed: Vec<usize> = open
            .values()
            .filter(|(depth, _)| *depth > 0)
            .map(|(_, index)| *index)
            .collect();
        unclosed.sort_unstable_by(|a, b| b.cmp(a));
        for index in unclosed {
            tracing::debug!(index, "Removing note that is never closed");
            normalised.remove(index);
        }

        self.messages = consolidate_waits(normalised);
    }

    /// Cut the timeline into fragments of the given capacities.
    ///
    /// A wait crossing a boundary is split; notes sounding at the boundary are closed in the
    /// current fragment and re-opened at the start of the next one. Note ons and other events
    /// found exactly at a boundary move to the next fragment, together with note offs closing
    /// them. A zero capacity yields an empty fragment while a wait is still pending. Whatever is
    /// left after the last capacity forms a final fragment.
    pub fn split(&self, capacities: &[u64]) -> Vec<RelativeSequence> {
        let mut fragments = Vec::new();
        let mut working: VecDeque<Message> = self.messages.iter().copied().collect();
        let mut current = RelativeSequence::new();
        let mut open: BTreeMap<(u8, u8), Message> = BTreeMap::new();

        for &capacity in capacities {
            let mut carried: Vec<Message> = Vec::new();
            let mut remaining = capacity;

            loop {
                let Some(message) = working.pop_front() else {
                    if !current.messages.is_empty() {
                        fragments.push(std::mem::take(&mut current));
                    }
                    current.messages.append(&mut carried);
                    break;
                };

                match message.kind {
                    MessageKind::NoteOn { note, .. } => {
                        if remaining > 0 {
                            current.messages.push(message);
                            open.insert((message.channel, note), message);
                        } else {
                            carried.push(message);
                        }
                    }
                    MessageKind::NoteOff { note } => {
                        let deferred = carried
                            .iter()
                            .any(|m| m.channel == message.channel && m.note() == Some(note));
                        if remaining == 0 && deferred {
                            carried.push(message);
                        } else {
                            current.messages.push(message);
                            open.remove(&(message.channel, note));
                        }
                    }
                    MessageKind::Wait { ticks } if ticks <= remaining => {
                        remaining -= ticks;
                        current.messages.push(message);
                    }
                    MessageKind::Wait { ticks } => {
                        if remaining > 0 {
                            current
                                .messages
                                .push(Message::wait(remaining).on_channel(message.channel));
                        }
                        for ((channel, note), on) in std::mem::take(&mut open) {
                            current
                                .messages
                                .push(Message::note_off(note).on_channel(channel));
                            carried.push(on);
                        }
                        carried.push(Message::wait(ticks - remaining).on_channel(message.channel));

                        fragments.push(std::mem::take(&mut current));
                        for message in carried.drain(..).rev() {
                            working.push_front(message);
                        }
                        break;
                    }
                    _ => {
                        if remaining > 0 {
                            current.messages.push(message);
                        } else {
                            carried.push(message);
                        }
                    }
                }
            }
        }

        current.messages.extend(working);
        if !current.messages.is_empty() {
            fragments.push(current);
        }
        fragments
    }

    /// Transpose notes and key signatures by half-tone steps.
    ///
    /// Notes leaving the configured pitch bounds are moved back by octaves; returns whether that
    /// happened for any note.
    pub fn transpose(&mut self, semitones: i32) -> bool {
        let settings = Settings::global();
        let lower = i32::from(settings.note_lower_bound);
        let upper = i32::from(settings.note_upper_bound);
        let mut had_to_shift = false;

        for message in &mut self.messages {
            match message.kind {
                MessageKind::NoteOn { note, .. } | MessageKind::NoteOff { note } => {
                    let mut pitch = i32::from(note) + semitones;
                    while pitch < lower {
                        had_to_shift = true;
                        pitch += 12;
                    }
                    while pitch > upper {
                        had_to_shift = true;
                        pitch -= 12;
                    }
                    message.set_note(pitch.clamp(0, 127) as u8);
                }
                MessageKind::KeySignature { key } => {
                    message.kind = MessageKind::KeySignature {
                        key: key.transpose(semitones),
                    };
                }
                _ => {}
            }
        }

        if had_to_shift {
            tracing::debug!(semitones, "Wrapped notes into pitch bounds while transposing");
        }
        had_to_shift
    }

    /// Key signature at the start of the sequence, or the best fit for its notes.
    pub fn guess_key(&self) -> Key {
        for message in &self.messages {
            match message.kind {
                MessageKind::KeySignature { key } => return key,
                MessageKind::Wait { .. } => break,
                _ => {}
            }
        }
        theory::guess_key(self.messages.iter().filter(|m| m.is_note_on()).filter_map(Message::note))
    }

    /// Convert to absolute time, anchoring a trailing wait with an internal marker.
    pub fn to_absolute(&self) -> AbsoluteSequence {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        let mut current = 0;

        for message in &self.messages {
            match message.kind {
                MessageKind::Wait { ticks } => current += ticks,
                _ => messages.push(message.at(current)),
            }
        }

        let ends_on_wait = messages
            .last()
            .map_or(current > 0, |last: &Message| last.time < current);
        if ends_on_wait {
            messages.push(Message::internal().at(current));
        }

        AbsoluteSequence::from_messages(messages)
    }
}

/// Merge adjacent waits and drop empty ones.
fn consolidate_waits(messages: Vec<Message>) -> Vec<Message> {
    let mut result: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        if let MessageKind::Wait { ticks } = message.kind {
            if ticks == 0 {
                continue;
            }
            if let Some(MessageKind::Wait { ticks: previous }) =
                result.last_mut().map(|last| &mut last.kind)
            {
                *previous += ticks;
                continue;
            }
        }
        result.push(message);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    fn scenario() -> RelativeSequence {
        RelativeSequence::from_messages(vec![
            Message::note_on(60, 100),
            Message::wait(48),
            Message::note_off(60),
            Message::wait(48),
        ])
    }

    #[test]
    fn test_duration_and_relation() {
        let sequence = scenario();
        assert_eq!(sequence.duration(), 96);
        assert_eq!(sequence.duration_relation(), 4.0);
        assert!(!sequence.is_empty());
        assert!(RelativeSequence::new().is_empty());
    }

    #[test]
    fn test_round_trip_preserves_duration() {
        let sequence = scenario();
        let absolute = sequence.to_absolute();
        assert_eq!(absolute.duration(), 96);
        assert_eq!(absolute.messages().last().map(Message::message_type), Some(MessageType::Internal));
        assert_eq!(absolute.to_relative(), sequence);
    }

    #[test]
    fn test_pad_and_stretch() {
        let mut sequence = scenario();
        sequence.pad(120);
        assert_eq!(sequence.duration(), 120);
        sequence.pad(24);
        assert_eq!(sequence.duration(), 120);
        sequence.stretch(2);
        assert_eq!(sequence.duration(), 240);
    }

    #[test]
    fn test_normalise() {
        let mut sequence = RelativeSequence::from_messages(vec![
            Message::time_signature(4, 4),
            Message::wait(12),
            Message::wait(0),
            Message::wait(12),
            Message::time_signature(4, 4),
            Message::note_on(60, 100),
            Message::note_on(60, 100),
            Message::wait(24),
            Message::note_off(60),
            Message::note_off(60),
            Message::note_off(62),
            Message::note_on(64, 100),
            Message::wait(24),
        ]);
        sequence.normalise();
        assert_eq!(
            sequence.messages(),
            &[
                Message::time_signature(4, 4),
                Message::wait(24),
                Message::note_on(60, 100),
                Message::wait(24),
                Message::note_off(60),
                Message::wait(24),
            ]
        );
    }

    #[test]
    fn test_split_closes_and_reopens_notes() {
        let sequence = RelativeSequence::from_messages(vec![
            Message::note_on(60, 90),
            Message::wait(72),
            Message::note_off(60),
            Message::wait(24),
        ]);
        let fragments = sequence.split(&[48, 48]);
        assert_eq!(fragments.len(), 2);
        assert_eq!(
            fragments[0].messages(),
            &[Message::note_on(60, 90), Message::wait(48), Message::note_off(60)]
        );
        assert_eq!(
            fragments[1].messages(),
            &[
                Message::note_on(60, 90),
                Message::wait(24),
                Message::note_off(60),
                Message::wait(24),
            ]
        );
    }

    #[test]
    fn test_split_keeps_remainder() {
        let sequence = scenario();
        let fragments = sequence.split(&[24]);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].duration(), 24);
        assert_eq!(fragments[1].duration(), 72);
    }

    #[test]
    fn test_split_defers_events_at_boundary() {
        let sequence = RelativeSequence::from_messages(vec![
            Message::wait(24),
            Message::note_on(62, 100),
            Message::wait(24),
            Message::note_off(62),
        ]);
        let fragments = sequence.split(&[24]);
        assert_eq!(fragments[0].messages(), &[Message::wait(24)]);
        assert_eq!(
            fragments[1].messages(),
            &[Message::note_on(62, 100), Message::wait(24), Message::note_off(62)]
        );
    }

    #[test]
    fn test_split_defers_zero_length_note_at_boundary() {
        let sequence = RelativeSequence::from_messages(vec![
            Message::wait(24),
            Message::note_on(62, 100),
            Message::note_off(62),
            Message::wait(24),
        ]);
        let fragments = sequence.split(&[24]);
        assert_eq!(fragments[0].messages(), &[Message::wait(24)]);
        assert_eq!(
            fragments[1].messages(),
            &[Message::note_on(62, 100), Message::note_off(62), Message::wait(24)]
        );
    }

    #[test]
    fn test_split_zero_capacity_yields_empty_fragment() {
        let sequence = RelativeSequence::from_messages(vec![
            Message::note_on(60, 100),
            Message::wait(48),
            Message::note_off(60),
        ]);
        let capacities = [24, 0, 24];
        let fragments = sequence.split(&capacities);
        assert_eq!(fragments.len(), capacities.len());
        assert!(fragments[1].messages().is_empty());
        assert_eq!(
            fragments[2].messages(),
            &[Message::note_on(60, 100), Message::wait(24), Message::note_off(60)]
        );
    }

    #[test]
    fn test_split_conserves_duration() {
        let sequence = RelativeSequence::from_messages(vec![
            Message::note_on(60, 100),
            Message::wait(50),
            Message::note_on(64, 100),
            Message::wait(31),
            Message::note_off(60),
            Message::wait(70),
            Message::note_off(64),
            Message::wait(5),
        ]);
        for capacities in [vec![96], vec![10, 20, 30], vec![200], vec![1; 10]] {
            let fragments = sequence.split(&capacities);
            let total: u64 = fragments.iter().map(RelativeSequence::duration).sum();
            assert_eq!(total, sequence.duration(), "capacities {capacities:?}");
        }
    }

    #[test]
    fn test_transpose() {
        let mut sequence = RelativeSequence::from_messages(vec![
            Message::key_signature(Key::C),
            Message::note_on(60, 100),
            Message::note_on(106, 100),
        ]);
        assert!(!sequence.clone().transpose(2));
        assert!(sequence.transpose(4));
        assert_eq!(sequence.messages()[0], Message::key_signature(Key::E));
        assert_eq!(sequence.messages()[1].note(), Some(64));
        assert_eq!(sequence.messages()[2].note(), Some(98));
    }

    #[test]
    fn test_guess_key() {
        let explicit = RelativeSequence::from_messages(vec![Message::key_signature(Key::F), Message::note_on(61, 1)]);
        assert_eq!(explicit.guess_key(), Key::F);
        let inferred = RelativeSequence::from_messages(vec![
            Message::note_on(62, 1),
            Message::note_on(66, 1),
            Message::note_on(69, 1),
            Message::note_on(73, 1),
        ]);
        assert_eq!(inferred.guess_key(), Key::D);
    }
}
