//! Events ordered by absolute tick

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::durations::find_minimal_distance;
use crate::error::SequenceError;
use crate::message::{Message, MessageKind, MessageType};
use crate::sequence::relative::RelativeSequence;

/// Message kinds that take part in note pairing.
pub const NOTE_KINDS: [MessageType; 2] = [MessageType::NoteOn, MessageType::NoteOff];

/// An event together with the event closing it.
///
/// Notes are closed by their note off; every other kind forms a singleton with `end == None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pairing {
    pub start: Message,
    pub end: Option<Message>,
}

impl Pairing {
    pub fn singleton(start: Message) -> Self {
        Self { start, end: None }
    }

    /// Ticks between start and end, if closed.
    pub fn duration(&self) -> Option<u64> {
        self.end.map(|end| end.time.saturating_sub(self.start.time))
    }
}

/// Timeline of events sorted by `(time, channel, kind-rank, note)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsoluteSequence {
    messages: Vec<Message>,
}

impl AbsoluteSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        let mut sequence = Self { messages };
        sequence.sort();
        sequence
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Insert a message after every message with a smaller or equal sort key.
    pub fn add_message(&mut self, message: Message) {
        let key = message.sort_key();
        let index = self.messages.partition_point(|m| m.sort_key() <= key);
        self.messages.insert(index, message);
    }

    /// Stable sort by the timeline's sort key.
    pub fn sort(&mut self) {
        self.messages.sort_by_key(Message::sort_key);
    }

    /// Tick of the last event.
    pub fn duration(&self) -> u64 {
        self.messages.last().map_or(0, |m| m.time)
    }

    /// True if no note is ever started.
    pub fn is_empty(&self) -> bool {
        !self.messages.iter().any(Message::is_note_on)
    }

    pub fn merge<'a, I>(&mut self, others: I)
    where
        I: IntoIterator<Item = &'a AbsoluteSequence>,
    {
        for other in others {
            self.messages.extend_from_slice(&other.messages);
        }
        self.sort();
    }

    // ========================================================================
    // Quantisation
    // ========================================================================

    /// Snap every event onto the closest grid position of the given step sizes.
    ///
    /// Candidates are the floor and ceiling positions per step size, in step-size order with the
    /// floor first; the earliest minimal candidate wins. Note offs only consider positions after
    /// their note on and collapse onto it otherwise. A note re-attacked while still open is
    /// closed at the new position; a note on landing inside the previous instance of its pitch
    /// is dropped together with its note off. Notes without length are removed afterwards.
    pub fn quantise(&mut self, step_sizes: &[u64]) {
        let steps: Vec<u64> = step_sizes.iter().copied().filter(|&s| s > 0).collect();
        if steps.is_empty() {
            return;
        }

        let mut quantised: Vec<Message> = Vec::with_capacity(self.messages.len());
        let mut open: HashMap<(u8, u8), u64> = HashMap::new();
        let mut spans: HashMap<(u8, u8), (u64, Option<u64>)> = HashMap::new();

        for message in &self.messages {
            let candidates = grid_candidates(message.time, &steps);

            match message.kind {
                MessageKind::NoteOn { note, .. } => {
                    let key = (message.channel, note);
                    let position = nearest(message.time, &candidates);

                    if open.remove(&key).is_some() {
                        tracing::warn!(
                            channel = message.channel,
                            note,
                            tick = position,
                            "Note re-attacked while open, imputing note off"
                        );
                        quantised.push(
                            Message::note_off(note)
                                .on_channel(message.channel)
                                .at(position),
                        );
                        if let Some(span) = spans.get_mut(&key) {
                            span.1 = Some(position);
                        }
                    }

                    let overlaps = spans
                        .get(&key)
                        .and_then(|span| span.1)
                        .is_some_and(|end| position < end);
                    if overlaps {
                        tracing::debug!(
                            channel = message.channel,
                            note,
                            tick = position,
                            "Dropping note overlapping its previous instance"
                        );
                        continue;
                    }

                    open.insert(key, position);
                    spans.insert(key, (position, None));
                    quantised.push(message.at(position));
                }
                MessageKind::NoteOff { note } => {
                    let key = (message.channel, note);
                    let Some(start) = open.remove(&key) else {
                        continue;
                    };

                    let after_start: Vec<u64> =
                        candidates.iter().copied().filter(|&c| c > start).collect();
                    let position = if after_start.is_empty() {
                        start
                    } else {
                        nearest(message.time, &after_start)
                    };

                    if let Some(span) = spans.get_mut(&key) {
                        span.1 = Some(position);
                    }
                    quantised.push(message.at(position));
                }
                _ => quantised.push(message.at(nearest(message.time, &candidates))),
            }
        }

        let mut starts: HashMap<(u8, u8), usize> = HashMap::new();
        let mut collapsed: HashSet<usize> = HashSet::new();
        for (i, message) in quantised.iter().enumerate() {
            match message.kind {
                MessageKind::NoteOn { note, .. } => {
                    starts.insert((message.channel, note), i);
                }
                MessageKind::NoteOff { note } => {
                    if let Some(j) = starts.remove(&(message.channel, note)) {
                        if message.time <= quantised[j].time {
                            collapsed.insert(i);
                            collapsed.insert(j);
                        }
                    }
                }
                _ => {}
            }
        }

        self.messages = quantised
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !collapsed.contains(i))
            .map(|(_, m)| m)
            .collect();
        self.sort();
    }

    /// Requantise note lengths onto the allowed durations.
    ///
    /// Candidates that would run into the next note of the same pitch and channel are excluded,
    /// as are extensions unless `allow_extension` is set. Notes without an eligible duration are
    /// dropped.
    pub fn quantise_note_lengths(
        &mut self,
        allowed_durations: &[u64],
        standard_length: u64,
        allow_extension: bool,
    ) {
        let mut result: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| !m.is_note_on() && !m.is_note_off())
            .copied()
            .collect();

        for (channel, pairings) in self.pairings(&NOTE_KINDS, standard_length, true) {
            let mut next_start: HashMap<u8, u64> = HashMap::new();

            for pairing in pairings.iter().rev() {
                let (Some(note), Some(end)) = (pairing.start.note(), pairing.end) else {
                    continue;
                };
                let start = pairing.start.time;
                let current = end.time.saturating_sub(start);
                let bound = next_start.insert(note, start);

                let eligible: Vec<u64> = allowed_durations
                    .iter()
                    .copied()
                    .filter(|&d| d > 0)
                    .filter(|&d| allow_extension || d <= current)
                    .filter(|&d| bound.is_none_or(|b| start + d <= b))
                    .collect();

                match find_minimal_distance(current, &eligible) {
                    Some(i) => {
                        result.push(pairing.start);
                        result.push(
                            Message::note_off(note)
                                .on_channel(channel)
                                .at(start + eligible[i]),
                        );
                    }
                    None => tracing::debug!(
                        channel,
                        note,
                        tick = start,
                        "Dropping note without an eligible duration"
                    ),
                }
            }
        }

        self.messages = result;
        self.sort();
    }

    /// Cap notes longer than `maximum_length` to `reduced_length` and close unclosed notes after
    /// `maximum_length`.
    pub fn cutoff(&mut self, maximum_length: u64, reduced_length: u64) {
        let mut result: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| !m.is_note_on() && !m.is_note_off())
            .copied()
            .collect();

        for (channel, pairings) in self.pairings(&NOTE_KINDS, maximum_length, false) {
            for pairing in pairings {
                let Some(note) = pairing.start.note() else {
                    continue;
                };
                let start = pairing.start.time;
                let end = match pairing.duration() {
                    Some(length) if length <= maximum_length => start + length,
                    Some(_) => start + reduced_length,
                    None => start + maximum_length,
                };
                result.push(pairing.start);
                result.push(Message::note_off(note).on_channel(channel).at(end));
            }
        }

        self.messages = result;
        self.sort();
    }

    // ========================================================================
    // Pairing
    // ========================================================================

    /// Group the selected kinds per channel into note pairings and singletons.
    ///
    /// Channels are enumerated in ascending order. Unmatched note offs are dropped. With
    /// `impute`, a note re-attacked while open is closed at the re-attack and notes left open are
    /// closed `standard_length` ticks after their start.
    pub fn pairings(
        &self,
        kinds: &[MessageType],
        standard_length: u64,
        impute: bool,
    ) -> BTreeMap<u8, Vec<Pairing>> {
        let mut result: BTreeMap<u8, Vec<Pairing>> = BTreeMap::new();
        let mut open: HashMap<(u8, u8), usize> = HashMap::new();

        for message in self
            .messages
            .iter()
            .filter(|m| kinds.contains(&m.message_type()))
        {
            let pairings = result.entry(message.channel).or_default();

            match message.kind {
                MessageKind::NoteOn { note, .. } => {
                    let key = (message.channel, note);
                    if let Some(index) = open.remove(&key) {
                        if impute {
                            tracing::warn!(
                                channel = message.channel,
                                note,
                                tick = message.time,
                                "Note re-attacked while open, imputing note off"
                            );
                            pairings[index].end = Some(
                                Message::note_off(note)
                                    .on_channel(message.channel)
                                    .at(message.time),
                            );
                        }
                    }
                    open.insert(key, pairings.len());
                    pairings.push(Pairing::singleton(*message));
                }
                MessageKind::NoteOff { note } => {
                    match open.remove(&(message.channel, note)) {
                        Some(index) => pairings[index].end = Some(*message),
                        None => tracing::debug!(
                            channel = message.channel,
                            note,
                            tick = message.time,
                            "Dropping unmatched note off"
                        ),
                    }
                }
                _ => pairings.push(Pairing::singleton(*message)),
            }
        }

        if impute {
            for (channel, pairings) in result.iter_mut() {
                for pairing in pairings.iter_mut() {
                    if let (MessageKind::NoteOn { note, .. }, None) =
                        (pairing.start.kind, pairing.end)
                    {
                        pairing.end = Some(
                            Message::note_off(note)
                                .on_channel(*channel)
                                .at(pairing.start.time + standard_length),
                        );
                    }
                }
            }
        }

        result
    }

    /// All pairings in one order, sorted by start tick.
    ///
    /// A k-way merge over the per-channel lists of [`pairings`](Self::pairings); when several
    /// channels start at the same tick, the lower channel number comes first.
    pub fn interleaved_pairings(
        &self,
        kinds: &[MessageType],
        standard_length: u64,
        impute: bool,
    ) -> Vec<(u8, Pairing)> {
        let lists: Vec<(u8, Vec<Pairing>)> = self
            .pairings(kinds, standard_length, impute)
            .into_iter()
            .collect();
        let total = lists.iter().map(|(_, l)| l.len()).sum();

        let mut cursors = vec![0usize; lists.len()];
        let mut heap = BinaryHeap::new();
        for (order, (_, list)) in lists.iter().enumerate() {
            if let Some(first) = list.first() {
                heap.push(Reverse((first.start.time, order)));
            }
        }

        let mut merged = Vec::with_capacity(total);
        while let Some(Reverse((_, order))) = heap.pop() {
            let (channel, list) = &lists[order];
            merged.push((*channel, list[cursors[order]]));
            cursors[order] += 1;
            if let Some(next) = list.get(cursors[order]) {
                heap.push(Reverse((next.start.time, order)));
            }
        }
        merged
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn message_times_of_type(&self, kinds: &[MessageType]) -> Vec<(u64, Message)> {
        self.messages
            .iter()
            .filter(|m| kinds.contains(&m.message_type()))
            .map(|m| (m.time, *m))
            .collect()
    }

    fn channels(&self) -> BTreeSet<u8> {
        self.messages
            .iter()
            .filter(|m| m.message_type() != MessageType::Internal)
            .map(|m| m.channel)
            .collect()
    }

    /// The single channel used by the sequence, `None` if it holds no events.
    pub fn channel(&self) -> Result<Option<u8>, SequenceError> {
        let channels = self.channels();
        match channels.len() {
            0 => Ok(None),
            1 => Ok(channels.first().copied()),
            _ => Err(SequenceError::InconsistentChannel(
                channels.into_iter().collect(),
            )),
        }
    }

    pub fn is_channel_consistent(&self) -> bool {
        self.channels().len() <= 1
    }

    /// Pairings of a single channel.
    pub fn channel_pairings(
        &self,
        channel: u8,
        kinds: &[MessageType],
        standard_length: u64,
        impute: bool,
    ) -> Result<Vec<Pairing>, SequenceError> {
        self.pairings(kinds, standard_length, impute)
            .remove(&channel)
            .ok_or(SequenceError::UnsupportedChannel(channel))
    }

    /// Same notes at the same ticks with the same lengths, ignoring every other event.
    pub fn is_equivalent(&self, other: &AbsoluteSequence, standard_length: u64) -> bool {
        let own = self.interleaved_pairings(&NOTE_KINDS, standard_length, true);
        let theirs = other.interleaved_pairings(&NOTE_KINDS, standard_length, true);
        own.len() == theirs.len()
            && own.iter().zip(&theirs).all(|((_, a), (_, b))| {
                a.start.time == b.start.time
                    && a.start.note() == b.start.note()
                    && a.duration() == b.duration()
            })
    }

    pub fn to_relative(&self) -> RelativeSequence {
        let mut relative = RelativeSequence::new();
        let mut current = 0;

        for message in &self.messages {
            if message.time > current {
                relative.add_message(Message::wait(message.time - current).on_channel(message.channel));
                current = message.time;
            }
            if message.message_type() == MessageType::Internal {
                continue;
            }
            relative.add_message(message.at(0));
        }

        relative
    }
}

/// Floor and ceiling grid positions per step size, floor first.
fn grid_candidates(time: u64, steps: &[u64]) -> Vec<u64> {
    let mut candidates = Vec::with_capacity(steps.len() * 2);
    for &step in steps {
        let floor = time / step * step;
        candidates.push(floor);
        candidates.push(floor + step);
    }
    candidates
}

fn nearest(time: u64, candidates: &[u64]) -> u64 {
    find_minimal_distance(time, candidates).map_or(time, |i| candidates[i])
}
