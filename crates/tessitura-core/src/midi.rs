//! MIDI record adapter
//!
//! Byte-level MIDI parsing lives outside this crate. Whatever decodes a file hands over a
//! [`MidiFile`]: per-track lists of delta-timed records at the file's own resolution. This module
//! converts between those records and [`Sequence`]s at the engine resolution.

use serde::{Deserialize, Serialize};

use crate::error::MidiError;
use crate::message::{Message, MessageKind, MessageType};
use crate::sequence::Sequence;
use crate::settings::Settings;
use crate::theory::Key;

/// Payload of a MIDI record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MidiEvent {
    NoteOn {
        note: u8,
        velocity: u8,
    },
    NoteOff {
        note: u8,
        #[serde(default)]
        velocity: u8,
    },
    ControlChange {
        control: u8,
        value: u8,
    },
    ProgramChange {
        program: u8,
    },
    TimeSignature {
        numerator: u8,
        denominator: u8,
    },
    /// Key name as written by MIDI libraries, e.g. `"Bb"` or `"F#m"`
    KeySignature {
        key: String,
    },
    /// Any record the engine does not model
    #[serde(other)]
    Other,
}

/// A delta-timed MIDI record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiRecord {
    /// Ticks since the previous record of the same track
    pub delta: u64,
    #[serde(default)]
    pub channel: u8,
    #[serde(flatten)]
    pub event: MidiEvent,
}

impl MidiRecord {
    pub fn new(delta: u64, channel: u8, event: MidiEvent) -> Self {
        Self {
            delta,
            channel,
            event,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiTrack {
    #[serde(default)]
    pub name: String,
    pub events: Vec<MidiRecord>,
}

/// A decoded MIDI file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiFile {
    /// Ticks per quarter note of the source
    pub ppqn: u64,
    pub tracks: Vec<MidiTrack>,
}

impl MidiFile {
    /// One sequence per track, meta events from every track collected on the first one.
    pub fn to_sequences_default(&self) -> Result<Vec<Sequence>, MidiError> {
        let groups: Vec<Vec<usize>> = (0..self.tracks.len()).map(|i| vec![i]).collect();
        let meta_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        self.to_sequences(&groups, &meta_tracks, 0)
    }

    /// Convert tracks into sequences at the engine resolution.
    ///
    /// Tracks in the same group are merged into one sequence. Time, key signature and control
    /// change events go to the sequence at `meta_target`; notes are only read from grouped
    /// tracks. A default time signature is inserted at tick 0 if the meta target has none there.
    pub fn to_sequences(
        &self,
        groups: &[Vec<usize>],
        meta_tracks: &[usize],
        meta_target: usize,
    ) -> Result<Vec<Sequence>, MidiError> {
        if self.ppqn == 0 {
            return Err(MidiError::InvalidResolution);
        }
        if meta_target >= groups.len() {
            return Err(MidiError::InvalidMetaTarget {
                target: meta_target,
                groups: groups.len(),
            });
        }
        if let Some(&missing) = groups
            .iter()
            .flatten()
            .chain(meta_tracks)
            .find(|&&i| i >= self.tracks.len())
        {
            return Err(MidiError::UnknownTrack(missing));
        }

        let settings = Settings::global();
        let scaling = settings.ppqn as f64 / self.ppqn as f64;
        let mut grouped: Vec<Vec<Vec<Message>>> =
            groups.iter().map(|g| vec![Vec::new(); g.len()]).collect();
        let mut meta: Vec<Message> = Vec::new();
        let mut default_channel = None;

        for (i, track) in self.tracks.iter().enumerate() {
            let position = groups
                .iter()
                .enumerate()
                .find_map(|(g, members)| members.iter().position(|&m| m == i).map(|k| (g, k)));
            let is_meta = meta_tracks.contains(&i);
            if position.is_none() && !is_meta {
                continue;
            }

            let mut elapsed = 0u64;
            for record in &track.events {
                default_channel.get_or_insert(record.channel);
                elapsed += record.delta;
                let time = (elapsed as f64 * scaling).round() as u64;
                let at = |message: Message| message.on_channel(record.channel).at(time);

                match &record.event {
                    MidiEvent::NoteOn { note, velocity } => {
                        if let Some((g, k)) = position {
                            let message = if *velocity == 0 {
                                Message::note_off(*note)
                            } else {
                                Message::note_on(*note, *velocity)
                            };
                            grouped[g][k].push(at(message));
                        }
                    }
                    MidiEvent::NoteOff { note, .. } => {
                        if let Some((g, k)) = position {
                            grouped[g][k].push(at(Message::note_off(*note)));
                        }
                    }
                    MidiEvent::TimeSignature {
                        numerator,
                        denominator,
                    } => {
                        if !is_meta {
                            tracing::debug!(track = i, "Time signature in unexpected track");
                        }
                        meta.push(at(Message::time_signature(*numerator, *denominator)));
                    }
                    MidiEvent::KeySignature { key } => {
                        if !is_meta {
                            tracing::debug!(track = i, "Key signature in unexpected track");
                        }
                        match Key::from_midi_name(key) {
                            Some(key) => meta.push(at(Message::key_signature(key))),
                            None => tracing::warn!(track = i, key, "Skipping unknown key signature"),
                        }
                    }
                    MidiEvent::ControlChange { control, value } => {
                        meta.push(at(Message::control_change(*control, *value)));
                    }
                    MidiEvent::ProgramChange { program } => {
                        let message = at(Message::program_change(*program));
                        match position {
                            Some((g, k)) => grouped[g][k].push(message),
                            None => meta.push(message),
                        }
                    }
                    MidiEvent::Other => {}
                }
            }
        }

        let mut merged: Vec<Sequence> = grouped
            .into_iter()
            .map(|members| {
                let mut members: Vec<Sequence> = members
                    .into_iter()
                    .map(|messages| {
                        let mut sequence = Sequence::from_absolute_messages(messages);
                        sequence.normalise();
                        sequence
                    })
                    .collect();
                let mut first = if members.is_empty() {
                    Sequence::new()
                } else {
                    members.remove(0)
                };
                if !members.is_empty() {
                    first.merge(&members);
                }
                first
            })
            .collect();

        let target = &mut merged[meta_target];
        target.merge(&[Sequence::from_absolute_messages(meta)]);
        let has_initial_signature = target
            .message_times_of_type(&[MessageType::TimeSignature])
            .iter()
            .any(|(time, _)| *time == 0);
        if !has_initial_signature {
            let (numerator, denominator) = settings.default_time_signature();
            target.add_absolute_message(
                Message::time_signature(numerator, denominator)
                    .on_channel(default_channel.unwrap_or(0)),
            );
        }

        tracing::debug!(
            tracks = self.tracks.len(),
            sequences = merged.len(),
            source_ppqn = self.ppqn,
            "Converted MIDI records"
        );
        Ok(merged)
    }

    /// Convert sequences into one unnamed track each, at the engine resolution.
    pub fn from_sequences(sequences: &[Sequence]) -> Self {
        let tracks = sequences
            .iter()
            .map(|sequence| {
                let mut events = Vec::new();
                let mut delta = 0;
                for message in sequence.rel().messages() {
                    let event = match message.kind {
                        MessageKind::Wait { ticks } => {
                            delta += ticks;
                            continue;
                        }
                        MessageKind::NoteOn { note, velocity } => MidiEvent::NoteOn { note, velocity },
                        MessageKind::NoteOff { note } => MidiEvent::NoteOff { note, velocity: 0 },
                        MessageKind::TimeSignature {
                            numerator,
                            denominator,
                        } => MidiEvent::TimeSignature {
                            numerator,
                            denominator,
                        },
                        MessageKind::KeySignature { key } => MidiEvent::KeySignature {
                            key: key.name().to_string(),
                        },
                        MessageKind::ControlChange { control, value } => {
                            MidiEvent::ControlChange { control, value }
                        }
                        MessageKind::ProgramChange { program } => MidiEvent::ProgramChange { program },
                        MessageKind::Internal => continue,
                    };
                    events.push(MidiRecord::new(delta, message.channel, event));
                    delta = 0;
                }
                MidiTrack {
                    name: String::new(),
                    events,
                }
            })
            .collect();

        Self {
            ppqn: Settings::global().ppqn,
            tracks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(delta: u64, event: MidiEvent) -> MidiRecord {
        MidiRecord::new(delta, 0, event)
    }

    fn file() -> MidiFile {
        MidiFile {
            ppqn: 96,
            tracks: vec![
                MidiTrack {
                    name: "conductor".to_string(),
                    events: vec![
                        record(0, MidiEvent::KeySignature { key: "Em".to_string() }),
                        record(0, MidiEvent::TimeSignature { numerator: 3, denominator: 4 }),
                    ],
                },
                MidiTrack {
                    name: "melody".to_string(),
                    events: vec![
                        record(0, MidiEvent::NoteOn { note: 64, velocity: 90 }),
                        record(96, MidiEvent::NoteOn { note: 64, velocity: 0 }),
                        record(0, MidiEvent::NoteOn { note: 67, velocity: 90 }),
                        record(50, MidiEvent::NoteOff { note: 67, velocity: 0 }),
                    ],
                },
            ],
        }
    }

    #[test]
    fn test_to_sequences_rescales_and_folds_velocity_zero() {
        let sequences = file().to_sequences(&[vec![1]], &[0, 1], 0).unwrap();
        assert_eq!(sequences.len(), 1);

        let times: Vec<_> = sequences[0]
            .abs()
            .messages()
            .iter()
            .map(|m| (m.time, m.message_type()))
            .collect();
        assert_eq!(
            times,
            vec![
                (0, MessageType::KeySignature),
                (0, MessageType::TimeSignature),
                (0, MessageType::NoteOn),
                (24, MessageType::NoteOff),
                (24, MessageType::NoteOn),
                // 146 source ticks scale to 36.5 and round up
                (37, MessageType::NoteOff),
            ]
        );
        assert_eq!(sequences[0].guess_key(), Key::G);
    }

    #[test]
    fn test_default_time_signature_inserted() {
        let mut source = file();
        source.tracks.remove(0);
        let sequences = source.to_sequences_default().unwrap();
        let signatures = sequences[0].message_times_of_type(&[MessageType::TimeSignature]);
        assert_eq!(signatures.len(), 1);
        assert_eq!(signatures[0].1.time_signature_values(), Some((4, 4)));
    }

    #[test]
    fn test_invalid_arguments() {
        let source = file();
        assert_eq!(
            source.to_sequences(&[vec![1]], &[0], 1).unwrap_err(),
            MidiError::InvalidMetaTarget {
                target: 1,
                groups: 1
            }
        );
        assert_eq!(
            source.to_sequences(&[vec![5]], &[], 0).unwrap_err(),
            MidiError::UnknownTrack(5)
        );
        let silent = MidiFile {
            ppqn: 0,
            tracks: Vec::new(),
        };
        assert_eq!(
            silent.to_sequences(&[vec![]], &[], 0).unwrap_err(),
            MidiError::InvalidResolution
        );
    }

    #[test]
    fn test_from_sequences_inverts_conversion() {
        let sequences = file().to_sequences(&[vec![1]], &[0], 0).unwrap();
        let exported = MidiFile::from_sequences(&sequences);
        assert_eq!(exported.ppqn, 24);
        let reimported = exported.to_sequences_default().unwrap();
        assert!(reimported[0].is_equivalent(&sequences[0]));
    }

    #[test]
    fn test_records_deserialise_from_json() {
        let json = r#"{"ppqn": 480, "tracks": [{"events": [
            {"delta": 0, "type": "note_on", "note": 60, "velocity": 80},
            {"delta": 480, "channel": 0, "type": "note_off", "note": 60},
            {"delta": 0, "type": "set_tempo"}
        ]}]}"#;
        let parsed: MidiFile = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.tracks[0].events[2].event, MidiEvent::Other);
        let sequences = parsed.to_sequences_default().unwrap();
        assert_eq!(sequences[0].duration(), 24);
    }
}
