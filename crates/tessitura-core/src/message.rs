//! Musical events

use serde::{Deserialize, Serialize};

use crate::theory::Key;

/// Kind of a message without its payload.
///
/// The declaration order is the kind-rank used when sorting events that share a tick: signatures
/// come first and note offs precede note ons, so a re-attack closes the previous note before
/// opening the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageType {
    Internal,
    KeySignature,
    TimeSignature,
    ControlChange,
    ProgramChange,
    NoteOff,
    NoteOn,
    Wait,
}

/// Payload of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageKind {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    Wait { ticks: u64 },
    TimeSignature { numerator: u8, denominator: u8 },
    KeySignature { key: Key },
    ControlChange { control: u8, value: u8 },
    ProgramChange { program: u8 },
    /// Zero-effect marker anchoring the end of an absolute timeline
    Internal,
}

/// A single timed event.
///
/// `time` is the absolute tick and is only meaningful inside an absolute timeline; relative
/// timelines express elapsed time through [`MessageKind::Wait`] alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub kind: MessageKind,
    #[serde(default)]
    pub channel: u8,
    #[serde(default)]
    pub time: u64,
}

impl Message {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            channel: 0,
            time: 0,
        }
    }

    pub fn note_on(note: u8, velocity: u8) -> Self {
        Self::new(MessageKind::NoteOn { note, velocity })
    }

    pub fn note_off(note: u8) -> Self {
        Self::new(MessageKind::NoteOff { note })
    }

    pub fn wait(ticks: u64) -> Self {
        Self::new(MessageKind::Wait { ticks })
    }

    pub fn time_signature(numerator: u8, denominator: u8) -> Self {
        Self::new(MessageKind::TimeSignature {
            numerator,
            denominator,
        })
    }

    pub fn key_signature(key: Key) -> Self {
        Self::new(MessageKind::KeySignature { key })
    }

    pub fn control_change(control: u8, value: u8) -> Self {
        Self::new(MessageKind::ControlChange { control, value })
    }

    pub fn program_change(program: u8) -> Self {
        Self::new(MessageKind::ProgramChange { program })
    }

    pub fn internal() -> Self {
        Self::new(MessageKind::Internal)
    }

    /// Same message placed at an absolute tick.
    pub fn at(mut self, time: u64) -> Self {
        self.time = time;
        self
    }

    /// Same message on another channel.
    pub fn on_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn message_type(&self) -> MessageType {
        match self.kind {
            MessageKind::NoteOn { .. } => MessageType::NoteOn,
            MessageKind::NoteOff { .. } => MessageType::NoteOff,
            MessageKind::Wait { .. } => MessageType::Wait,
            MessageKind::TimeSignature { .. } => MessageType::TimeSignature,
            MessageKind::KeySignature { .. } => MessageType::KeySignature,
            MessageKind::ControlChange { .. } => MessageType::ControlChange,
            MessageKind::ProgramChange { .. } => MessageType::ProgramChange,
            MessageKind::Internal => MessageType::Internal,
        }
    }

    pub fn note(&self) -> Option<u8> {
        match self.kind {
            MessageKind::NoteOn { note, .. } | MessageKind::NoteOff { note } => Some(note),
            _ => None,
        }
    }

    pub fn velocity(&self) -> Option<u8> {
        match self.kind {
            MessageKind::NoteOn { velocity, .. } => Some(velocity),
            _ => None,
        }
    }

    /// Ticks elapsed by a wait, zero for every other kind.
    pub fn wait_ticks(&self) -> u64 {
        match self.kind {
            MessageKind::Wait { ticks } => ticks,
            _ => 0,
        }
    }

    pub fn time_signature_values(&self) -> Option<(u8, u8)> {
        match self.kind {
            MessageKind::TimeSignature {
                numerator,
                denominator,
            } => Some((numerator, denominator)),
            _ => None,
        }
    }

    pub fn is_note_on(&self) -> bool {
        matches!(self.kind, MessageKind::NoteOn { .. })
    }

    pub fn is_note_off(&self) -> bool {
        matches!(self.kind, MessageKind::NoteOff { .. })
    }

    /// Sort key of an absolute timeline: `(time, channel, kind-rank, note)`.
    pub fn sort_key(&self) -> (u64, u8, MessageType, u8) {
        (
            self.time,
            self.channel,
            self.message_type(),
            self.note().unwrap_or(0),
        )
    }

    /// Change the pitch of a note message; other kinds are left untouched.
    pub(crate) fn set_note(&mut self, pitch: u8) {
        match &mut self.kind {
            MessageKind::NoteOn { note, .. } | MessageKind::NoteOff { note } => *note = pitch,
            _ => {}
        }
    }
}
