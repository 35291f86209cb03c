//! Error types for tessitura

use thiserror::Error;

/// Structural violations of a timeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SequenceError {
    #[error("Sequence spans more than one channel: {0:?}")]
    InconsistentChannel(Vec<u8>),
    #[error("Channel {0} is not present in the sequence")]
    UnsupportedChannel(u8),
    #[error("Scale factor {0} is neither an integer nor the inverse of one")]
    NonIntegerScale(f64),
    #[error("Scale factor must be at least 1, got {0}")]
    InvalidScaleFactor(u32),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BarError {
    #[error("Bar content of {duration} ticks exceeds capacity of {capacity} ticks")]
    CapacityExceeded { duration: u64, capacity: u64 },
    #[error("Bar holds more than one time signature: {0:?}")]
    MultipleTimeSignatures(Vec<(u8, u8)>),
    #[error("Bar time signature {found:?} does not match {expected:?}")]
    InconsistentTimeSignature { expected: (u8, u8), found: (u8, u8) },
    #[error("Invalid time signature {0}/{1}")]
    InvalidTimeSignature(u8, u8),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    #[error("Track uses more than one program: {0:?}")]
    InconsistentProgram(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MidiError {
    #[error("File resolution must be positive")]
    InvalidResolution,
    #[error("Meta target {target} out of range for {groups} track groups")]
    InvalidMetaTarget { target: usize, groups: usize },
    #[error("Track index {0} does not exist")]
    UnknownTrack(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenisationError {
    #[error("Pitch {0} is outside of the supported range")]
    PitchOutOfRange(u8),
    #[error("Duration of {0} ticks is not supported")]
    UnsupportedDuration(u64),
    #[error("Time signature {0}/{1} cannot be represented in eighths")]
    UnrepresentableTimeSignature(u8, u8),
    #[error("Time signature change at tick {0} is not at the start of a bar")]
    MidBarTimeSignature(u64),
    #[error("Unknown token id {0}")]
    UnknownToken(u32),
    #[error("Unknown token '{0}'")]
    UnknownTokenString(String),
    #[error("Token {0} requires a value definition")]
    UndefinedValue(u32),
    #[error("Token {0} requires a previously played pitch")]
    UndefinedPitch(u32),
    #[error("Bar lasts {duration} ticks but its time signature allows {capacity}")]
    BarLengthMismatch { duration: u64, capacity: u64 },
    #[error("Token {token} needs {required} ticks but only {remaining} remain in the bar")]
    CapacityUnderflow { token: u32, required: u64, remaining: u64 },
    #[error("Duplicate token '{0}' in vocabulary")]
    DuplicateToken(String),
    #[error("Rest of {0} ticks cannot be decomposed into the available step sizes")]
    InvalidRest(u64),
    #[error("Invalid grid definition: {0}")]
    GridDefinition(String),
    #[error("Expected {expected} tracks, got {found}")]
    TrackCountMismatch { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum TessituraError {
    #[error("Sequence error: {0}")]
    Sequence(#[from] SequenceError),
    #[error("Bar error: {0}")]
    Bar(#[from] BarError),
    #[error("Track error: {0}")]
    Track(#[from] TrackError),
    #[error("MIDI error: {0}")]
    Midi(#[from] MidiError),
    #[error("Tokenisation error: {0}")]
    Tokenisation(#[from] TokenisationError),
    #[error("Settings have already been installed")]
    SettingsInstalled,
}

pub type Result<T> = std::result::Result<T, TessituraError>;
