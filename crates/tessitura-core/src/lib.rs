//! tessitura-core: Symbolic music sequences and their tokenisation

pub mod bar;
pub mod composition;
pub mod durations;
mod error;
pub mod message;
pub mod midi;
pub mod sequence;
pub mod settings;
pub mod theory;
pub mod tokenisation;
pub mod track;

pub use bar::{Bar, split_into_bars};
pub use composition::Composition;
pub use error::{
    BarError, MidiError, Result, SequenceError, TessituraError, TokenisationError, TrackError,
};
pub use message::{Message, MessageKind, MessageType};
pub use midi::{MidiEvent, MidiFile, MidiRecord, MidiTrack};
pub use sequence::{AbsoluteSequence, NOTE_KINDS, Pairing, RelativeSequence, ScaleFactor, Sequence};
pub use settings::Settings;
pub use theory::{CircleOfFifths, Key, Note};
pub use tokenisation::{
    CoFMidilikeTokeniser, CoFNotelikeTokeniser, GridlikeTokeniser, LargeVocabularyNotelikeTokeniser,
    MultiTrackLargeVocabularyNotelikeTokeniser, StandardMidilikeTokeniser, StandardNotelikeTokeniser,
    TokenId, Tokeniser, TokenisationFlags, TransposedNotelikeTokeniser, Vocabulary,
};
