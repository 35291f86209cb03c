//! Track representation

use crate::bar::Bar;
use crate::error::TrackError;
use crate::message::MessageKind;
use crate::sequence::Sequence;

/// A named run of bars played by one instrument
#[derive(Debug, Clone)]
pub struct Track {
    pub name: String,
    pub bars: Vec<Bar>,
    /// Program shared by every program change of the track
    pub program: Option<u8>,
}

impl Track {
    pub fn new(bars: Vec<Bar>, name: impl Into<String>) -> Result<Self, TrackError> {
        let mut programs: Vec<u8> = bars
            .iter()
            .flat_map(|bar| bar.sequence.rel().messages().iter())
            .filter_map(|m| match m.kind {
                MessageKind::ProgramChange { program } => Some(program),
                _ => None,
            })
            .collect();
        programs.sort_unstable();
        programs.dedup();

        if programs.len() > 1 {
            return Err(TrackError::InconsistentProgram(programs));
        }

        Ok(Self {
            name: name.into(),
            bars,
            program: programs.first().copied(),
        })
    }

    pub fn to_sequence(&self) -> Sequence {
        Bar::to_sequence(&self.bars)
    }

    pub fn is_empty(&self) -> bool {
        self.bars.iter().all(Bar::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn bar(messages: Vec<Message>) -> Bar {
        Bar::new(Sequence::from_relative_messages(messages), 4, 4, None).unwrap()
    }

    #[test]
    fn test_program_is_derived() {
        let track = Track::new(
            vec![
                bar(vec![Message::program_change(40), Message::note_on(60, 100), Message::wait(24), Message::note_off(60)]),
                bar(vec![Message::program_change(40)]),
            ],
            "violin",
        )
        .unwrap();
        assert_eq!(track.program, Some(40));
        assert_eq!(track.to_sequence().duration(), 192);
        assert!(!track.is_empty());
    }

    #[test]
    fn test_inconsistent_program() {
        let result = Track::new(
            vec![bar(vec![Message::program_change(0)]), bar(vec![Message::program_change(40)])],
            "mixed",
        );
        assert_eq!(result.unwrap_err(), TrackError::InconsistentProgram(vec![0, 40]));
    }

    #[test]
    fn test_track_without_program() {
        let track = Track::new(vec![bar(Vec::new())], "").unwrap();
        assert_eq!(track.program, None);
        assert!(track.is_empty());
    }
}
