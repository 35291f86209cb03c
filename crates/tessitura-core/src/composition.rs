//! Compositions of bar-aligned tracks

use crate::bar;
use crate::error::Result;
use crate::midi::MidiFile;
use crate::sequence::Sequence;
use crate::track::Track;

#[derive(Debug, Clone, Default)]
pub struct Composition {
    pub tracks: Vec<Track>,
}

impl Composition {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    /// Split the sequences into bars along the signatures of `sequences[meta_index]` and wrap
    /// every resulting bar list in a track.
    pub fn from_sequences(sequences: &[Sequence], meta_index: usize) -> Result<Self> {
        let tracks = bar::split_into_bars(sequences, meta_index, true)?
            .into_iter()
            .enumerate()
            .map(|(i, bars)| Track::new(bars, format!("Track {i}")))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { tracks })
    }

    /// Load a composition from MIDI records.
    ///
    /// Tracks of one group merge into one composition track named after the group's first
    /// source track. Every sequence is quantised and normalised before being split into bars.
    pub fn from_midi(
        file: &MidiFile,
        groups: &[Vec<usize>],
        meta_tracks: &[usize],
        meta_target: usize,
    ) -> Result<Self> {
        let mut sequences = file.to_sequences(groups, meta_tracks, meta_target)?;
        for sequence in &mut sequences {
            sequence.quantise_and_normalise();
        }

        let mut composition = Self::from_sequences(&sequences, meta_target)?;
        for (track, group) in composition.tracks.iter_mut().zip(groups) {
            let source = group
                .first()
                .and_then(|&i| file.tracks.get(i))
                .filter(|source| !source.name.is_empty());
            if let Some(source) = source {
                track.name = source.name.clone();
            }
        }

        tracing::debug!(tracks = composition.tracks.len(), "Loaded composition from MIDI records");
        Ok(composition)
    }

    pub fn to_sequences(&self) -> Vec<Sequence> {
        self.tracks.iter().map(Track::to_sequence).collect()
    }

    /// Export as MIDI records, one named track per composition track.
    pub fn to_midi(&self) -> MidiFile {
        let mut file = MidiFile::from_sequences(&self.to_sequences());
        for (midi_track, track) in file.tracks.iter_mut().zip(&self.tracks) {
            midi_track.name = track.name.clone();
        }
        file
    }
}
