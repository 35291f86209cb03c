use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use tessitura_core::tokenisation::{MultiTrackLargeVocabularyNotelikeTokeniser, TokeniserKind};
use tessitura_core::{Bar, Composition, MidiFile, Sequence};

use crate::config::CliConfig;

const MULTI_TRACK: &str = "multi-track";

/// A single-track vocabulary or the multi-track one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocabularyName {
    Single(TokeniserKind),
    MultiTrack,
}

impl FromStr for VocabularyName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == MULTI_TRACK {
            return Ok(Self::MultiTrack);
        }
        s.parse()
            .map(Self::Single)
            .map_err(|e| format!("{e}, {MULTI_TRACK}"))
    }
}

impl fmt::Display for VocabularyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(kind) => fmt::Display::fmt(kind, f),
            Self::MultiTrack => f.write_str(MULTI_TRACK),
        }
    }
}

/// Token streams as written by `tokenise` and read by `detokenise`.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenFile {
    pub vocabulary: String,
    pub track_names: Vec<String>,
    /// One stream per track, or a single stream for the multi-track vocabulary
    pub streams: Vec<Vec<String>>,
}

fn read_records(path: &Path) -> anyhow::Result<MidiFile> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("failed to parse MIDI records from {}", path.display()))
}

fn load_composition(path: &Path) -> anyhow::Result<Composition> {
    let records = read_records(path)?;
    let groups: Vec<Vec<usize>> = (0..records.tracks.len()).map(|i| vec![i]).collect();
    if groups.is_empty() {
        bail!("{} contains no tracks", path.display());
    }
    let meta_tracks: Vec<usize> = (0..records.tracks.len()).collect();
    Ok(Composition::from_midi(&records, &groups, &meta_tracks, 0)?)
}

fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)?;
            tracing::info!(path = %path.display(), "Wrote output");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, value)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}

fn track_count(tracks: usize) -> anyhow::Result<u8> {
    u8::try_from(tracks).with_context(|| format!("{tracks} tracks exceed the multi-track limit"))
}

pub fn tokenise(
    config: &CliConfig,
    input: &Path,
    vocabulary: VocabularyName,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let composition = load_composition(input)?;
    let track_names: Vec<String> = composition.tracks.iter().map(|t| t.name.clone()).collect();

    let streams = match vocabulary {
        VocabularyName::Single(kind) => {
            let mut tokeniser = kind.build(config.tokeniser);
            let mut streams = Vec::with_capacity(composition.tracks.len());
            for track in &composition.tracks {
                let tokens = tokeniser
                    .tokenise_bars(&track.bars)
                    .with_context(|| format!("failed to tokenise track '{}'", track.name))?;
                streams.push(tokeniser.vocabulary().decode(&tokens)?);
            }
            streams
        }
        VocabularyName::MultiTrack => {
            let tracks = track_count(composition.tracks.len())?;
            let mut tokeniser =
                MultiTrackLargeVocabularyNotelikeTokeniser::new(config.multi_track.build(tracks));
            let bar_count = composition
                .tracks
                .iter()
                .map(|t| t.bars.len())
                .max()
                .unwrap_or(0);
            let steps: Vec<Vec<Bar>> = (0..bar_count)
                .map(|i| {
                    composition
                        .tracks
                        .iter()
                        .filter_map(|t| t.bars.get(i).cloned())
                        .collect()
                })
                .collect();
            vec![tokeniser.tokenise_bars(&steps)?]
        }
    };

    tracing::info!(
        vocabulary = %vocabulary,
        tracks = track_names.len(),
        tokens = streams.iter().map(Vec::len).sum::<usize>(),
        "Tokenised composition"
    );
    write_json(
        &TokenFile {
            vocabulary: vocabulary.to_string(),
            track_names,
            streams,
        },
        output,
    )
}

pub fn detokenise(
    config: &CliConfig,
    input: &Path,
    vocabulary: Option<VocabularyName>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let file = std::fs::File::open(input)
        .with_context(|| format!("failed to open {}", input.display()))?;
    let tokens: TokenFile = serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("failed to parse tokens from {}", input.display()))?;
    let vocabulary = match vocabulary {
        Some(vocabulary) => vocabulary,
        None => tokens
            .vocabulary
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?,
    };

    let sequences: Vec<Sequence> = match vocabulary {
        VocabularyName::Single(kind) => {
            let tokeniser = kind.build(config.tokeniser);
            tokens
                .streams
                .iter()
                .map(|stream| {
                    let ids = tokeniser.vocabulary().encode(stream)?;
                    tokeniser.detokenise(&ids)
                })
                .collect::<Result<_, _>>()?
        }
        VocabularyName::MultiTrack => {
            let tracks = track_count(tokens.track_names.len())?;
            let tokeniser =
                MultiTrackLargeVocabularyNotelikeTokeniser::new(config.multi_track.build(tracks));
            let Some(stream) = tokens.streams.first() else {
                bail!("{} contains no token stream", input.display());
            };
            tokeniser.detokenise(stream)?
        }
    };

    let mut records = MidiFile::from_sequences(&sequences);
    for (track, name) in records.tracks.iter_mut().zip(&tokens.track_names) {
        track.name = name.clone();
    }
    tracing::info!(vocabulary = %vocabulary, tracks = records.tracks.len(), "Detokenised streams");
    write_json(&records, output)
}

pub fn inspect(input: &Path) -> anyhow::Result<()> {
    let composition = load_composition(input)?;
    let mut stdout = std::io::stdout().lock();
    for (i, track) in composition.tracks.iter().enumerate() {
        let sequence = track.to_sequence();
        let channel = match sequence.channel() {
            Ok(Some(channel)) => channel.to_string(),
            Ok(None) => "-".to_string(),
            Err(e) => e.to_string(),
        };
        let program = track
            .program
            .map_or_else(|| "-".to_string(), |p| p.to_string());
        writeln!(
            stdout,
            "{i}: {name}  bars={bars} duration={duration} channel={channel} program={program} key={key}",
            name = track.name,
            bars = track.bars.len(),
            duration = sequence.duration(),
            key = sequence.guess_key().name(),
        )?;
    }
    Ok(())
}

/// Print every token name of a vocabulary with its id.
pub fn list_vocabulary(config: &CliConfig, vocabulary: VocabularyName) -> anyhow::Result<()> {
    let names: Vec<String> = match vocabulary {
        VocabularyName::Single(kind) => kind.build(config.tokeniser).vocabulary().names().to_vec(),
        VocabularyName::MultiTrack => {
            MultiTrackLargeVocabularyNotelikeTokeniser::new(config.multi_track.build(1))
                .vocabulary()
                .names()
                .to_vec()
        }
    };
    let mut stdout = std::io::stdout().lock();
    for (id, name) in names.iter().enumerate() {
        writeln!(stdout, "{id}\t{name}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_names() {
        assert_eq!(
            "multi-track".parse::<VocabularyName>(),
            Ok(VocabularyName::MultiTrack)
        );
        assert_eq!(
            "cof-notelike".parse::<VocabularyName>(),
            Ok(VocabularyName::Single(TokeniserKind::CoFNotelike))
        );
        let err = "bogus".parse::<VocabularyName>().unwrap_err();
        assert!(err.contains("multi-track"));
        assert_eq!(VocabularyName::MultiTrack.to_string(), "multi-track");
    }

    #[test]
    fn test_token_file_json() {
        let file = TokenFile {
            vocabulary: "notelike".into(),
            track_names: vec!["Piano".into()],
            streams: vec![vec!["sta".into(), "sto".into()]],
        };
        let json = serde_json::to_string(&file).unwrap();
        let parsed: TokenFile = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.streams, file.streams);
        assert_eq!(parsed.track_names, file.track_names);
    }
}
