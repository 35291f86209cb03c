//! Keys, pitch classes and the circle of fifths

use serde::{Deserialize, Serialize};

// ============================================================================
// Pitch classes
// ============================================================================

/// A pitch class, sharps only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Note {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl Note {
    pub const ALL: [Note; 12] = [
        Note::C,
        Note::CSharp,
        Note::D,
        Note::DSharp,
        Note::E,
        Note::F,
        Note::FSharp,
        Note::G,
        Note::GSharp,
        Note::A,
        Note::ASharp,
        Note::B,
    ];

    pub fn from_pitch(pitch: u8) -> Self {
        Self::ALL[usize::from(pitch % 12)]
    }

    pub fn pitch_class(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Note::C => "C",
            Note::CSharp => "C#",
            Note::D => "D",
            Note::DSharp => "D#",
            Note::E => "E",
            Note::F => "F",
            Note::FSharp => "F#",
            Note::G => "G",
            Note::GSharp => "G#",
            Note::A => "A",
            Note::ASharp => "A#",
            Note::B => "B",
        }
    }
}

// ============================================================================
// Key signatures
// ============================================================================

/// The fifteen key signatures, named after their major tonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    C,
    G,
    D,
    A,
    E,
    B,
    FSharp,
    CSharp,
    F,
    BFlat,
    EFlat,
    AFlat,
    DFlat,
    GFlat,
    CFlat,
}

/// Chromatic order used for transposition; enharmonic duplicates are folded onto it first.
const TRANSPOSE_ORDER: [Key; 12] = [
    Key::C,
    Key::CSharp,
    Key::D,
    Key::EFlat,
    Key::E,
    Key::F,
    Key::FSharp,
    Key::G,
    Key::AFlat,
    Key::A,
    Key::BFlat,
    Key::B,
];

impl Key {
    pub const ALL: [Key; 15] = [
        Key::C,
        Key::G,
        Key::D,
        Key::A,
        Key::E,
        Key::B,
        Key::FSharp,
        Key::CSharp,
        Key::F,
        Key::BFlat,
        Key::EFlat,
        Key::AFlat,
        Key::DFlat,
        Key::GFlat,
        Key::CFlat,
    ];

    /// Stable index in `0..15`.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Key::C => "C",
            Key::G => "G",
            Key::D => "D",
            Key::A => "A",
            Key::E => "E",
            Key::B => "B",
            Key::FSharp => "F#",
            Key::CSharp => "C#",
            Key::F => "F",
            Key::BFlat => "Bb",
            Key::EFlat => "Eb",
            Key::AFlat => "Ab",
            Key::DFlat => "Db",
            Key::GFlat => "Gb",
            Key::CFlat => "Cb",
        }
    }

    /// Parse a MIDI key name; minor keys map onto their relative major.
    pub fn from_midi_name(name: &str) -> Option<Self> {
        let key = match name {
            "C" | "Am" => Key::C,
            "G" | "Em" => Key::G,
            "D" | "Bm" => Key::D,
            "A" | "F#m" => Key::A,
            "E" | "C#m" => Key::E,
            "B" | "G#m" => Key::B,
            "F#" | "D#m" => Key::FSharp,
            "C#" | "A#m" => Key::CSharp,
            "F" | "Dm" => Key::F,
            "Bb" | "Gm" => Key::BFlat,
            "Eb" | "Cm" => Key::EFlat,
            "Ab" | "Fm" => Key::AFlat,
            "Db" | "Bbm" => Key::DFlat,
            "Gb" | "Ebm" => Key::GFlat,
            "Cb" | "Abm" => Key::CFlat,
            _ => return None,
        };
        Some(key)
    }

    /// Number of accidentals in the signature.
    pub fn accidentals(self) -> u8 {
        match self {
            Key::C => 0,
            Key::G | Key::F => 1,
            Key::D | Key::BFlat => 2,
            Key::A | Key::EFlat => 3,
            Key::E | Key::AFlat => 4,
            Key::B | Key::DFlat => 5,
            Key::FSharp | Key::GFlat => 6,
            Key::CSharp | Key::CFlat => 7,
        }
    }

    /// Pitch class of the major tonic.
    pub fn tonic(self) -> u8 {
        match self {
            Key::C => 0,
            Key::CSharp | Key::DFlat => 1,
            Key::D => 2,
            Key::EFlat => 3,
            Key::E => 4,
            Key::F => 5,
            Key::FSharp | Key::GFlat => 6,
            Key::G => 7,
            Key::AFlat => 8,
            Key::A => 9,
            Key::BFlat => 10,
            Key::B | Key::CFlat => 11,
        }
    }

    /// The seven pitch classes of the major scale.
    pub fn scale(self) -> [u8; 7] {
        const MAJOR: [u8; 7] = [0, 2, 4, 5, 7, 9, 11];
        MAJOR.map(|step| (self.tonic() + step) % 12)
    }

    pub fn contains(self, pitch: u8) -> bool {
        self.scale().contains(&(pitch % 12))
    }

    /// Transpose by half-tone steps. Keys without a place in the chromatic order use their
    /// enharmonic equivalent.
    pub fn transpose(self, semitones: i32) -> Self {
        if semitones.rem_euclid(12) == 0 {
            return self;
        }
        let folded = match self {
            Key::DFlat => Key::CSharp,
            Key::GFlat => Key::FSharp,
            Key::CFlat => Key::B,
            other => other,
        };
        let index = TRANSPOSE_ORDER
            .iter()
            .position(|&k| k == folded)
            .unwrap_or(0) as i32;
        TRANSPOSE_ORDER[(index + semitones).rem_euclid(12) as usize]
    }
}

/// Best-fitting key for a collection of pitches: fewest out-of-scale notes, then fewest
/// accidentals, then the earlier key.
pub fn guess_key<I: IntoIterator<Item = u8>>(pitches: I) -> Key {
    let mut misses = [0usize; 15];
    for pitch in pitches {
        for key in Key::ALL {
            if !key.contains(pitch) {
                misses[key.index()] += 1;
            }
        }
    }

    let mut best = Key::C;
    for key in Key::ALL {
        let (current, candidate) = (misses[best.index()], misses[key.index()]);
        if candidate < current || (candidate == current && key.accidentals() < best.accidentals()) {
            best = key;
        }
    }
    best
}

// ============================================================================
// Circle of fifths
// ============================================================================

/// Circle-of-fifths arithmetic over pitch classes.
///
/// Positions run from -5 (C#) over 0 (C) to 6 (F#).
pub struct CircleOfFifths;

const CIRCLE_ORDER: [u8; 12] = [1, 8, 3, 10, 5, 0, 7, 2, 9, 4, 11, 6];

impl CircleOfFifths {
    fn index_of(pitch: u8) -> i32 {
        let class = pitch % 12;
        CIRCLE_ORDER
            .iter()
            .position(|&c| c == class)
            .unwrap_or(5) as i32
    }

    pub fn position(pitch: u8) -> i32 {
        Self::index_of(pitch) - 5
    }

    /// Shortest signed distance around the circle, folded into `-5..=6`.
    pub fn distance(from: u8, to: u8) -> i32 {
        let right = (Self::index_of(to) - Self::index_of(from)).rem_euclid(12);
        let left = 12 - right;
        if right <= left { right } else { -left }
    }

    /// Pitch class reached by walking `distance` steps from `from`.
    pub fn from_distance(from: u8, distance: i32) -> u8 {
        CIRCLE_ORDER[(Self::index_of(from) + distance).rem_euclid(12) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_transpose() {
        assert_eq!(Key::C.transpose(2), Key::D);
        assert_eq!(Key::C.transpose(-1), Key::B);
        assert_eq!(Key::DFlat.transpose(1), Key::D);
        assert_eq!(Key::A.transpose(12), Key::A);
        assert_eq!(Key::GFlat.transpose(24), Key::GFlat);
    }

    #[test]
    fn test_key_from_midi_name() {
        assert_eq!(Key::from_midi_name("Am"), Some(Key::C));
        assert_eq!(Key::from_midi_name("Bb"), Some(Key::BFlat));
        assert_eq!(Key::from_midi_name("H"), None);
    }

    #[test]
    fn test_scale() {
        assert_eq!(Key::G.scale(), [7, 9, 11, 0, 2, 4, 6]);
        assert!(Key::F.contains(70));
        assert!(!Key::C.contains(61));
    }

    #[test]
    fn test_guess_key() {
        // C major triad plus F#
        assert_eq!(guess_key([60, 64, 67, 66]), Key::G);
        assert_eq!(guess_key([60, 62, 64]), Key::C);
        assert_eq!(guess_key(std::iter::empty()), Key::C);
    }

    #[test]
    fn test_circle_of_fifths() {
        assert_eq!(CircleOfFifths::position(60), 0);
        assert_eq!(CircleOfFifths::position(67), 1);
        assert_eq!(CircleOfFifths::position(61), -5);
        assert_eq!(CircleOfFifths::distance(60, 67), 1);
        assert_eq!(CircleOfFifths::distance(67, 60), -1);
        assert_eq!(CircleOfFifths::distance(60, 66), 6);
        assert_eq!(CircleOfFifths::distance(66, 60), 6);
        for from in 0..12u8 {
            for to in 0..12u8 {
                let distance = CircleOfFifths::distance(from, to);
                assert!((-5..=6).contains(&distance));
                assert_eq!(CircleOfFifths::from_distance(from, distance), to);
            }
        }
    }
}
