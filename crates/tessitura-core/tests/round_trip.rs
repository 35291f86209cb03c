use tessitura_core::tokenisation::{MultiTrackConfig, TokeniserKind};
use tessitura_core::{
    Bar, Message, MultiTrackLargeVocabularyNotelikeTokeniser, Sequence, TokenisationFlags,
    split_into_bars,
};

fn melody() -> Sequence {
    Sequence::from_relative_messages(vec![
        Message::time_signature(3, 4),
        Message::note_on(60, 90),
        Message::wait(24),
        Message::note_off(60),
        Message::note_on(62, 90),
        Message::note_on(65, 90),
        Message::wait(12),
        Message::note_off(62),
        Message::wait(12),
        Message::note_off(65),
        Message::note_on(67, 90),
        Message::wait(24),
        Message::note_off(67),
        Message::wait(24),
        Message::note_on(72, 90),
        Message::wait(36),
        Message::note_off(72),
        Message::wait(12),
    ])
}

fn bass() -> Sequence {
    Sequence::from_relative_messages(vec![
        Message::note_on(36, 70),
        Message::wait(72),
        Message::note_off(36),
        Message::note_on(43, 70),
        Message::wait(48),
        Message::note_off(43),
    ])
}

fn bars() -> Vec<Vec<Bar>> {
    split_into_bars(&[melody(), bass()], 0, true).unwrap()
}

#[test]
fn test_bars_are_aligned() {
    let bars = bars();
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].len(), bars[1].len());
    for bar in bars.iter().flatten() {
        assert_eq!(bar.sequence.duration(), 72);
        assert_eq!((bar.numerator, bar.denominator), (3, 4));
    }
}

#[test]
fn test_every_vocabulary_round_trips() {
    let melody = &bars()[0];
    let expected = Bar::to_sequence(melody);

    let all_flags = TokenisationFlags {
        running_value: true,
        running_pitch: true,
        running_octave: true,
        running_time_signature: true,
    };
    for flags in [TokenisationFlags::default(), all_flags] {
        for kind in TokeniserKind::ALL {
            let mut tokeniser = kind.build(flags);
            let tokens = tokeniser
                .tokenise_bars(melody)
                .unwrap_or_else(|e| panic!("{kind} failed to tokenise: {e}"));
            let decoded = tokeniser
                .detokenise(&tokens)
                .unwrap_or_else(|e| panic!("{kind} failed to detokenise: {e}"));
            assert!(decoded.is_equivalent(&expected), "{kind} changed the notes");
            assert_eq!(decoded.duration(), expected.duration(), "{kind} changed the length");

            let names = tokeniser.vocabulary().decode(&tokens).unwrap();
            assert_eq!(tokeniser.vocabulary().encode(&names).unwrap(), tokens);
        }
    }
}

#[test]
fn test_multi_track_round_trip() {
    let bars = bars();
    let steps: Vec<Vec<Bar>> = (0..bars[0].len())
        .map(|i| bars.iter().map(|track| track[i].clone()).collect())
        .collect();

    for fused in [true, false] {
        let mut tokeniser = MultiTrackLargeVocabularyNotelikeTokeniser::new(MultiTrackConfig {
            tracks: 2,
            fused,
            ..Default::default()
        });
        let tokens = tokeniser.tokenise_bars(&steps).unwrap();
        let decoded = tokeniser.detokenise(&tokens).unwrap();
        assert_eq!(decoded.len(), 2);
        for (sequence, track) in decoded.iter().zip(&bars) {
            assert!(sequence.is_equivalent(&Bar::to_sequence(track)));
            assert_eq!(sequence.duration(), 144);
        }
    }
}
