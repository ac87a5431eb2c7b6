//! End-to-end tests for the ingest pipeline: raw chunks through line
//! reassembly and decoding into the buffer, statistics, and window policy.

use proptest::prelude::*;

use telemvis::protocol::{Decoded, FsmState, LineAssembler, SourceMode};
use telemvis::render::{compute_window, ScaleWindow, WindowPolicy};
use telemvis::types::{SeriesId, StatsTracker, TelemetryBuffer};

/// Feed a stream through the assembler in one go
fn reassemble_whole(stream: &str) -> Vec<String> {
    let mut assembler = LineAssembler::new();
    assembler.feed(stream)
}

/// Feed the same stream split at the given cut points
fn reassemble_split(stream: &str, cuts: &[usize]) -> Vec<String> {
    let mut assembler = LineAssembler::new();
    let mut lines = Vec::new();
    let mut rest = stream;
    let mut consumed = 0;
    for &cut in cuts {
        let cut = cut.min(stream.len());
        if cut <= consumed {
            continue;
        }
        let boundary = cut - consumed;
        // Stay on a char boundary for the split (inputs are ASCII anyway)
        if !rest.is_char_boundary(boundary) {
            continue;
        }
        let (chunk, remainder) = rest.split_at(boundary);
        lines.extend(assembler.feed(chunk));
        rest = remainder;
        consumed = cut;
    }
    lines.extend(assembler.feed(rest));
    assembler.reset();
    lines
}

proptest! {
    /// The reassembled line sequence is invariant under chunk split points.
    #[test]
    fn reassembly_invariant_under_splits(
        lines in prop::collection::vec("[a-z0-9,.+=]{1,24}", 1..8),
        mut cuts in prop::collection::vec(0usize..200, 0..10),
    ) {
        let stream = format!("{}\n", lines.join("\n"));
        cuts.sort_unstable();

        let whole = reassemble_whole(&stream);
        let split = reassemble_split(&stream, &cuts);
        prop_assert_eq!(whole, split);
    }
}

#[test]
fn motor_test_stream_to_buffer_and_stats() {
    // One radio stream, delivered in awkward chunks: samples, an echo, a
    // state token, a malformed row.
    let chunks = [
        "+RCV=42,3,0,10.0,1000.0,-10,0\n+RCV=4",
        "2,3,5000,30.0,1001.0,-11,0\nAT+SEND=42,3,ARM\nOK\n",
        "+RCV=42,5,ARMED,-12,1\n+RCV=42,3,bogus,1.0,2.0,-9,0\n",
        "+RCV=42,3,10000,20.0,999.5,-10,1\n",
    ];

    let mode = SourceMode::MotorTest;
    let mut assembler = LineAssembler::new();
    let mut buffer = TelemetryBuffer::new(&mode.active_series());
    let mut stats = StatsTracker::new();
    let mut states = Vec::new();

    for chunk in chunks {
        for line in assembler.feed(chunk) {
            match mode.decode(&line) {
                Some(Decoded::Sample(sample)) => {
                    buffer.append(&sample);
                    stats.observe(&sample);
                }
                Some(Decoded::State(state)) => states.push(state),
                Some(Decoded::Ping) | None => {}
            }
        }
    }

    // Three good samples survived; echoes, the state, and the bad row did not
    assert_eq!(buffer.len(), 3);
    assert_eq!(buffer.time(), &[0.0, 5.0, 10.0]);
    assert_eq!(states, vec![FsmState::Armed]);

    // Running maximum is the mid-stream peak, at its time
    let max = stats.max(SeriesId::Thrust);
    assert_eq!(max.value, 30.0);
    assert_eq!(max.at_secs, Some(5.0));
    // Current value tracks the latest sample
    assert_eq!(stats.current(SeriesId::Thrust), Some(20.0));
    assert_eq!(stats.current(SeriesId::Pressure), Some(999.5));
}

#[test]
fn sliding_window_matches_specified_example() {
    let window = compute_window(
        WindowPolicy::Sliding { width_secs: 20.0 },
        &[0.0, 5.0, 10.0, 15.0, 21.0],
    )
    .unwrap();
    assert_eq!(window, ScaleWindow { min: 1.0, max: 21.0 });
}

#[test]
fn hydrostatic_stream_with_column_mapping() {
    let mode = SourceMode::hydrostatic_test(vec![SeriesId::Pressure, SeriesId::Temperature])
        .unwrap();
    let mut assembler = LineAssembler::new();
    let mut buffer = TelemetryBuffer::new(&mode.active_series());

    for chunk in ["100,4.1,21.5\n200,4.3,", "21.6\n300,4.2\n"] {
        for line in assembler.feed(chunk) {
            if let Some(Decoded::Sample(sample)) = mode.decode(&line) {
                buffer.append(&sample);
            }
        }
    }

    assert_eq!(buffer.len(), 3);
    let temps = buffer.column(SeriesId::Temperature).unwrap();
    // The short third row keeps its slot as a missing value
    assert_eq!(temps, &[Some(21.5), Some(21.6), None]);
}

proptest! {
    /// Running maxima never decrease, whatever the sample order.
    #[test]
    fn running_max_is_monotonic(values in prop::collection::vec(-1e6f64..1e6, 1..64)) {
        let mut stats = StatsTracker::new();
        let mut previous = f64::NEG_INFINITY;
        for (i, value) in values.iter().enumerate() {
            let sample = telemvis::types::Sample::new(i as f64 * 100.0)
                .with_value(SeriesId::Pressure, *value);
            stats.observe(&sample);
            let current_max = stats.max(SeriesId::Pressure).value;
            prop_assert!(current_max >= previous);
            previous = current_max;
        }
        prop_assert_eq!(previous, values.iter().cloned().fold(f64::NEG_INFINITY, f64::max));
    }
}
