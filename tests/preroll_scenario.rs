//! Pre-roll correctness: a 300 ms ring fed 1 s of monotonic-index audio
//! should present the last 300 ms contiguous in index order, with the
//! drop counter tracking exactly the discarded 700 ms.

use edge_core::ring_buffer::RingBuffer;

const SAMPLE_RATE: usize = 16_000;
const BYTES_PER_SAMPLE: usize = 2;
const PREROLL_MS: usize = 300;
const PREROLL_BYTES: usize = SAMPLE_RATE * BYTES_PER_SAMPLE * PREROLL_MS / 1000;

#[test]
fn last_300ms_of_a_1s_stream_is_contiguous_and_in_order() {
    let ring = RingBuffer::new(PREROLL_BYTES);

    let total_ms = 1_000;
    let total_samples = SAMPLE_RATE * total_ms / 1000;
    let samples: Vec<i16> = (0..total_samples).map(|i| (i % i16::MAX as usize) as i16).collect();
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

    // Feed it in 20ms frames, as the capture loop would.
    let frame_bytes = SAMPLE_RATE * BYTES_PER_SAMPLE * 20 / 1000;
    for chunk in bytes.chunks(frame_bytes) {
        ring.write(chunk);
    }

    let tail = ring.read(PREROLL_BYTES);
    assert_eq!(tail.len(), PREROLL_BYTES);
    assert_eq!(tail, &bytes[bytes.len() - PREROLL_BYTES..]);

    let expected_dropped = (bytes.len() - PREROLL_BYTES) as u64;
    assert_eq!(ring.dropped_bytes(), expected_dropped);
}
