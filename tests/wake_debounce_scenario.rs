//! Debouncer properties from the detector design: a confidence that
//! stays at or above threshold for the full trigger duration fires
//! exactly once; a dip below threshold resets the timer.

use edge_core::wakeword::{DebounceState, Debouncer, DebouncerConfig};
use std::time::{Duration, Instant};

fn config() -> DebouncerConfig {
    DebouncerConfig {
        threshold: 0.5,
        trigger_duration: Duration::from_millis(150),
        cooldown: Duration::from_millis(500),
    }
}

#[test]
fn sustained_confidence_fires_exactly_once() {
    let mut debouncer = Debouncer::new(config());
    let start = Instant::now();

    let mut fires = 0;
    // 20ms steps for 300ms, comfortably past the 150ms trigger duration.
    for step in 0..15 {
        let now = start + Duration::from_millis(step * 20);
        if debouncer.advance(0.9, now) {
            fires += 1;
        }
    }
    assert_eq!(fires, 1);
    assert_eq!(debouncer.state(), DebounceState::Fired);
}

#[test]
fn a_gap_below_threshold_resets_the_rise_timer() {
    let mut debouncer = Debouncer::new(config());
    let start = Instant::now();

    // Rise for 100ms (below the 150ms trigger duration)...
    for step in 0..5 {
        let now = start + Duration::from_millis(step * 20);
        assert!(!debouncer.advance(0.9, now));
    }
    // ...then dip below threshold, which must reset the timer...
    let dip_at = start + Duration::from_millis(100);
    assert!(!debouncer.advance(0.2, dip_at));
    assert_eq!(debouncer.state(), DebounceState::Idle);

    // ...so immediately resuming high confidence needs another full
    // trigger_duration before it fires, not just the remainder.
    let mut fired = false;
    for step in 0..6 {
        let now = dip_at + Duration::from_millis(20) + Duration::from_millis(step * 20);
        if debouncer.advance(0.9, now) {
            fired = true;
            break;
        }
    }
    assert!(fired);
}

#[test]
fn confidence_held_past_cooldown_still_fires_only_once() {
    let mut debouncer = Debouncer::new(config());
    let start = Instant::now();

    // Hold comfortably above threshold for longer than
    // trigger_duration + cooldown (150ms + 500ms). A wall-clock re-arm
    // would retrigger once the cooldown elapses even though the score
    // never dipped; the debouncer must still produce exactly one fire.
    let mut fires = 0;
    for step in 0..60 {
        let now = start + Duration::from_millis(step * 20);
        if debouncer.advance(0.9, now) {
            fires += 1;
        }
    }
    assert_eq!(fires, 1);
    assert_eq!(debouncer.state(), DebounceState::Fired);
}

#[test]
fn dropping_below_threshold_after_cooldown_rearms_for_another_fire() {
    let mut debouncer = Debouncer::new(config());
    let start = Instant::now();

    for step in 0..15 {
        let now = start + Duration::from_millis(step * 20);
        debouncer.advance(0.9, now);
    }
    assert_eq!(debouncer.state(), DebounceState::Fired);

    // Past cooldown (500ms) and below threshold: this is the falling
    // edge that allows re-arming.
    let rearm_at = start + Duration::from_millis(700);
    debouncer.advance(0.1, rearm_at);
    assert_eq!(debouncer.state(), DebounceState::Idle);

    let mut fired_again = false;
    for step in 0..10 {
        let now = rearm_at + Duration::from_millis(20) + Duration::from_millis(step * 20);
        if debouncer.advance(0.9, now) {
            fired_again = true;
            break;
        }
    }
    assert!(fired_again);
}

#[test]
fn never_fires_below_threshold() {
    let mut debouncer = Debouncer::new(config());
    let start = Instant::now();
    for step in 0..50 {
        let now = start + Duration::from_millis(step * 20);
        assert!(!debouncer.advance(0.1, now));
    }
    assert_eq!(debouncer.state(), DebounceState::Idle);
}
