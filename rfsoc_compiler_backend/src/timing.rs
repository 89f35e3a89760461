//! Resolves the relative-time event hierarchy into absolute clock ticks.
//!
//! Two clocks are involved:
//! - the sequencer clock (250 MHz, one tick = 4 ns) paces the opcode stream;
//! - the sample clock (2 GS/s, one tick = 0.5 ns) paces DAC and ADC samples.
//!
//! One sequencer tick spans exactly [`SAMPLES_PER_TICK`] sample ticks, which is also
//! the width of one waveform-memory word.

use crate::error::{CompileError, Result};
use crate::event::{Event, EventId};

pub const SEQ_CLOCK_HZ: f64 = 250e6;
pub const SAMPLE_RATE: f64 = 2e9;
pub const SAMPLES_PER_TICK: u64 = 8;

/// Rounds a time in seconds to the nearest sample tick.
pub fn to_sample_ticks(t: f64) -> u64 {
    (t * SAMPLE_RATE).round() as u64
}

/// Rounds a sample-tick position to the nearest sequencer tick.
pub fn samples_to_seq_ticks(samples: u64) -> u64 {
    (samples as f64 / SAMPLES_PER_TICK as f64).round() as u64
}

/// Number of sequencer ticks needed to cover `samples` sample ticks.
pub fn samples_to_seq_ticks_ceil(samples: u64) -> u64 {
    samples.div_ceil(SAMPLES_PER_TICK)
}

/// Computes the absolute start [s] of every event.
///
/// An event starts `relative_start` after the end of its parent; the walk up the
/// parent chain adds `relative_start + duration` of every ancestor. The walk is
/// bounded by the number of events, so a cyclic chain is reported as
/// [`CompileError::CyclicHierarchy`] instead of looping.
///
/// The summation order only depends on the chain itself, so the result for an
/// event does not depend on where its ancestors sit in `events`.
///
/// ```
/// use rfsoc_compiler_backend::event::*;
/// use rfsoc_compiler_backend::timing::resolve_absolute_times;
///
/// let adc = EventKind::Adc(AdcPulse { acq_mode: AcqMode::Raw });
/// let first = Event::new("first", 1, 1e-6, 2e-6, None, adc.clone()).unwrap();
/// let second = Event::new("second", 1, 0.5e-6, 1e-6, Some(EventId(0)), adc).unwrap();
/// let starts = resolve_absolute_times(&[first, second]).unwrap();
/// assert!((starts[1] - 3.5e-6).abs() < 1e-15);
/// ```
pub fn resolve_absolute_times(events: &[Event]) -> Result<Vec<f64>> {
    events
        .iter()
        .enumerate()
        .map(|(idx, event)| {
            let mut start = event.relative_start;
            let mut cur = event.parent;
            let mut steps = 0;
            while let Some(EventId(parent_idx)) = cur {
                let parent = events.get(parent_idx).ok_or(CompileError::UnknownParent {
                    index: idx,
                    parent: parent_idx,
                })?;
                steps += 1;
                if steps > events.len() {
                    return Err(CompileError::CyclicHierarchy(event.label.clone()));
                }
                start += parent.relative_start + parent.duration;
                cur = parent.parent;
            }
            if !start.is_finite() {
                return Err(CompileError::NonFiniteStart {
                    label: event.label.clone(),
                    start,
                });
            }
            if start < 0.0 {
                return Err(CompileError::NegativeStart {
                    label: event.label.clone(),
                    start,
                });
            }
            Ok(start)
        })
        .collect()
}

/// Events sharing one absolute start, kept in registration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeGroup {
    /// Absolute start in sample ticks.
    pub start: u64,
    pub events: Vec<EventId>,
}

impl TimeGroup {
    /// Absolute start rounded to the sequencer grid.
    pub fn seq_tick(&self) -> u64 {
        samples_to_seq_ticks(self.start)
    }
}

/// Start and end of every event in sample ticks.
///
/// The end is rounded from the absolute end time rather than from the rounded
/// start plus the rounded duration, so a pulse chained right after its parent
/// starts exactly on the parent's end.
pub fn sample_spans(events: &[Event]) -> Result<Vec<(u64, u64)>> {
    Ok(resolve_absolute_times(events)?
        .into_iter()
        .zip(events)
        .map(|(start, event)| (to_sample_ticks(start), to_sample_ticks(start + event.duration)))
        .collect())
}

/// Groups events by absolute start (in sample ticks), ascending.
pub fn group_by_time(events: &[Event]) -> Result<Vec<TimeGroup>> {
    let starts: Vec<u64> = sample_spans(events)?
        .into_iter()
        .map(|(start, _)| start)
        .collect();
    Ok(group_by_start(&starts))
}

/// Groups event indices by their precomputed absolute start.
pub fn group_by_start(starts: &[u64]) -> Vec<TimeGroup> {
    // Stable sort keeps registration order within a group
    let mut order: Vec<usize> = (0..starts.len()).collect();
    order.sort_by_key(|&idx| starts[idx]);

    let mut groups: Vec<TimeGroup> = Vec::new();
    for idx in order {
        match groups.last_mut() {
            Some(group) if group.start == starts[idx] => group.events.push(EventId(idx)),
            _ => groups.push(TimeGroup {
                start: starts[idx],
                events: vec![EventId(idx)],
            }),
        }
    }
    groups
}

#[cfg(test)]
mod test {
    use crate::event::*;
    use crate::timing::*;
    use proptest::prelude::*;

    fn raw(label: &str, ch: u8, rel: f64, dur: f64, parent: Option<usize>) -> Event {
        Event::new(
            label,
            ch,
            rel,
            dur,
            parent.map(EventId),
            EventKind::Adc(AdcPulse {
                acq_mode: AcqMode::Raw,
            }),
        )
        .unwrap()
    }

    #[test]
    fn chain_accumulates_parent_ends() {
        let events = vec![
            raw("a", 1, 1e-6, 1e-6, None),
            raw("b", 1, 2e-6, 3e-6, Some(0)),
            raw("c", 2, 0.0, 1e-6, Some(1)),
        ];
        let starts = resolve_absolute_times(&events).unwrap();
        assert!((starts[0] - 1e-6).abs() < 1e-15);
        assert!((starts[1] - 4e-6).abs() < 1e-15);
        assert!((starts[2] - 9e-6).abs() < 1e-15);
    }

    #[test]
    fn cycle_is_detected() {
        let mut events = vec![raw("a", 1, 0.0, 1e-6, Some(1)), raw("b", 1, 0.0, 1e-6, Some(0))];
        assert_eq!(
            resolve_absolute_times(&events),
            Err(CompileError::CyclicHierarchy("a".to_string()))
        );
        // Self-loop
        events[1].parent = Some(EventId(1));
        events[0].parent = None;
        assert_eq!(
            resolve_absolute_times(&events),
            Err(CompileError::CyclicHierarchy("b".to_string()))
        );
    }

    #[test]
    fn non_finite_resolved_start_is_rejected() {
        let mut events = vec![raw("a", 1, 0.0, 1e-6, None), raw("b", 1, 0.0, 1e-6, Some(0))];
        events[0].relative_start = f64::NAN;
        assert!(matches!(
            resolve_absolute_times(&events),
            Err(CompileError::NonFiniteStart { label, .. }) if label == "a"
        ));
        events[0].relative_start = f64::MAX;
        events[0].duration = f64::MAX;
        assert!(matches!(
            resolve_absolute_times(&events),
            Err(CompileError::NonFiniteStart { label, .. }) if label == "b"
        ));
    }

    #[test]
    fn dangling_parent_and_negative_start() {
        let events = vec![raw("a", 1, 0.0, 1e-6, Some(4))];
        assert!(matches!(
            resolve_absolute_times(&events),
            Err(CompileError::UnknownParent { index: 0, parent: 4 })
        ));
        let events = vec![raw("a", 1, 1e-6, 1e-6, None), raw("b", 1, -3e-6, 1e-6, Some(0))];
        assert!(matches!(
            resolve_absolute_times(&events),
            Err(CompileError::NegativeStart { .. })
        ));
    }

    #[test]
    fn simultaneous_events_share_a_group() {
        let events = vec![
            raw("late", 1, 2e-6, 1e-6, None),
            raw("x", 1, 0.0, 1e-6, None),
            raw("y", 2, 0.0, 1e-6, None),
        ];
        let groups = group_by_time(&events).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].start, 0);
        assert_eq!(groups[0].events, vec![EventId(1), EventId(2)]);
        assert_eq!(groups[1].start, 4000);
        assert_eq!(groups[1].seq_tick(), 500);
    }

    #[test]
    fn chained_spans_share_boundaries() {
        // Rounding start and duration separately would end at 1 + 3 samples
        let events = vec![raw("a", 1, 0.3e-9, 1.3e-9, None), raw("b", 1, 0.0, 1e-9, Some(0))];
        let spans = sample_spans(&events).unwrap();
        assert_eq!(spans[0], (1, 3));
        assert_eq!(spans[1].0, spans[0].1);
    }

    #[test]
    fn tick_conversions() {
        assert_eq!(to_sample_ticks(4e-9), 8);
        assert_eq!(samples_to_seq_ticks(8), 1);
        assert_eq!(samples_to_seq_ticks(3), 0);
        assert_eq!(samples_to_seq_ticks(4), 1);
        assert_eq!(samples_to_seq_ticks_ceil(9), 2);
        assert_eq!(samples_to_seq_ticks_ceil(16), 2);
    }

    proptest! {
        #[test]
        fn groups_are_sorted_and_unique(starts in proptest::collection::vec(0u64..50, 0..40)) {
            let groups = group_by_start(&starts);
            for pair in groups.windows(2) {
                prop_assert!(pair[0].start < pair[1].start);
            }
            let total: usize = groups.iter().map(|g| g.events.len()).sum();
            prop_assert_eq!(total, starts.len());
            for group in &groups {
                for pair in group.events.windows(2) {
                    prop_assert!(pair[0] < pair[1]);
                }
            }
        }

        #[test]
        fn resolution_ignores_registration_order(
            rels in proptest::collection::vec(0.0f64..1e-5, 1..12),
            durs in proptest::collection::vec(1e-9f64..1e-5, 12),
            parent_picks in proptest::collection::vec(any::<u16>(), 12),
            seed in any::<u64>(),
        ) {
            // Structural hierarchy: event i may only point at an earlier event
            let n = rels.len();
            let parents: Vec<Option<usize>> = (0..n)
                .map(|i| if i == 0 || parent_picks[i] % 3 == 0 { None } else { Some(parent_picks[i] as usize % i) })
                .collect();
            let events: Vec<Event> = (0..n)
                .map(|i| raw(&format!("e{}", i), 1, rels[i], durs[i], parents[i]))
                .collect();
            let reference = resolve_absolute_times(&events).unwrap();

            // Deterministic shuffle: new position of original index i
            let mut perm: Vec<usize> = (0..n).collect();
            let mut state = seed;
            for i in (1..n).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                perm.swap(i, (state >> 33) as usize % (i + 1));
            }
            let mut position = vec![0; n];
            for (new_pos, &old) in perm.iter().enumerate() {
                position[old] = new_pos;
            }
            let shuffled: Vec<Event> = perm
                .iter()
                .map(|&old| {
                    let mut e = events[old].clone();
                    e.parent = parents[old].map(|p| EventId(position[p]));
                    e
                })
                .collect();
            let permuted = resolve_absolute_times(&shuffled).unwrap();
            for old in 0..n {
                prop_assert_eq!(reference[old].to_bits(), permuted[position[old]].to_bits());
            }
        }
    }
}
