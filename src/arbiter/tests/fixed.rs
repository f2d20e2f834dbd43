/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

//! Tests for the fixed-capacity arbiter.

#[cfg(test)]
mod tests {
    use crate::arbiter::tests::support::ScriptedSource;
    use crate::arbiter::{FixedArbiter, Ruling};
    use crate::clock::{Clock, EventClock};
    use crate::descriptor::StreamOptions;
    use crate::error::ArbiterError;
    use crate::shm::{SharedLogReader, SharedLogWriter};
    use crate::source::{MAX_TIMESTAMP, Shared, Source, WITHDRAWN, shared};
    use crate::sources::{NullTimer, Timer};
    use proptest::prelude::*;

    fn scripted(name: &str, timestamps: &[u64]) -> Shared<ScriptedSource> {
        shared(ScriptedSource::new(name, timestamps))
    }

    fn arbiter<const N: usize>() -> FixedArbiter<EventClock, ScriptedSource, N> {
        FixedArbiter::new(EventClock::new(), NullTimer::new())
    }

    /// Consumes the winner and reports the order in which sources won.
    fn drain<const N: usize>(
        arbiter: &mut FixedArbiter<EventClock, ScriptedSource, N>,
    ) -> Vec<u64> {
        let mut order = Vec::new();
        while let Ruling::Source(id) = arbiter.ruling() {
            let source = arbiter.source(id).unwrap().clone();
            let ts = source.borrow_mut().read().unwrap().timestamp;
            arbiter.read_complete(id);
            order.push(ts);
        }
        order
    }

    #[test]
    fn test_shared_logs_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let clock = EventClock::new();
        let mut readers = Vec::new();
        for (name, ts) in [("a", 100u64), ("b", 50)] {
            let path = dir.path().join(format!("{name}.log"));
            let mut writer = SharedLogWriter::create_path(clock.clone(), &path, 0).unwrap();
            writer.append_at(ts, name.as_bytes()).unwrap();
            readers.push(shared(
                SharedLogReader::open_path(clock.clone(), &path, StreamOptions::empty()).unwrap(),
            ));
        }

        let mut arbiter: FixedArbiter<_, _, 2> = FixedArbiter::new(clock, NullTimer::new());
        assert_eq!(arbiter.submit(readers[0].clone()).unwrap(), 1);
        assert_eq!(arbiter.submit(readers[1].clone()).unwrap(), 2);
        arbiter.submission_complete().unwrap();

        assert_eq!(arbiter.ruling(), Ruling::Source(2));
        assert_eq!(arbiter.winning_time(2), 50);
        assert_eq!(arbiter.winning_time(0), MAX_TIMESTAMP);

        arbiter.withdraw(2);
        assert_eq!(arbiter.ruling(), Ruling::Source(1));
        assert_eq!(arbiter.winning_time(1), 100);
        assert_eq!(arbiter.winning_time(2), WITHDRAWN);
    }

    #[test]
    fn test_merges_in_timestamp_order() {
        let mut arbiter = arbiter::<3>();
        arbiter.submit(scripted("a", &[1, 4, 9])).unwrap();
        arbiter.submit(scripted("b", &[2, 3, 10])).unwrap();
        arbiter.submit(scripted("c", &[5, 6, 7, 8])).unwrap();
        arbiter.submission_complete().unwrap();

        assert_eq!(drain(&mut arbiter), (1..=10).collect::<Vec<_>>());
        assert_eq!(arbiter.ruling(), Ruling::End);
    }

    #[test]
    fn test_ties_go_to_lower_slot() {
        let mut arbiter = arbiter::<4>();
        for name in ["a", "b", "c", "d"] {
            arbiter.submit(scripted(name, &[7])).unwrap();
        }
        arbiter.submission_complete().unwrap();

        for expected in 1..=4 {
            assert_eq!(arbiter.ruling(), Ruling::Source(expected));
            let source = arbiter.source(expected).unwrap().clone();
            source.borrow_mut().read();
            arbiter.read_complete(expected);
        }
        assert_eq!(arbiter.ruling(), Ruling::End);
    }

    #[test]
    fn test_empty_when_nothing_live() {
        let mut arbiter = arbiter::<2>();
        assert_eq!(arbiter.ruling(), Ruling::Empty);
        assert_eq!(arbiter.slow_ruling(), Ruling::Empty);

        arbiter.submit(scripted("a", &[1])).unwrap();
        arbiter.submit(scripted("b", &[2])).unwrap();
        arbiter.submission_complete().unwrap();
        arbiter.withdraw(1);
        arbiter.withdraw(2);
        assert_eq!(arbiter.live(), 0);
        assert_eq!(arbiter.ruling(), Ruling::Empty);
    }

    #[test]
    fn test_end_when_every_source_exhausted() {
        let mut arbiter = arbiter::<2>();
        arbiter.submit(scripted("a", &[])).unwrap();
        arbiter.submit(scripted("b", &[])).unwrap();
        arbiter.submission_complete().unwrap();
        assert_eq!(arbiter.ruling(), Ruling::End);
    }

    #[test]
    fn test_withdrawn_slot_never_wins() {
        let mut arbiter = arbiter::<2>();
        arbiter.submit(scripted("a", &[100])).unwrap();
        arbiter.submit(scripted("b", &[1])).unwrap();
        arbiter.submission_complete().unwrap();
        arbiter.withdraw(2);

        assert_eq!(arbiter.ruling(), Ruling::Source(1));
        // the source still reports 1, but the slot stays withdrawn
        arbiter.read_complete(2);
        assert_eq!(arbiter.winning_time(2), WITHDRAWN);
        assert_eq!(arbiter.ruling(), Ruling::Source(1));
        assert!(arbiter.source(2).is_none());
    }

    #[test]
    fn test_resubmission_restores_slot() {
        let a = scripted("a", &[10]);
        let b = scripted("b", &[20]);
        let mut arbiter = arbiter::<2>();
        arbiter.submit(a.clone()).unwrap();
        arbiter.submit(b.clone()).unwrap();
        arbiter.submission_complete().unwrap();

        arbiter.withdraw(1);
        assert_eq!(arbiter.live(), 1);
        assert_eq!(arbiter.ruling(), Ruling::Source(2));

        assert_eq!(arbiter.submit(a).unwrap(), 1);
        assert_eq!(arbiter.live(), 2);
        assert_eq!(arbiter.ruling(), Ruling::Source(1));
    }

    #[test]
    fn test_resubmitting_live_source_fails() {
        let a = scripted("a", &[10]);
        let mut arbiter = arbiter::<2>();
        arbiter.submit(a.clone()).unwrap();
        assert!(matches!(
            arbiter.submit(a),
            Err(ArbiterError::ResubmittedLive { id: 1 })
        ));
        assert_eq!(arbiter.live(), 1);
    }

    #[test]
    fn test_freed_slot_is_reused() {
        let mut arbiter = arbiter::<2>();
        arbiter.submit(scripted("a", &[1])).unwrap();
        arbiter.submit(scripted("b", &[2])).unwrap();
        arbiter.withdraw(1);
        assert_eq!(arbiter.submit(scripted("c", &[3])).unwrap(), 1);
        assert_eq!(arbiter.source(1).unwrap().borrow().describe(), "c");
    }

    #[test]
    fn test_overfilled() {
        let mut arbiter = arbiter::<1>();
        arbiter.submit(scripted("a", &[1])).unwrap();
        assert!(matches!(
            arbiter.submit(scripted("b", &[2])),
            Err(ArbiterError::Overfilled { capacity: 1 })
        ));
    }

    #[test]
    fn test_capacity_mismatch() {
        let mut arbiter = arbiter::<3>();
        arbiter.submit(scripted("a", &[1])).unwrap();
        arbiter.submit(scripted("b", &[2])).unwrap();
        assert!(matches!(
            arbiter.submission_complete(),
            Err(ArbiterError::CapacityMismatch {
                capacity: 3,
                submitted: 2
            })
        ));
    }

    #[test]
    #[should_panic(expected = "submission_complete")]
    fn test_ruling_before_submission_complete_panics() {
        let mut arbiter = arbiter::<2>();
        arbiter.submit(scripted("a", &[1])).unwrap();
        arbiter.ruling();
    }

    #[test]
    fn test_submit_as_rolls_back_on_mismatch() {
        let mut arbiter = arbiter::<2>();
        assert!(matches!(
            arbiter.submit_as(2, scripted("a", &[1])),
            Err(ArbiterError::LostCount {
                desired: 2,
                returned: 1
            })
        ));
        assert_eq!(arbiter.live(), 0);
        assert_eq!(arbiter.submit_as(1, scripted("b", &[1])).unwrap(), 1);
    }

    #[test]
    fn test_withdraw_misuse_is_ignored() {
        let mut arbiter = arbiter::<2>();
        arbiter.submit(scripted("a", &[1])).unwrap();
        arbiter.withdraw(0);
        arbiter.withdraw(2);
        arbiter.withdraw(200);
        assert_eq!(arbiter.live(), 1);
        arbiter.withdraw(1);
        arbiter.withdraw(1);
        assert_eq!(arbiter.live(), 0);
        assert_eq!(arbiter.winning_time(200), MAX_TIMESTAMP);
    }

    #[test]
    fn test_timer_fires_before_later_records() {
        let clock = EventClock::new();
        let timer = Timer::with_interval(clock.clone(), 10, "timer:10".to_string());
        let mut arbiter: FixedArbiter<_, ScriptedSource, 1, _> =
            FixedArbiter::new(clock.clone(), timer);
        arbiter.submit(scripted("a", &[1_000])).unwrap();
        arbiter.submission_complete().unwrap();

        assert_eq!(arbiter.ruling(), Ruling::Source(1));
        clock.set(20);
        assert_eq!(arbiter.ruling(), Ruling::Timeout);
        assert_eq!(arbiter.winning_time(0), 20);

        let fired = arbiter.timer_mut().read().map(|r| r.timestamp);
        assert_eq!(fired, Some(20));
        arbiter.read_complete(0);
        assert_eq!(arbiter.timer().next_due(), 30);
        assert_eq!(arbiter.ruling(), Ruling::Source(1));
    }

    #[test]
    fn test_large_capacity_scans_without_completion() {
        let mut arbiter = arbiter::<16>();
        for i in 0..10u64 {
            arbiter
                .submit(scripted(&format!("s{i}"), &[100 - i, 200]))
                .unwrap();
        }
        assert_eq!(arbiter.ruling(), Ruling::Source(10));
        assert_eq!(arbiter.winning_time(10), 91);
        assert_eq!(arbiter.slow_ruling(), Ruling::Source(10));
    }

    #[test]
    fn test_slow_ruling_agrees_with_tournament() {
        let mut arbiter = arbiter::<5>();
        let sources: Vec<_> = [[8u64, 20], [3, 30], [9, 11], [3, 4], [1, 50]]
            .iter()
            .enumerate()
            .map(|(i, ts)| scripted(&format!("s{i}"), ts))
            .collect();
        for source in &sources {
            arbiter.submit(source.clone()).unwrap();
        }
        arbiter.submission_complete().unwrap();

        loop {
            let fast = arbiter.ruling();
            assert_eq!(arbiter.slow_ruling(), fast);
            let Ruling::Source(id) = fast else { break };
            sources[id as usize - 1].borrow_mut().read();
            arbiter.read_complete(id);
        }
        assert!(sources.iter().all(|s| s.borrow().remaining() == 0));
    }

    fn expected_winner(timestamps: &[u64], withdrawn: &[bool]) -> Ruling {
        let mut best: Option<(usize, u64)> = None;
        for (i, (&ts, &gone)) in timestamps.iter().zip(withdrawn).enumerate() {
            if gone || ts == MAX_TIMESTAMP {
                continue;
            }
            if best.is_none_or(|(_, b)| ts < b) {
                best = Some((i + 1, ts));
            }
        }
        if withdrawn.iter().all(|w| *w) {
            Ruling::Empty
        } else {
            best.map_or(Ruling::End, |(id, _)| Ruling::Source(id as u8))
        }
    }

    proptest! {
        #[test]
        fn prop_tournament_picks_minimum(
            slots in prop::collection::vec(
                (prop_oneof![0u64..1_000, Just(MAX_TIMESTAMP)], any::<bool>()),
                7,
            )
        ) {
            let timestamps: Vec<u64> = slots.iter().map(|(ts, _)| *ts).collect();
            let withdrawn: Vec<bool> = slots.iter().map(|(_, w)| *w).collect();

            let mut arbiter = arbiter::<7>();
            for (i, ts) in timestamps.iter().enumerate() {
                let script: &[u64] = if *ts == MAX_TIMESTAMP { &[] } else { std::slice::from_ref(ts) };
                arbiter.submit(scripted(&format!("s{i}"), script)).unwrap();
            }
            arbiter.submission_complete().unwrap();
            for (i, gone) in withdrawn.iter().enumerate() {
                if *gone {
                    arbiter.withdraw(i as u8 + 1);
                }
            }

            let expected = expected_winner(&timestamps, &withdrawn);
            prop_assert_eq!(arbiter.ruling(), expected);
            prop_assert_eq!(arbiter.slow_ruling(), expected);
        }

        #[test]
        fn prop_scan_picks_minimum(timestamps in prop::collection::vec(0u64..1_000, 1..12)) {
            let mut arbiter = arbiter::<12>();
            for (i, ts) in timestamps.iter().enumerate() {
                arbiter.submit(scripted(&format!("s{i}"), &[*ts])).unwrap();
            }
            let withdrawn = vec![false; timestamps.len()];
            prop_assert_eq!(arbiter.ruling(), expected_winner(&timestamps, &withdrawn));
        }
    }
}
