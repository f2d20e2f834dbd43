/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

use arbiter_rs::arbiter::{FixedArbiter, Ruling, UnifiedArbiter};
use arbiter_rs::clock::{Clock, EventClock, ReplayClock};
use arbiter_rs::descriptor::{Descriptor, StreamOptions};
use arbiter_rs::shm::{SharedLogReader, SharedLogWriter};
use arbiter_rs::source::{Source, shared};
use arbiter_rs::sources::archive::DEFAULT_COMPRESSION_LEVEL;
use arbiter_rs::sources::{AnySource, NullTimer, Timer, compress_log};
use std::path::{Path, PathBuf};

#[cfg(test)]
mod tests {
    use super::*;

    fn write_log(path: &Path, timestamps: &[u64]) {
        let mut writer = SharedLogWriter::create_path(EventClock::new(), path, 0).unwrap();
        for ts in timestamps {
            writer
                .append_at(*ts, format!("{}:{ts}", name_of(path)).as_bytes())
                .unwrap();
        }
    }

    fn name_of(path: &Path) -> String {
        path.file_stem().unwrap().to_string_lossy().into_owned()
    }

    fn any<C: Clock>(clock: &C, raw: String) -> AnySource<C> {
        let desc: Descriptor = raw.parse().unwrap();
        AnySource::open(clock.clone(), &desc).unwrap()
    }

    fn log_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.log"))
    }

    #[test]
    fn test_three_logs_merge_in_timestamp_order() {
        crate::init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let plans: [(&str, Vec<u64>); 3] = [
            ("a", (0..50).map(|i| i * 3).collect()),
            ("b", (0..50).map(|i| i * 3 + 1).collect()),
            ("c", (0..50).map(|i| i * 3 + 2).collect()),
        ];
        let clock = EventClock::new();
        let mut arbiter: FixedArbiter<_, _, 3> = FixedArbiter::new(clock.clone(), NullTimer::new());
        for (name, timestamps) in &plans {
            let path = log_path(dir.path(), name);
            write_log(&path, timestamps);
            let reader =
                SharedLogReader::open_path(clock.clone(), &path, StreamOptions::FOLLOW).unwrap();
            arbiter.submit(shared(reader)).unwrap();
        }
        arbiter.submission_complete().unwrap();

        let mut merged = Vec::new();
        while let Ruling::Source(id) = arbiter.ruling() {
            let source = arbiter.source(id).unwrap().clone();
            let mut reader = source.borrow_mut();
            let record = reader.read().unwrap();
            let expected_prefix = ["a", "b", "c"][id as usize - 1];
            assert!(record.payload.starts_with(expected_prefix.as_bytes()));
            merged.push(record.timestamp);
            drop(reader);
            arbiter.read_complete(id);
        }
        assert_eq!(arbiter.ruling(), Ruling::End);
        assert_eq!(merged, (0..150).collect::<Vec<u64>>());
    }

    #[test]
    fn test_follow_reader_sees_records_appended_while_arbitrating() {
        crate::init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(dir.path(), "live");
        let clock = EventClock::new();
        let mut writer = SharedLogWriter::create_path(clock.clone(), &path, 0).unwrap();

        let reader = SharedLogReader::open_path(clock.clone(), &path, StreamOptions::FOLLOW).unwrap();
        let mut arbiter: FixedArbiter<_, _, 1> = FixedArbiter::new(clock.clone(), NullTimer::new());
        let id = arbiter.submit(shared(reader)).unwrap();
        arbiter.submission_complete().unwrap();
        assert_eq!(arbiter.ruling(), Ruling::End);

        for ts in [5u64, 6, 7] {
            writer.append_at(ts, b"tick").unwrap();
            assert_eq!(arbiter.ruling(), Ruling::Source(id));
            let source = arbiter.source(id).unwrap().clone();
            assert_eq!(source.borrow_mut().read().map(|r| r.timestamp), Some(ts));
            arbiter.read_complete(id);
            assert_eq!(arbiter.ruling(), Ruling::End);
        }
    }

    #[test]
    fn test_archive_and_live_log_merge() {
        crate::init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let history = log_path(dir.path(), "history");
        let archive = dir.path().join("history.log.zst");
        write_log(&history, &[10, 30, 50]);
        compress_log(&history, &archive, DEFAULT_COMPRESSION_LEVEL).unwrap();

        let live = log_path(dir.path(), "live");
        write_log(&live, &[20, 40]);

        let clock = EventClock::new();
        let mut arbiter: FixedArbiter<_, AnySource<EventClock>, 2> =
            FixedArbiter::new(clock.clone(), NullTimer::new());
        arbiter
            .submit(shared(any(&clock, format!("archive:{}", archive.display()))))
            .unwrap();
        arbiter
            .submit(shared(any(&clock, format!("shm:{}", live.display()))))
            .unwrap();
        arbiter.submission_complete().unwrap();

        // exhausted non-follow sources keep reporting the current time, so
        // the loop withdraws them once a read comes back empty
        let mut merged = Vec::new();
        loop {
            match arbiter.ruling() {
                Ruling::Source(id) => {
                    let source = arbiter.source(id).unwrap().clone();
                    let ts = source.borrow_mut().read().map(|r| r.timestamp);
                    match ts {
                        Some(ts) => {
                            merged.push(ts);
                            arbiter.read_complete(id);
                        }
                        None => arbiter.withdraw(id),
                    }
                }
                Ruling::Empty => break,
                other => panic!("unexpected ruling {other}"),
            }
        }
        assert_eq!(merged, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_timed_replay_drives_timer() {
        crate::init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(dir.path(), "md");
        write_log(&path, &[1_000, 1_050, 1_250]);

        let clock = ReplayClock::new();
        let timer = Timer::with_interval(clock.clone(), 100, "timer:100".to_string());
        let mut arbiter: UnifiedArbiter<ReplayClock, 16, Timer<ReplayClock>> =
            UnifiedArbiter::new(clock.clone(), timer).unwrap();
        let id = arbiter
            .submit(
                Some(1),
                shared(any(&clock, format!("shm:{}@follow,timed", path.display()))),
            )
            .unwrap();
        arbiter.submission_complete().unwrap();

        let mut outcomes = Vec::new();
        loop {
            let ruling = arbiter.ruling();
            match ruling {
                Ruling::Source(_) => {
                    let source = arbiter.source(id).unwrap().clone();
                    let ts = source.borrow_mut().read().map(|r| r.timestamp);
                    arbiter.read_complete(id);
                    outcomes.push(format!("record {}", ts.unwrap()));
                }
                Ruling::Timeout => {
                    let fired = arbiter.timer_mut().read().map(|r| r.timestamp);
                    outcomes.push(format!("timer {}", fired.unwrap()));
                }
                _ => break,
            }
        }
        assert_eq!(
            outcomes,
            vec![
                "record 1000",
                "timer 1000",
                "record 1050",
                "record 1250",
                "timer 1250",
            ]
        );
        assert_eq!(clock.now(), 1_250);
    }
}
