/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

use arbiter_rs::arbiter::Ruling;
use arbiter_rs::clock::{Clock, EventClock};
use arbiter_rs::config::{SessionArbiter, SessionConfig};
use arbiter_rs::error::ArbiterError;
use arbiter_rs::shm::SharedLogWriter;
use arbiter_rs::source::Source;
use arbiter_rs::sources::AnySource;
use std::net::UdpSocket;
use std::path::Path;

#[cfg(test)]
mod tests {
    use super::*;

    fn write_log(path: &Path, timestamps: &[u64]) {
        let mut writer = SharedLogWriter::create_path(EventClock::new(), path, 0).unwrap();
        for ts in timestamps {
            writer.append_at(*ts, &ts.to_le_bytes()).unwrap();
        }
    }

    #[test]
    fn test_session_merges_log_and_socket() {
        crate::init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("md.log");
        write_log(&log, &[100, 200]);

        let config = SessionConfig::from_json(&format!(
            r#"{{
                "clock": "event_clock",
                "timer": "nulltimer",
                "sources": [
                    {{ "id": 1, "descriptor": "shm:{}@follow" }},
                    {{ "id": 2, "descriptor": "udp:127.0.0.1:0" }}
                ]
            }}"#,
            log.display()
        ))
        .unwrap();
        let mut arbiter = SessionArbiter::from_config(&config).unwrap();
        assert_eq!(arbiter.live(), 2);

        let addr = match &*arbiter.source(2).unwrap().borrow() {
            AnySource::Udp(udp) => udp.local_addr().unwrap(),
            _ => panic!("source 2 should be the udp socket"),
        };
        UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .send_to(b"quote", addr)
            .unwrap();

        let mut seen = Vec::new();
        loop {
            match arbiter.ruling() {
                Ruling::Source(id) => {
                    let source = arbiter.source(id).unwrap().clone();
                    let mut source = source.borrow_mut();
                    let record = source.read().unwrap();
                    seen.push((id, record.timestamp, record.payload.to_vec()));
                    drop(source);
                    arbiter.read_complete(id);
                }
                Ruling::End => break,
                other => panic!("unexpected ruling {other}"),
            }
        }

        let clock_start = arbiter.clock().now();
        assert_eq!(
            seen,
            vec![
                (2, clock_start, b"quote".to_vec()),
                (1, 100, 100u64.to_le_bytes().to_vec()),
                (1, 200, 200u64.to_le_bytes().to_vec()),
            ]
        );
    }

    #[test]
    fn test_session_catches_up_before_arbitrating() {
        crate::init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("md.log");
        write_log(&log, &[1, 2, 3]);

        let config = SessionConfig::from_json(&format!(
            r#"{{ "clock": "event_clock",
                 "sources": [ {{ "descriptor": "shm:{}@follow", "fast_forward": 0 }} ] }}"#,
            log.display()
        ))
        .unwrap();
        let mut arbiter = SessionArbiter::from_config(&config).unwrap();
        assert_eq!(arbiter.ruling(), Ruling::End);

        let mut writer = SharedLogWriter::create_path(EventClock::new(), &log, 0).unwrap();
        writer.append_at(4, b"new").unwrap();
        assert_eq!(arbiter.ruling(), Ruling::Source(1));
    }

    #[test]
    fn test_session_rejects_duplicate_public_ids() {
        crate::init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        write_log(&a, &[1]);
        write_log(&b, &[2]);

        let config = SessionConfig::from_json(&format!(
            r#"{{ "clock": "event_clock", "sources": [
                {{ "id": 3, "descriptor": "shm:{}" }},
                {{ "id": 3, "descriptor": "shm:{}" }}
            ] }}"#,
            a.display(),
            b.display()
        ))
        .unwrap();
        assert!(matches!(
            SessionArbiter::from_config(&config),
            Err(ArbiterError::PublicIdInUse(3))
        ));
    }

    #[test]
    fn test_session_fails_on_missing_log() {
        crate::init_tracing();
        let config = SessionConfig::from_json(
            r#"{ "clock": "event_clock",
                 "sources": [ { "descriptor": "shm:/nonexistent/arbiter/md.log" } ] }"#,
        )
        .unwrap();
        assert!(matches!(
            SessionArbiter::from_config(&config),
            Err(ArbiterError::Stream(_))
        ));
    }
}
