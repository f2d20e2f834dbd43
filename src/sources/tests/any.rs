/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

#[cfg(test)]
mod tests {
    use crate::clock::EventClock;
    use crate::descriptor::{Descriptor, SourceKind};
    use crate::error::StreamError;
    use crate::shm::SharedLogWriter;
    use crate::source::{MAX_TIMESTAMP, Source};
    use crate::sources::AnySource;
    use std::os::fd::OwnedFd;

    fn open(raw: &str) -> AnySource<EventClock> {
        let desc: Descriptor = raw.parse().unwrap();
        AnySource::open(EventClock::new(), &desc).unwrap()
    }

    #[test]
    fn test_open_dispatches_on_kind() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("md.log");
        {
            let mut writer = SharedLogWriter::create_path(EventClock::new(), &log, 0).unwrap();
            writer.append_at(5, b"five").unwrap();
        }

        let mut shm = open(&format!("shm:{}", log.display()));
        assert_eq!(shm.kind(), SourceKind::SharedLog);
        assert!(!shm.is_kernel());
        assert_eq!(shm.last_write_timestamp(), Some(5));
        let mut ts = MAX_TIMESTAMP;
        shm.attest(&mut ts);
        assert_eq!(ts, 5);
        assert_eq!(shm.read().map(|r| r.payload.to_vec()), Some(b"five".to_vec()));

        let timer = open("timer:1000");
        assert_eq!(timer.kind(), SourceKind::Timer);
        assert!(!timer.is_kernel());

        let mut null = open("nulltimer");
        assert_eq!(null.kind(), SourceKind::NullTimer);
        assert!(null.read().is_none());

        let udp = open("udp:127.0.0.1:0");
        assert_eq!(udp.kind(), SourceKind::Udp);
        assert!(udp.is_kernel());
        assert!(udp.get_fd().unwrap() >= 0);
        assert_eq!(udp.describe(), "udp:127.0.0.1:0");

        let listener = open("tcp_listen:127.0.0.1:0");
        assert!(listener.is_kernel());
        assert!(listener.as_fd().is_ok());
    }

    #[test]
    fn test_get_fd_on_non_kernel_source_fails() {
        let timer = open("timer:10");
        assert!(matches!(
            timer.get_fd(),
            Err(StreamError::NotKernel { description }) if description == "timer:10"
        ));
    }

    #[test]
    fn test_from_fd_only_for_tcp() {
        let server = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(server.local_addr().unwrap()).unwrap();

        let wrong: Descriptor = "udp:127.0.0.1:0".parse().unwrap();
        let fd: OwnedFd = client.try_clone().unwrap().into();
        assert!(matches!(
            AnySource::from_fd(EventClock::new(), fd, &wrong),
            Err(StreamError::UnsupportedConstruction { .. })
        ));

        let right: Descriptor = "tcp:accepted".parse().unwrap();
        let fd: OwnedFd = client.into();
        let source = AnySource::from_fd(EventClock::new(), fd, &right).unwrap();
        assert_eq!(source.kind(), SourceKind::TcpStream);
        assert!(source.is_kernel());
        assert_eq!(source.describe(), "tcp:accepted");
    }

    #[test]
    fn test_fast_forward_is_noop_for_live_sources() {
        let mut timer = open("timer:10");
        assert_eq!(timer.fast_forward(1_000), 0);
        assert_eq!(timer.last_write_timestamp(), None);
    }

    #[test]
    fn test_unknown_file_surfaces_error() {
        let desc: Descriptor = "shm:/definitely/not/here.log".parse().unwrap();
        assert!(matches!(
            AnySource::open(EventClock::new(), &desc),
            Err(StreamError::Io { .. })
        ));
    }
}
