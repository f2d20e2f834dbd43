/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 18/10/26
******************************************************************************/

#[cfg(test)]
mod tests {
    use crate::clock::EventClock;
    use crate::descriptor::Descriptor;
    use crate::source::{Source, WITHDRAWN};
    use crate::sources::{TcpListenerSource, TcpStreamSource, UdpSource};
    use std::io::Write;
    use std::net::{TcpStream, UdpSocket};
    use std::time::{Duration, Instant};

    /// Retries a non-blocking read until it yields something.
    fn read_eventually<S: Source>(source: &mut S) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(record) = source.read() {
                return record.payload.to_vec();
            }
            assert!(Instant::now() < deadline, "no data within deadline");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_listener_accepts_connection() {
        let desc: Descriptor = "tcp_listen:127.0.0.1:0".parse().unwrap();
        let mut listener = TcpListenerSource::open(EventClock::new(), &desc).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(listener.read().is_none());

        let client = TcpStream::connect(addr).unwrap();
        let peer = read_eventually(&mut listener);
        assert_eq!(
            String::from_utf8(peer).unwrap(),
            client.local_addr().unwrap().to_string()
        );
        let (_stream, from) = listener.take_accepted().unwrap();
        assert_eq!(from, client.local_addr().unwrap());
        assert!(listener.take_accepted().is_none());
    }

    #[test]
    fn test_socket_attest_leaves_slot_untouched() {
        let desc: Descriptor = "udp:127.0.0.1:0".parse().unwrap();
        let mut udp = UdpSource::open(EventClock::new(), &desc).unwrap();
        let mut ts = WITHDRAWN;
        udp.attest(&mut ts);
        assert_eq!(ts, WITHDRAWN);
        let mut ts = 17;
        udp.attest(&mut ts);
        assert_eq!(ts, 17);
    }

    #[test]
    fn test_tcp_stream_reads_and_sees_eof() {
        let server = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let desc: Descriptor = format!("tcp:{}", server.local_addr().unwrap())
            .parse()
            .unwrap();
        let clock = EventClock::starting_at(42);
        let mut source = TcpStreamSource::connect(clock, &desc).unwrap();
        let (mut peer, _) = server.accept().unwrap();

        peer.write_all(b"quote").unwrap();
        let record = source.read().unwrap();
        assert_eq!(record.payload, b"quote");
        assert_eq!(record.timestamp, 42);

        drop(peer);
        assert!(source.read().is_none());
    }

    #[test]
    fn test_udp_reads_one_datagram_per_read() {
        let desc: Descriptor = "udp:127.0.0.1:0".parse().unwrap();
        let mut udp = UdpSource::open(EventClock::new(), &desc).unwrap();
        let addr = udp.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"one", addr).unwrap();
        sender.send_to(b"two", addr).unwrap();

        assert_eq!(read_eventually(&mut udp), b"one");
        assert_eq!(read_eventually(&mut udp), b"two");
        assert!(udp.read().is_none());
    }
}
