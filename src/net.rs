//! Packet-radio transport: the stream seam the discovery dialogue runs
//! over, the AX.25 socket implementation of it, and the line reader that
//! turns receive timeouts into end-of-stream.

use crate::callsign::Callsign;
use crate::error::{AirwalkError, Result};
use std::os::fd::RawFd;
use std::time::Duration;

/// Byte stream with a per-read timeout. This is all the dialogue needs
/// from the transport, and what tests fake.
pub trait PacketStream: Send {
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive some bytes. `Ok(0)` means the peer closed; a timed-out
    /// read is `Err(Timeout)`.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Opens connected streams to remote stations.
pub trait PacketConnector: Send + Sync {
    fn connect(&self, remote: &Callsign) -> Result<Box<dyn PacketStream>>;
}

/// Sequenced-packet AX.25 connector bound to the local station callsign.
pub struct Ax25Connector {
    local: Callsign,
    response_timeout: Duration,
}

impl Ax25Connector {
    pub fn new(local: Callsign, response_timeout: Duration) -> Self {
        Ax25Connector {
            local,
            response_timeout,
        }
    }
}

impl PacketConnector for Ax25Connector {
    fn connect(&self, remote: &Callsign) -> Result<Box<dyn PacketStream>> {
        let stream = Ax25Stream::connect(&self.local, remote, self.response_timeout)?;
        Ok(Box::new(stream))
    }
}

const AX25_MAX_DIGIS: usize = 8;

/// Wire form of an AX.25 callsign: six left-shifted, space-padded
/// characters and a shifted SSID byte.
#[repr(C)]
#[derive(Clone, Copy)]
struct Ax25Address {
    call: [u8; 7],
}

#[repr(C)]
struct SockaddrAx25 {
    family: libc::sa_family_t,
    call: Ax25Address,
    ndigis: libc::c_int,
}

#[repr(C)]
struct FullSockaddrAx25 {
    base: SockaddrAx25,
    digipeaters: [Ax25Address; AX25_MAX_DIGIS],
}

impl Ax25Address {
    const BLANK: Ax25Address = Ax25Address { call: [b' ' << 1; 7] };

    fn encode(callsign: &Callsign) -> Result<Self> {
        let base = callsign.base();
        if base.len() > 6 {
            return Err(AirwalkError::InvalidCallsign(
                callsign.as_str().to_string(),
                "AX.25 addresses allow at most 6 base characters",
            ));
        }
        let mut addr = Self::BLANK;
        for (i, b) in base.bytes().enumerate() {
            addr.call[i] = b.to_ascii_uppercase() << 1;
        }
        addr.call[6] = (callsign.ssid().unwrap_or(0) << 1) & 0x1e;
        Ok(addr)
    }
}

fn sockaddr_for(callsign: &Callsign) -> Result<FullSockaddrAx25> {
    Ok(FullSockaddrAx25 {
        base: SockaddrAx25 {
            family: libc::AF_AX25 as libc::sa_family_t,
            call: Ax25Address::encode(callsign)?,
            ndigis: 0,
        },
        digipeaters: [Ax25Address::BLANK; AX25_MAX_DIGIS],
    })
}

fn check(ret: libc::c_int, what: &str) -> Result<libc::c_int> {
    if ret == -1 {
        let err = std::io::Error::last_os_error();
        Err(AirwalkError::Io(std::io::Error::new(
            err.kind(),
            format!("{what}: {err}"),
        )))
    } else {
        Ok(ret)
    }
}

/// Connected AX.25 sequenced-packet socket.
struct Ax25Stream {
    fd: RawFd,
}

impl Ax25Stream {
    fn connect(local: &Callsign, remote: &Callsign, timeout: Duration) -> Result<Self> {
        let fd = check(
            unsafe { libc::socket(libc::AF_AX25, libc::SOCK_SEQPACKET, 0) },
            "opening AX.25 socket",
        )?;
        let stream = Ax25Stream { fd };

        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        check(
            unsafe {
                libc::setsockopt(
                    stream.fd,
                    libc::SOL_SOCKET,
                    libc::SO_RCVTIMEO,
                    &tv as *const libc::timeval as *const libc::c_void,
                    std::mem::size_of::<libc::timeval>() as libc::socklen_t,
                )
            },
            "setting receive timeout",
        )?;

        let local_addr = sockaddr_for(local)?;
        check(
            unsafe {
                libc::bind(
                    stream.fd,
                    &local_addr as *const FullSockaddrAx25 as *const libc::sockaddr,
                    std::mem::size_of::<FullSockaddrAx25>() as libc::socklen_t,
                )
            },
            "binding local callsign",
        )?;

        let remote_addr = sockaddr_for(remote)?;
        check(
            unsafe {
                libc::connect(
                    stream.fd,
                    &remote_addr as *const FullSockaddrAx25 as *const libc::sockaddr,
                    std::mem::size_of::<FullSockaddrAx25>() as libc::socklen_t,
                )
            },
            "connecting",
        )?;

        Ok(stream)
    }
}

impl Drop for Ax25Stream {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

impl PacketStream for Ax25Stream {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut sent = 0;
        while sent < data.len() {
            let n = unsafe {
                libc::send(
                    self.fd,
                    data[sent..].as_ptr() as *const libc::c_void,
                    data.len() - sent,
                    0,
                )
            };
            if n == -1 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }
            sent += n as usize;
        }
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let n = unsafe {
                libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)
            };
            if n == -1 {
                let err = std::io::Error::last_os_error();
                match err.kind() {
                    std::io::ErrorKind::Interrupted => continue,
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                        return Err(AirwalkError::Timeout)
                    }
                    _ => return Err(err.into()),
                }
            }
            return Ok(n as usize);
        }
    }
}

enum Filled {
    Data,
    TimedOut,
    Closed,
}

/// Line-at-a-time view of a [`PacketStream`].
///
/// Lines end at `\n`, `\r`, `\r\n`, or stream end; the terminator is not
/// returned. A receive timeout is translated into end-of-stream here,
/// and only here, so the dialogue parser has a single terminating
/// condition. The translation is soft: the next read after a timeout
/// tries the stream again.
pub struct LineReader {
    stream: Box<dyn PacketStream>,
    buf: Vec<u8>,
    closed: bool,
}

impl LineReader {
    pub fn new(stream: Box<dyn PacketStream>) -> Self {
        LineReader {
            stream,
            buf: Vec::new(),
            closed: false,
        }
    }

    /// Send one command line, CRLF-terminated.
    pub fn send_line(&mut self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\r\n");
        self.stream.send(&data)
    }

    /// Read and discard everything until the remote falls silent.
    pub fn drain(&mut self) -> Result<()> {
        let mut scratch = [0u8; 512];
        loop {
            match self.stream.recv(&mut scratch) {
                Ok(0) => {
                    self.closed = true;
                    return Ok(());
                }
                Ok(_) => continue,
                Err(AirwalkError::Timeout) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Next line, or `None` when the stream has ended for this parse.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.split_line()? {
                return Ok(Some(line));
            }
            if self.closed {
                return Ok(self.take_tail());
            }
            match self.fill()? {
                Filled::Data => continue,
                Filled::TimedOut => return Ok(self.take_tail()),
                Filled::Closed => self.closed = true,
            }
        }
    }

    /// Try to split one complete line off the front of the buffer.
    /// Returns `None` when more data is needed to decide.
    fn split_line(&mut self) -> Result<Option<String>> {
        for i in 0..self.buf.len() {
            let skip = match self.buf[i] {
                b'\n' => 1,
                b'\r' => {
                    if let Some(&next) = self.buf.get(i + 1) {
                        if next == b'\n' {
                            2
                        } else {
                            1
                        }
                    } else if self.closed {
                        1
                    } else {
                        // A bare CR at the buffer edge: the matching LF
                        // may still be in flight.
                        return Ok(None);
                    }
                }
                _ => continue,
            };
            let line = line_text(&self.buf[..i])?;
            self.buf.drain(..i + skip);
            return Ok(Some(line));
        }
        Ok(None)
    }

    fn take_tail(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.buf);
        line_text(&tail).ok()
    }

    fn fill(&mut self) -> Result<Filled> {
        let mut scratch = [0u8; 512];
        match self.stream.recv(&mut scratch) {
            Ok(0) => Ok(Filled::Closed),
            Ok(n) => {
                self.buf.extend_from_slice(&scratch[..n]);
                Ok(Filled::Data)
            }
            Err(AirwalkError::Timeout) => Ok(Filled::TimedOut),
            Err(e) => Err(e),
        }
    }
}

fn line_text(bytes: &[u8]) -> Result<String> {
    // BBS output is ASCII in practice; anything else is replaced rather
    // than failing the whole dialogue.
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    /// Scripted stream: a sequence of recv results.
    pub(crate) struct ScriptedStream {
        chunks: std::collections::VecDeque<Result<Vec<u8>>>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl ScriptedStream {
        pub fn new(chunks: Vec<Result<Vec<u8>>>) -> Self {
            ScriptedStream {
                chunks: chunks.into_iter().collect(),
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn sent_log(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
            Arc::clone(&self.sent)
        }
    }

    impl PacketStream for ScriptedStream {
        fn send(&mut self, data: &[u8]) -> Result<()> {
            self.sent.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
            match self.chunks.pop_front() {
                None => Ok(0),
                Some(Ok(bytes)) => {
                    assert!(bytes.len() <= buf.len());
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
            }
        }
    }

    fn reader_for(chunks: Vec<Result<Vec<u8>>>) -> LineReader {
        LineReader::new(Box::new(ScriptedStream::new(chunks)))
    }

    #[test]
    fn test_terminator_variants() {
        let mut reader = reader_for(vec![Ok(b"one\ntwo\rthree\r\nfour".to_vec())]);
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("one"));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("two"));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("three"));
        // Partial tail returned at stream end.
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("four"));
        assert_eq!(reader.read_line().unwrap(), None);
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        let mut reader = reader_for(vec![Ok(b"line\r".to_vec()), Ok(b"\nnext\n".to_vec())]);
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("line"));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("next"));
    }

    #[test]
    fn test_timeout_is_soft_end_of_stream() {
        let mut reader = reader_for(vec![
            Ok(b"partial".to_vec()),
            Err(AirwalkError::Timeout),
            Ok(b"later\n".to_vec()),
        ]);
        // Timeout flushes the tail and ends this parse...
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("partial"));
        // ...but the reader keeps working afterwards.
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("later"));
    }

    #[test]
    fn test_empty_lines_preserved() {
        let mut reader = reader_for(vec![Ok(b"\r\n\r\nx\n".to_vec())]);
        assert_eq!(reader.read_line().unwrap().as_deref(), Some(""));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some(""));
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn test_send_line_appends_crlf() {
        let stream = ScriptedStream::new(vec![]);
        let sent = stream.sent_log();
        let mut reader = LineReader::new(Box::new(stream));
        reader.send_line("J L").unwrap();
        assert_eq!(sent.lock().unwrap().as_slice(), [b"J L\r\n".to_vec()]);
    }

    #[test]
    fn test_ax25_address_encoding() {
        let addr = Ax25Address::encode(&Callsign::parse("N0CALL-5").unwrap()).unwrap();
        assert_eq!(addr.call[0], b'N' << 1);
        assert_eq!(addr.call[5], b'L' << 1);
        assert_eq!(addr.call[6], 5 << 1);

        let short = Ax25Address::encode(&Callsign::parse("AB1").unwrap()).unwrap();
        assert_eq!(short.call[3], b' ' << 1);
        assert_eq!(short.call[6], 0);
    }

    #[test]
    fn test_ax25_address_rejects_long_base() {
        let callsign = Callsign::parse("AB1CD2EF").unwrap();
        assert!(matches!(
            Ax25Address::encode(&callsign),
            Err(AirwalkError::InvalidCallsign(..))
        ));
    }
}
