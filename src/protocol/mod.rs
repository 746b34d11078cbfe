//! Wire protocols toward the radio hardware
//!
//! Both engines run on the audio thread and hand finished datagrams to a
//! [`DatagramSink`], which must never block. Ring overflow, underflow and
//! failed sends are not fatal: they are counted in [`Counters`] and reported
//! as [`Notice`]s through a [`Notifier`], and processing continues with the
//! next block.

pub mod keyer;
pub mod streamer;
pub mod windowed;

use crate::error::TransportError;

use tokio::sync::mpsc;

use std::io;

/// Non-fatal transport event
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Notice {
    /// Ring overflowed and was trimmed to its cushion
    Overflow {
        /// Pairs discarded
        dropped: usize,
    },
    /// Ring ran short of a packet and was reset to its cushion
    Underflow {
        /// Pairs that were buffered
        buffered: usize,
    },
    /// Socket accepted fewer bytes than the datagram size
    ShortSend {
        /// Bytes accepted
        sent: usize,
        /// Datagram size
        expected: usize,
    },
    /// Socket reported an error
    SendFailed(io::ErrorKind),
}

/// Event counters of a protocol engine
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Counters {
    /// Datagrams built
    pub packets: u64,
    /// Overflow events
    pub overflows: u64,
    /// Underflow events
    pub underflows: u64,
    /// Failed or short sends
    pub send_errors: u64,
}

/// Optional sender of [`Notice`]s to the host
///
/// Sending never blocks; notices are dropped if nobody listens.
#[derive(Clone, Default, Debug)]
pub struct Notifier {
    sender: Option<mpsc::UnboundedSender<Notice>>,
}

impl Notifier {
    /// Notifier which only logs
    pub fn new() -> Self {
        Self::default()
    }
    /// Notifier with channel to the host
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }
    /// Report `notice`
    pub fn notify(&self, notice: Notice) {
        log::debug!("transport notice: {:?}", notice);
        if let Some(sender) = &self.sender {
            sender.send(notice).ok();
        }
    }
}

/// Non-blocking datagram destination
pub trait DatagramSink {
    /// Send one datagram, returning the number of bytes accepted
    fn send_datagram(&mut self, data: &[u8]) -> io::Result<usize>;
}

/// The socket must be connected and in non-blocking mode, see
/// [`std::net::UdpSocket::set_nonblocking`]; a full send buffer then yields
/// [`io::ErrorKind::WouldBlock`], which is counted like any failed send.
impl DatagramSink for std::net::UdpSocket {
    fn send_datagram(&mut self, data: &[u8]) -> io::Result<usize> {
        self.send(data)
    }
}

/// Uses [`tokio::net::UdpSocket::try_send`], which never waits.
impl DatagramSink for tokio::net::UdpSocket {
    fn send_datagram(&mut self, data: &[u8]) -> io::Result<usize> {
        self.try_send(data)
    }
}

impl<T: DatagramSink + ?Sized> DatagramSink for &mut T {
    fn send_datagram(&mut self, data: &[u8]) -> io::Result<usize> {
        (**self).send_datagram(data)
    }
}

/// Send `data` in one datagram, counting and reporting failures
pub(crate) fn send_counted(
    sink: &mut dyn DatagramSink,
    data: &[u8],
    counters: &mut Counters,
    notifier: &Notifier,
) -> Result<(), TransportError> {
    let result = match sink.send_datagram(data) {
        Ok(sent) if sent == data.len() => return Ok(()),
        Ok(sent) => {
            notifier.notify(Notice::ShortSend {
                sent,
                expected: data.len(),
            });
            Err(TransportError::ShortSend {
                sent,
                expected: data.len(),
            })
        }
        Err(err) => {
            notifier.notify(Notice::SendFailed(err.kind()));
            Err(TransportError::Io(err))
        }
    };
    counters.send_errors += 1;
    result
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Sink recording datagrams, optionally truncating them
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) datagrams: Vec<Vec<u8>>,
        pub(crate) accept: Option<usize>,
        pub(crate) fail: bool,
    }

    impl DatagramSink for RecordingSink {
        fn send_datagram(&mut self, data: &[u8]) -> io::Result<usize> {
            if self.fail {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.datagrams.push(data.to_vec());
            Ok(self.accept.unwrap_or(data.len()).min(data.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    #[test]
    fn test_send_counted() {
        let (notifier, mut notices) = Notifier::channel();
        let mut counters = Counters::default();
        let mut sink = RecordingSink::default();
        send_counted(&mut sink, &[1, 2, 3], &mut counters, &notifier).unwrap();
        sink.accept = Some(2);
        assert!(matches!(
            send_counted(&mut sink, &[1, 2, 3], &mut counters, &notifier),
            Err(TransportError::ShortSend {
                sent: 2,
                expected: 3
            })
        ));
        sink.fail = true;
        assert!(matches!(
            send_counted(&mut sink, &[1, 2, 3], &mut counters, &notifier),
            Err(TransportError::Io(_))
        ));
        assert_eq!(counters.send_errors, 2);
        assert_eq!(
            notices.try_recv().unwrap(),
            Notice::ShortSend {
                sent: 2,
                expected: 3
            }
        );
        assert_eq!(
            notices.try_recv().unwrap(),
            Notice::SendFailed(io::ErrorKind::WouldBlock)
        );
        assert!(notices.try_recv().is_err());
    }
    #[test]
    fn test_udp_sinks() {
        let receiver = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.connect(receiver.local_addr().unwrap()).unwrap();
        sender.set_nonblocking(true).unwrap();
        assert_eq!(sender.send_datagram(&[7; 16]).unwrap(), 16);
        let mut buf = [0; 32];
        assert_eq!(receiver.recv(&mut buf).unwrap(), 16);
    }
    #[tokio::test]
    async fn test_tokio_sink() {
        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.connect(receiver.local_addr().unwrap()).await.unwrap();
        sender.writable().await.unwrap();
        assert_eq!(sender.send_datagram(&[7; 16]).unwrap(), 16);
        let mut buf = [0; 32];
        assert_eq!(receiver.recv(&mut buf).await.unwrap(), 16);
    }
}
