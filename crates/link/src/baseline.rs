//! Baseline echo mode: no framing, no integrity checks.
//!
//! The sender pushes the whole payload as one datagram and repeats it until
//! anything comes back. The receiver writes every datagram it gets and answers
//! each with `ECHO_ACK`. A payload must fit in one datagram, which over UDP
//! means `channel::MAX_DATAGRAM` bytes. Useful as a reference point against
//! the reliable engines and for checking that two hosts can reach each other.

use log::{debug, info};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::channel::Datagram;
use crate::LinkError;

/// Reply the echo receiver sends for every datagram.
pub const ECHO_ACK: &[u8] = b"123";

pub struct EchoSender<C> {
    channel: C,
}

impl<C: Datagram> EchoSender<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Sends `payload` until a reply arrives. Returns the number of attempts.
    pub async fn send(&self, payload: &[u8]) -> Result<u32, LinkError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            self.channel.send(payload).await?;
            match self.channel.recv().await {
                Ok(reply) => {
                    info!(
                        "Got reply {:?} after {} attempts",
                        String::from_utf8_lossy(&reply),
                        attempts
                    );
                    return Ok(attempts);
                }
                Err(LinkError::Timeout(waited)) => {
                    debug!("No reply within {:?}, sending again", waited);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

pub struct EchoReceiver<C> {
    channel: C,
}

impl<C: Datagram> EchoReceiver<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    /// Writes datagrams to `output` as they arrive until the channel goes
    /// quiet. Returns the number of bytes written.
    pub async fn run<W>(&self, output: &mut W) -> Result<usize, LinkError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0;
        loop {
            let data = match self.channel.recv().await {
                Ok(data) => data,
                Err(LinkError::Timeout(idle)) => {
                    info!("No data for {:?}, done after {} bytes", idle, written);
                    break;
                }
                Err(e) => return Err(e),
            };
            debug!("Got {} bytes", data.len());
            output.write_all(&data).await?;
            written += data.len();
            self.channel.send(ECHO_ACK).await?;
        }
        output.flush().await?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use std::net::SocketAddr;
    use tokio::net::UdpSocket;
    use crate::channel::UdpChannel;
    use crate::simulated::{FaultConfig, SimulatedChannel};

    fn fast(drop_rate: f32) -> FaultConfig {
        FaultConfig {
            drop_rate,
            recv_timeout: Duration::from_millis(30),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let (a, b) = SimulatedChannel::pair(fast(0.0));
        let sender = EchoSender::new(a);
        let receiver = EchoReceiver::new(b);

        let serve = tokio::spawn(async move {
            let mut output = Vec::new();
            receiver.run(&mut output).await.map(|n| (n, output))
        });

        assert_eq!(sender.send(b"hello echo").await.unwrap(), 1);
        let (written, output) = serve.await.unwrap().unwrap();
        assert_eq!(written, 10);
        assert_eq!(output, b"hello echo");
    }

    #[tokio::test]
    async fn test_echo_sender_repeats_until_reply() {
        // everything the sender emits is lost; the reply shows up late on its own
        let (a, b) = SimulatedChannel::asymmetric(fast(1.0), fast(0.0));
        let sender = EchoSender::new(a);

        let replier = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(70)).await;
            b.send(ECHO_ACK).await.unwrap();
        });

        let attempts = sender.send(b"ping").await.unwrap();
        assert!(attempts >= 2);
        assert_eq!(sender.channel().get_stats().await.datagrams_sent, u64::from(attempts));
        replier.await.unwrap();
    }

    #[tokio::test]
    async fn test_echo_receiver_accepts_anything() {
        let (a, b) = SimulatedChannel::pair(fast(0.0));
        let receiver = EchoReceiver::new(b);

        a.send(b"no").await.unwrap();
        a.send(b" framing").await.unwrap();

        let mut output = Vec::new();
        assert_eq!(receiver.run(&mut output).await.unwrap(), 10);
        assert_eq!(output, b"no framing");
        assert_eq!(a.recv().await.unwrap(), ECHO_ACK);
        assert_eq!(a.recv().await.unwrap(), ECHO_ACK);
    }

    #[tokio::test]
    async fn test_echo_over_udp_keeps_large_payload_whole() {
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a = UdpSocket::bind(any).await.unwrap();
        let b = UdpSocket::bind(any).await.unwrap();
        let (a_addr, b_addr) = (a.local_addr().unwrap(), b.local_addr().unwrap());
        let sender = EchoSender::new(UdpChannel::from_socket(a, b_addr, Duration::from_millis(100)).unwrap());
        let receiver = EchoReceiver::new(UdpChannel::from_socket(b, a_addr, Duration::from_millis(200)).unwrap());

        let payload: Vec<u8> = (0..5000).map(|i| (i % 251) as u8).collect();
        let mut output = Vec::new();
        let (attempts, written) = tokio::join!(sender.send(&payload), receiver.run(&mut output));

        assert_eq!(attempts.unwrap(), 1);
        assert_eq!(written.unwrap(), payload.len());
        assert_eq!(output, payload);
    }
}
