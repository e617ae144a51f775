//! Simulated lossy datagram link for testing

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout};
use log::{debug, trace};

use crate::channel::Datagram;
use crate::LinkError;

/// Fault model applied to every datagram leaving an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultConfig {
    pub drop_rate: f32,
    pub corrupt_rate: f32,
    pub duplicate_rate: f32,
    pub latency: Duration,
    /// Extra random delay in `[0, latency_jitter]`; nonzero jitter reorders datagrams.
    pub latency_jitter: Duration,
    pub recv_timeout: Duration,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            drop_rate: 0.0,
            corrupt_rate: 0.0,
            duplicate_rate: 0.0,
            latency: Duration::ZERO,
            latency_jitter: Duration::ZERO,
            recv_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChannelStats {
    pub datagrams_sent: u64,
    pub datagrams_dropped: u64,
    pub datagrams_corrupted: u64,
    pub datagrams_duplicated: u64,
    pub bytes_sent: u64,
}

/// One end of an in-memory datagram link.
///
/// A vanished peer looks like silence, the same as UDP: `recv` waits out the
/// timeout instead of reporting a closed channel.
pub struct SimulatedChannel {
    config: FaultConfig,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    stats: Arc<Mutex<ChannelStats>>,
}

struct Delivery {
    bytes: Vec<u8>,
    delay: Duration,
}

impl SimulatedChannel {
    /// Two connected endpoints sharing one fault model.
    pub fn pair(config: FaultConfig) -> (Self, Self) {
        Self::asymmetric(config.clone(), config)
    }

    /// Two connected endpoints; `a` applies `a_config` to what it sends, `b` likewise.
    pub fn asymmetric(a_config: FaultConfig, b_config: FaultConfig) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let a = Self {
            config: a_config,
            outbound: a_tx,
            inbound: Mutex::new(a_rx),
            stats: Arc::new(Mutex::new(ChannelStats::default())),
        };
        let b = Self {
            config: b_config,
            outbound: b_tx,
            inbound: Mutex::new(b_rx),
            stats: Arc::new(Mutex::new(ChannelStats::default())),
        };
        (a, b)
    }

    pub async fn get_stats(&self) -> ChannelStats {
        self.stats.lock().await.clone()
    }

    fn apply_faults(&self, data: &[u8], stats: &mut ChannelStats) -> Vec<Delivery> {
        let mut rng = rand::rng();

        let copies = if rng.random::<f32>() < self.config.duplicate_rate {
            stats.datagrams_duplicated += 1;
            2
        } else {
            1
        };

        let mut deliveries = Vec::with_capacity(copies);
        for _ in 0..copies {
            if rng.random::<f32>() < self.config.drop_rate {
                stats.datagrams_dropped += 1;
                debug!("Simulated datagram loss");
                continue;
            }

            let mut bytes = data.to_vec();
            if !bytes.is_empty() && rng.random::<f32>() < self.config.corrupt_rate {
                let at = rng.random_range(0..bytes.len());
                bytes[at] ^= 1u8 << rng.random_range(0..8u32);
                stats.datagrams_corrupted += 1;
                debug!("Simulated bit flip at byte {}", at);
            }

            let jitter_ms = self.config.latency_jitter.as_millis() as u64;
            let jitter = if jitter_ms > 0 {
                Duration::from_millis(rng.random_range(0..=jitter_ms))
            } else {
                Duration::ZERO
            };

            deliveries.push(Delivery {
                bytes,
                delay: self.config.latency + jitter,
            });
        }
        deliveries
    }
}

#[async_trait]
impl Datagram for SimulatedChannel {
    async fn send(&self, bytes: &[u8]) -> Result<(), LinkError> {
        trace!("Simulating transmission of {} bytes", bytes.len());

        let deliveries = {
            let mut stats = self.stats.lock().await;
            stats.datagrams_sent += 1;
            stats.bytes_sent += bytes.len() as u64;
            self.apply_faults(bytes, &mut stats)
        };

        for delivery in deliveries {
            if delivery.delay.is_zero() {
                // a receiver that is gone is indistinguishable from loss
                let _ = self.outbound.send(delivery.bytes);
            } else {
                let outbound = self.outbound.clone();
                tokio::spawn(async move {
                    sleep(delivery.delay).await;
                    let _ = outbound.send(delivery.bytes);
                });
            }
        }

        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, LinkError> {
        let wait = self.config.recv_timeout;
        let mut inbound = self.inbound.lock().await;
        match timeout(wait, inbound.recv()).await {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => {
                sleep(wait).await;
                Err(LinkError::Timeout(wait))
            }
            Err(_) => Err(LinkError::Timeout(wait)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(config: FaultConfig) -> FaultConfig {
        FaultConfig {
            recv_timeout: Duration::from_millis(50),
            ..config
        }
    }

    #[tokio::test]
    async fn test_lossless_passthrough() {
        let (a, b) = SimulatedChannel::pair(quick(FaultConfig::default()));

        a.send(b"first").await.unwrap();
        a.send(b"second").await.unwrap();
        b.send(b"reply").await.unwrap();

        assert_eq!(b.recv().await.unwrap(), b"first");
        assert_eq!(b.recv().await.unwrap(), b"second");
        assert_eq!(a.recv().await.unwrap(), b"reply");

        let stats = a.get_stats().await;
        assert_eq!(stats.datagrams_sent, 2);
        assert_eq!(stats.bytes_sent, 11);
        assert_eq!(stats.datagrams_dropped, 0);
    }

    #[tokio::test]
    async fn test_total_loss_times_out() {
        let (a, b) = SimulatedChannel::pair(quick(FaultConfig {
            drop_rate: 1.0,
            ..Default::default()
        }));

        a.send(b"lost").await.unwrap();
        assert!(matches!(b.recv().await, Err(LinkError::Timeout(_))));
        assert_eq!(a.get_stats().await.datagrams_dropped, 1);
    }

    #[tokio::test]
    async fn test_corruption_flips_one_bit() {
        let (a, b) = SimulatedChannel::pair(quick(FaultConfig {
            corrupt_rate: 1.0,
            ..Default::default()
        }));

        let original = vec![0u8; 64];
        a.send(&original).await.unwrap();
        let received = b.recv().await.unwrap();

        let flipped: u32 = original
            .iter()
            .zip(&received)
            .map(|(x, y)| (x ^ y).count_ones())
            .sum();
        assert_eq!(flipped, 1);
        assert_eq!(a.get_stats().await.datagrams_corrupted, 1);
    }

    #[tokio::test]
    async fn test_duplication() {
        let (a, b) = SimulatedChannel::pair(quick(FaultConfig {
            duplicate_rate: 1.0,
            ..Default::default()
        }));

        a.send(b"twice").await.unwrap();
        assert_eq!(b.recv().await.unwrap(), b"twice");
        assert_eq!(b.recv().await.unwrap(), b"twice");
        assert!(b.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_latency_delays_delivery() {
        let (a, b) = SimulatedChannel::pair(FaultConfig {
            latency: Duration::from_millis(30),
            recv_timeout: Duration::from_millis(10),
            ..Default::default()
        });

        a.send(b"slow").await.unwrap();
        assert!(b.recv().await.is_err());
        sleep(Duration::from_millis(40)).await;
        assert_eq!(b.recv().await.unwrap(), b"slow");
    }

    #[tokio::test]
    async fn test_dropped_peer_looks_like_silence() {
        let (a, b) = SimulatedChannel::pair(quick(FaultConfig::default()));
        drop(a);
        assert!(matches!(b.recv().await, Err(LinkError::Timeout(_))));
    }
}
