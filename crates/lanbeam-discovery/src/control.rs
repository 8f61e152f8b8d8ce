//! Retransmitting sender for the transfer control channel.
//!
//! Control messages ride UDP and can vanish. Every control send is repeated
//! at a fixed interval until the caller observes a state transition (an
//! accept, decline, or cancel arriving) and acknowledges the handle, or the
//! attempt budget runs out. Dropping the handle does not stop the task:
//! declines and cancels are fire-and-forget and still deserve their full
//! budget.

use crate::engine::DiscoveryEngine;
use crate::wire::Datagram;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// How many times a control datagram is sent in total.
pub const RETRANSMIT_ATTEMPTS: u32 = 3;

/// Pause between control retransmissions.
pub const RETRANSMIT_INTERVAL: Duration = Duration::from_millis(500);

/// Sends control datagrams with retransmission.
#[derive(Clone)]
pub struct ControlSender {
    engine: DiscoveryEngine,
    attempts: u32,
    interval: Duration,
}

impl ControlSender {
    /// Wrap an engine handle with the default retransmission policy.
    #[must_use]
    pub fn new(engine: DiscoveryEngine) -> Self {
        Self {
            engine,
            attempts: RETRANSMIT_ATTEMPTS,
            interval: RETRANSMIT_INTERVAL,
        }
    }

    /// Override the retransmission policy (tests tighten the timing).
    #[must_use]
    pub fn with_policy(mut self, attempts: u32, interval: Duration) -> Self {
        self.attempts = attempts;
        self.interval = interval;
        self
    }

    /// Send `datagram` to `dest`, retransmitting until acknowledged or the
    /// attempt budget is exhausted.
    #[must_use]
    pub fn send(&self, dest: SocketAddr, datagram: Datagram) -> RetransmitHandle {
        let engine = self.engine.clone();
        let attempts = self.attempts.max(1);
        let interval = self.interval;
        let (ack_tx, mut ack_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ack_closed = false;
            for attempt in 1..=attempts {
                if let Err(e) = engine.send_datagram_to(dest, &datagram).await {
                    tracing::warn!(%dest, kind = datagram.kind(), error = %e, "control send failed");
                }

                if attempt == attempts {
                    break;
                }

                if ack_closed {
                    tokio::time::sleep(interval).await;
                    continue;
                }

                tokio::select! {
                    res = &mut ack_rx => {
                        match res {
                            Ok(()) => {
                                tracing::trace!(%dest, kind = datagram.kind(), "control acknowledged");
                                return;
                            }
                            // Handle dropped fire-and-forget; spend the
                            // remaining budget on a plain timer.
                            Err(_) => {
                                ack_closed = true;
                                tokio::time::sleep(interval).await;
                            }
                        }
                    }
                    () = tokio::time::sleep(interval) => {}
                }
            }
            tracing::debug!(%dest, kind = datagram.kind(), "control retransmission budget spent");
        });

        RetransmitHandle {
            ack: Some(ack_tx),
            task,
        }
    }
}

/// Handle to an in-flight retransmitting control send.
pub struct RetransmitHandle {
    ack: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RetransmitHandle {
    /// Stop retransmitting: the transition this message was driving has
    /// been observed.
    pub fn acknowledge(mut self) {
        if let Some(ack) = self.ack.take() {
            let _ = ack.send(());
        }
    }
}

impl Drop for RetransmitHandle {
    fn drop(&mut self) {
        // Deliberately no cancellation: a dropped handle means the caller
        // has nothing to observe (decline/cancel) and the remaining
        // attempts should still go out. The budget bounds the task.
        let _ = &self.task;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DiscoveryConfig, DiscoveryEngine, LocalIdentity};
    use crate::wire::{self, Origin, TransferCancelBody};
    use lanbeam_net::{InterfaceClassifier, NetIfEnumerator, NetInterface};
    use std::sync::Arc;
    use uuid::Uuid;

    struct LoopbackEnumerator;

    impl NetIfEnumerator for LoopbackEnumerator {
        fn interfaces(&self) -> Result<Vec<NetInterface>, lanbeam_net::NetError> {
            Ok(vec![NetInterface {
                name: "eth-test".to_string(),
                ipv4s: vec![std::net::Ipv4Addr::LOCALHOST],
                ipv6s: Vec::new(),
                broadcast: None,
                is_loopback: false,
            }])
        }
    }

    async fn engine_on_free_port() -> DiscoveryEngine {
        let probe = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let config = DiscoveryConfig {
            port,
            hello_interval: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
            liveness_ttl: Duration::from_secs(60),
            reap_interval: Duration::from_secs(60),
            refresh_wait: Duration::from_millis(10),
            classifier: InterfaceClassifier::default(),
        };
        let identity = LocalIdentity {
            name: "ctl".to_string(),
            platform: "linux".to_string(),
            system: "test".to_string(),
            avatar: String::new(),
            signature: "sig-ctl".to_string(),
            nonce: 0,
        }
        .with_random_nonce();

        DiscoveryEngine::start(config, identity, Arc::new(LoopbackEnumerator))
            .unwrap()
            .0
    }

    fn cancel_datagram() -> Datagram {
        Datagram::TransferCancel(TransferCancelBody {
            origin: Origin {
                from: "127.0.0.1:1".to_string(),
                name: "ctl".to_string(),
                platform: "linux".to_string(),
                system: "test".to_string(),
                signature: "sig-ctl".to_string(),
            },
            transfer_id: Uuid::new_v4(),
        })
    }

    #[tokio::test]
    async fn test_unacknowledged_send_uses_full_budget() {
        let engine = engine_on_free_port().await;
        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = receiver.local_addr().unwrap();

        let sender = ControlSender::new(engine.clone()).with_policy(3, Duration::from_millis(50));
        let handle = sender.send(dest, cancel_datagram());

        let mut buf = [0u8; 2048];
        let mut received = 0;
        while received < 3 {
            let (len, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
                .await
                .expect("retransmission within timeout")
                .unwrap();
            assert!(wire::decode(&buf[..len]).unwrap().is_some());
            received += 1;
        }

        drop(handle);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_acknowledge_stops_retransmission() {
        let engine = engine_on_free_port().await;
        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = receiver.local_addr().unwrap();

        let sender = ControlSender::new(engine.clone()).with_policy(10, Duration::from_millis(50));
        let handle = sender.send(dest, cancel_datagram());

        let mut buf = [0u8; 2048];
        let _ = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .expect("first attempt within timeout")
            .unwrap();

        handle.acknowledge();

        // Drain anything already in flight, then require silence.
        tokio::time::sleep(Duration::from_millis(150)).await;
        let mut extra = 0;
        while let Ok(Ok(_)) =
            tokio::time::timeout(Duration::from_millis(120), receiver.recv_from(&mut buf)).await
        {
            extra += 1;
        }
        assert!(extra <= 1, "retransmission kept going after acknowledge");

        engine.shutdown().await;
    }
}
