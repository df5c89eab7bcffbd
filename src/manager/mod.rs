//! Connection manager.
//!
//! Runs on the I/O runtime and keeps one connection to the controller alive:
//!
//! ```text
//! Disconnected ─► Connecting ─► Connected ─(peer lost)─► Connecting ...
//!                     │  ▲                     │
//!                     └──┘ failed: sleep tier  └─(shutdown)─► Closing ─► Disconnected
//! ```
//!
//! Every established connection is announced with `READY` and handed to the
//! host as [`Inbound::Connected`] before its reader starts, so the host sees
//! the link before any frame from it.

mod retry;

pub use retry::{
    RetryPolicy, RetryTier, DEFAULT_FAST_INTERVAL, DEFAULT_SLOW_INTERVAL,
    DEFAULT_VERY_SLOW_INTERVAL, SLOW_TIER_START, VERY_SLOW_TIER_START,
};

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::BridgeError;
use crate::inbound::{Inbound, InboundSender};
use crate::transport::{ConnectionState, Transport};

/// Stop request sent from the owner to the manager task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopSignal {
    Run,
    Stop {
        /// Send `SHUTDOWN` before closing a live connection.
        announce: bool,
    },
}

/// Snapshot published by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManagerStatus {
    /// Current connection state.
    pub state: ConnectionState,
    /// Failed attempts counted toward the retry tier.
    pub attempt: u32,
}

/// Owner's handle to a running manager.
pub struct ManagerHandle {
    shutdown: watch::Sender<StopSignal>,
    status: watch::Receiver<ManagerStatus>,
    sessions: mpsc::UnboundedSender<()>,
    task: Option<JoinHandle<()>>,
}

impl ManagerHandle {
    /// Latest published status.
    pub fn status(&self) -> ManagerStatus {
        *self.status.borrow()
    }

    /// Latest published connection state.
    pub fn state(&self) -> ConnectionState {
        self.status().state
    }

    /// A receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<ManagerStatus> {
        self.status.clone()
    }

    /// Reset the attempt counter on the next successful connect.
    pub fn begin_new_session(&self) {
        let _ = self.sessions.send(());
    }

    /// Ask the manager to disconnect and stop. Does not wait.
    pub fn signal_shutdown(&self) {
        self.signal(true);
    }

    fn signal(&self, announce: bool) {
        self.shutdown.send_if_modified(|current| match current {
            StopSignal::Run => {
                *current = StopSignal::Stop { announce };
                true
            }
            StopSignal::Stop { .. } => false,
        });
    }

    /// Whether the manager task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal shutdown and wait for the task, up to `timeout`.
    ///
    /// Returns `false` if the task was still running when the timeout hit;
    /// it is then abandoned.
    pub async fn shutdown(&mut self, timeout: Duration) -> bool {
        self.shutdown_with(timeout, true).await
    }

    /// Like [`shutdown`](Self::shutdown), but with `announce` unset the live
    /// connection is closed without sending `SHUTDOWN`. Used when a response
    /// frame was left half-written on the channel.
    pub async fn shutdown_with(&mut self, timeout: Duration, announce: bool) -> bool {
        self.signal(announce);

        let Some(task) = self.task.take() else {
            return true;
        };
        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!("connection manager task failed: {}", e);
                true
            }
            Err(_) => {
                tracing::warn!(?timeout, "connection manager did not stop in time");
                false
            }
        }
    }
}

/// Reconnect loop state.
pub struct ConnectionManager {
    transport: Transport,
    policy: RetryPolicy,
    attempt: u32,
    inbound: InboundSender,
    status: watch::Sender<ManagerStatus>,
    shutdown: watch::Receiver<StopSignal>,
    sessions: mpsc::UnboundedReceiver<()>,
}

impl ConnectionManager {
    /// Spawn the manager on `runtime` and return its handle.
    pub fn spawn(
        transport: Transport,
        policy: RetryPolicy,
        inbound: InboundSender,
        runtime: &Handle,
    ) -> ManagerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(StopSignal::Run);
        let (status_tx, status_rx) = watch::channel(ManagerStatus::default());
        let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();

        let manager = ConnectionManager {
            transport,
            policy,
            attempt: 0,
            inbound,
            status: status_tx,
            shutdown: shutdown_rx,
            sessions: sessions_rx,
        };
        let task = runtime.spawn(manager.run());

        ManagerHandle {
            shutdown: shutdown_tx,
            status: status_rx,
            sessions: sessions_tx,
            task: Some(task),
        }
    }

    async fn run(mut self) {
        tracing::info!(endpoint = %self.transport.describe(), "connection manager started");

        loop {
            if *self.shutdown.borrow() != StopSignal::Run {
                break;
            }
            self.publish(ConnectionState::Connecting);

            let result = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => break,
                result = self.transport.connect() => result,
            };

            let mut connection = match result {
                Ok(connection) => connection,
                Err(e) => {
                    if self.back_off(&e).await {
                        continue;
                    }
                    break;
                }
            };

            if self.take_session_signal() {
                self.attempt = 0;
            }

            if let Err(e) = connection.announce().await {
                tracing::warn!(connection = %connection.id(), "READY not delivered: {}", e);
                connection.disconnect(false).await;
                if self.back_off(&e).await {
                    continue;
                }
                break;
            }

            let id = connection.id();
            tracing::info!(connection = %id, attempt = self.attempt, "connected");
            self.publish(ConnectionState::Connected);

            if !self.inbound.push(Inbound::Connected(connection.link())) {
                tracing::warn!("host queue closed, stopping connection manager");
                connection.disconnect(true).await;
                break;
            }
            connection.start_reader(self.inbound.clone());

            let end = tokio::select! {
                biased;
                announce = wait_for_shutdown(&mut self.shutdown) => Err(announce),
                end = connection.closed() => Ok(end),
            };

            match end {
                Err(announce) => {
                    self.publish(ConnectionState::Closing);
                    connection.disconnect(announce).await;
                    self.inbound.push(Inbound::Disconnected(id));
                    break;
                }
                Ok(end) => {
                    tracing::info!(connection = %id, ?end, "connection lost, reconnecting");
                    connection.disconnect(false).await;
                    self.publish(ConnectionState::Disconnected);
                    self.inbound.push(Inbound::Disconnected(id));
                }
            }
        }

        self.publish(ConnectionState::Disconnected);
        tracing::info!("connection manager stopped");
    }

    /// Count a failed attempt and sleep its tier's delay.
    ///
    /// Returns `false` if shutdown was requested during the sleep.
    async fn back_off(&mut self, error: &BridgeError) -> bool {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.policy.interval(self.attempt);
        self.log_failure(error, delay);
        self.publish(ConnectionState::Connecting);

        tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut self.shutdown) => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn publish(&self, state: ConnectionState) {
        let status = ManagerStatus {
            state,
            attempt: self.attempt,
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    fn take_session_signal(&mut self) -> bool {
        let mut signalled = false;
        while self.sessions.try_recv().is_ok() {
            signalled = true;
        }
        signalled
    }

    fn log_failure(&self, error: &BridgeError, delay: Duration) {
        let attempt = self.attempt;
        // Quiet while waiting, but note each tier change
        if attempt == 1 || attempt == SLOW_TIER_START || attempt == VERY_SLOW_TIER_START {
            tracing::info!(
                attempt,
                tier = ?self.policy.tier(attempt),
                ?delay,
                "controller unreachable: {}",
                error
            );
        } else {
            tracing::debug!(attempt, ?delay, "connect failed: {}", error);
        }
    }
}

/// Resolves once shutdown is requested or the owner is gone, with whether
/// to announce it to the peer.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<StopSignal>) -> bool {
    match shutdown.wait_for(|signal| *signal != StopSignal::Run).await {
        Ok(signal) => match *signal {
            StopSignal::Stop { announce } => announce,
            StopSignal::Run => true,
        },
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbound::inbound_queue;
    use crate::protocol::{encode_frame, RequestId, READY_PAYLOAD};
    use crate::transport::testing::MemoryWriter;
    use crate::transport::{BoxFuture, Channel, Connector, TransportConfig};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::DuplexStream;

    /// Serves queued channels in order, then refuses.
    struct ScriptedConnector {
        attempts: Arc<AtomicUsize>,
        script: Mutex<Vec<Option<(DuplexStream, Arc<MemoryWriter>)>>>,
    }

    impl Connector for ScriptedConnector {
        fn connect(&self) -> BoxFuture<'_, io::Result<Channel>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let next = if script.is_empty() {
                None
            } else {
                script.remove(0)
            };
            Box::pin(async move {
                let (reader, writer) =
                    next.ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))?;
                Ok(Channel::new(Box::new(reader), writer))
            })
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn spawn_manager(
        script: Vec<Option<(DuplexStream, Arc<MemoryWriter>)>>,
        fast: Duration,
        inbound: InboundSender,
    ) -> (ManagerHandle, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let transport = Transport::new(
            Box::new(ScriptedConnector {
                attempts: attempts.clone(),
                script: Mutex::new(script),
            }),
            TransportConfig {
                join_timeout: Duration::from_millis(200),
                ..TransportConfig::default()
            },
        );
        let policy = RetryPolicy::new(fast, Duration::from_secs(3600), Duration::from_secs(3600));
        let handle = ConnectionManager::spawn(transport, policy, inbound, &Handle::current());
        (handle, attempts)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_eof_triggers_exactly_one_new_attempt() {
        let (ours, theirs) = tokio::io::duplex(1024);
        drop(theirs);
        let writer = Arc::new(MemoryWriter::default());
        let (tx, mut queue) = inbound_queue();

        // Second attempt fails and parks in a one-hour backoff
        let (mut handle, attempts) = spawn_manager(
            vec![Some((ours, writer.clone()))],
            Duration::from_secs(3600),
            tx,
        );

        let mut events = Vec::new();
        wait_until(|| {
            events.extend(queue.drain());
            events.len() >= 2 && attempts.load(Ordering::SeqCst) >= 2
        })
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(matches!(events[0], Inbound::Connected(_)));
        assert!(matches!(events[1], Inbound::Disconnected(_)));
        assert_eq!(handle.status().attempt, 1);
        assert_eq!(handle.state(), ConnectionState::Connecting);

        let announce = encode_frame(RequestId::ANNOUNCE, READY_PAYLOAD).unwrap();
        assert_eq!(writer.bytes(), announce.to_vec());

        // The backoff sleep is cancellable
        assert!(handle.shutdown(Duration::from_secs(1)).await);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    /// Accepts every attempt with a channel whose writes all fail.
    struct BrokenWriteConnector {
        attempts: Arc<AtomicUsize>,
    }

    impl Connector for BrokenWriteConnector {
        fn connect(&self) -> BoxFuture<'_, io::Result<Channel>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let (reader, _peer) = tokio::io::duplex(64);
                let writer = Arc::new(MemoryWriter::default());
                writer.set_fail(true);
                Ok(Channel::new(Box::new(reader), writer))
            })
        }

        fn describe(&self) -> String {
            "broken-write".to_string()
        }
    }

    #[tokio::test]
    async fn test_announce_failure_backs_off() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let transport = Transport::new(
            Box::new(BrokenWriteConnector {
                attempts: attempts.clone(),
            }),
            TransportConfig {
                join_timeout: Duration::from_millis(200),
                ..TransportConfig::default()
            },
        );
        let hour = Duration::from_secs(3600);
        let (tx, mut queue) = inbound_queue();
        let mut handle = ConnectionManager::spawn(
            transport,
            RetryPolicy::new(hour, hour, hour),
            tx,
            &Handle::current(),
        );

        wait_until(|| attempts.load(Ordering::SeqCst) >= 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // One attempt, then parked in the backoff sleep
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(handle.status().attempt, 1);
        assert_eq!(handle.state(), ConnectionState::Connecting);
        assert!(queue.drain().is_empty());

        assert!(handle.shutdown(Duration::from_secs(1)).await);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_without_announce_skips_shutdown_frame() {
        let (ours, _theirs) = tokio::io::duplex(1024);
        let writer = Arc::new(MemoryWriter::default());
        let (tx, mut queue) = inbound_queue();
        let (mut handle, _) =
            spawn_manager(vec![Some((ours, writer.clone()))], Duration::from_millis(1), tx);

        wait_until(|| handle.state() == ConnectionState::Connected).await;
        assert!(handle.shutdown_with(Duration::from_secs(1), false).await);

        let announce = encode_frame(RequestId::ANNOUNCE, READY_PAYLOAD).unwrap();
        assert_eq!(writer.bytes(), announce.to_vec());

        let events = queue.drain();
        assert!(matches!(events.last(), Some(Inbound::Disconnected(_))));
    }

    #[tokio::test]
    async fn test_failed_attempts_accumulate() {
        let (tx, _queue) = inbound_queue();
        let (mut handle, attempts) = spawn_manager(vec![], Duration::from_millis(1), tx);

        wait_until(|| attempts.load(Ordering::SeqCst) >= 5).await;
        assert!(handle.status().attempt >= 4);
        assert!(handle.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_attempt_survives_reconnect_without_new_session() {
        let (ours, _theirs) = tokio::io::duplex(1024);
        let (tx, _queue) = inbound_queue();
        let (mut handle, _) = spawn_manager(
            vec![None, None, Some((ours, Arc::new(MemoryWriter::default())))],
            Duration::from_millis(1),
            tx,
        );

        wait_until(|| handle.state() == ConnectionState::Connected).await;
        assert_eq!(handle.status().attempt, 2);
        assert!(handle.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_new_session_resets_attempt() {
        let (ours, _theirs) = tokio::io::duplex(1024);
        let (tx, _queue) = inbound_queue();
        let (mut handle, _) = spawn_manager(
            vec![None, None, Some((ours, Arc::new(MemoryWriter::default())))],
            Duration::from_millis(1),
            tx,
        );
        handle.begin_new_session();

        wait_until(|| handle.state() == ConnectionState::Connected).await;
        assert_eq!(handle.status().attempt, 0);
        assert!(handle.shutdown(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_shutdown_sends_shutdown_frame() {
        let (ours, _theirs) = tokio::io::duplex(1024);
        let writer = Arc::new(MemoryWriter::default());
        let (tx, mut queue) = inbound_queue();
        let (mut handle, _) =
            spawn_manager(vec![Some((ours, writer.clone()))], Duration::from_millis(1), tx);

        wait_until(|| handle.state() == ConnectionState::Connected).await;
        assert!(handle.shutdown(Duration::from_secs(1)).await);

        let shutdown = encode_frame(RequestId::SHUTDOWN, b"SHUTDOWN").unwrap();
        assert!(writer.bytes().ends_with(&shutdown));

        let events = queue.drain();
        assert!(matches!(events.last(), Some(Inbound::Disconnected(_))));
    }
}
