//! UDP dispatcher: one wire message per datagram
//!
//! Same reactor shape as the socket dispatcher, minus connections: a client
//! sends as soon as its pacing slot comes up, and only waits on the poller
//! when the socket buffer is full.

use super::{DeliveryOutcome, ErrorKind, OutcomeRecorder, ReadyHeap, MAX_POLL_WAIT};
use crate::cancel::CancellationToken;
use crate::timing::{duration_ns, time_ns};
use crate::Result;
use mio::{Events, Poll, Token, Waker};
use rceload_common::SyntheticEvent;
use rceload_protocols::wire;
use rceload_transport::{SendStatus, UdpSender};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAKER_TOKEN: Token = Token(usize::MAX);

#[derive(Debug, Clone)]
pub struct UdpConfig {
    pub target: SocketAddr,
    pub pacing: Duration,
    pub duration: Option<Duration>,
}

impl UdpConfig {
    pub fn new(target: SocketAddr) -> Self {
        Self { target, pacing: Duration::ZERO, duration: None }
    }
}

pub struct UdpDispatcher {
    config: UdpConfig,
    cancel: CancellationToken,
}

struct Pending {
    index: u64,
    message: Vec<u8>,
    started: Instant,
}

struct Client<I> {
    id: usize,
    events: I,
    next_index: u64,
    exhausted: bool,
    socket: Option<UdpSender>,
    /// Message waiting for the socket to become writable again
    blocked: Option<Pending>,
}

impl UdpDispatcher {
    pub fn new(config: UdpConfig) -> Self {
        Self { config, cancel: CancellationToken::new() }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run<I, R>(&self, clients: Vec<(usize, I)>, recorder: &mut R) -> Result<()>
    where
        I: Iterator<Item = SyntheticEvent>,
        R: OutcomeRecorder + ?Sized,
    {
        let mut poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        self.cancel.register_waker(waker);

        let mut clients: Vec<Client<I>> = clients
            .into_iter()
            .map(|(id, events)| Client {
                id,
                events,
                next_index: 0,
                exhausted: false,
                socket: None,
                blocked: None,
            })
            .collect();

        let deadline = self.config.duration.map(|d| Instant::now() + d);
        let mut heap = ReadyHeap::new();
        let mut events = Events::with_capacity(256);
        for idx in 0..clients.len() {
            heap.push(idx, None);
        }

        loop {
            let stopped = self.cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d);
            if stopped {
                for client in &mut clients {
                    if let Some(pending) = client.blocked.take() {
                        recorder.record(DeliveryOutcome::failed(
                            client.id,
                            pending.index,
                            ErrorKind::Cancelled,
                            pending.message.len(),
                        ));
                    }
                }
                break;
            }
            if clients.iter().all(|c| c.exhausted && c.blocked.is_none()) {
                break;
            }

            let now = time_ns();
            for idx in heap.pop_all_ready(now) {
                if let Some(ready_at) = self.send_next(&poll, &mut clients[idx], idx, recorder) {
                    heap.push(idx, ready_at);
                }
            }

            let mut timeout = MAX_POLL_WAIT;
            if !heap.is_empty() {
                timeout = match heap.peek_next_time() {
                    Some(t) => timeout.min(Duration::from_nanos(t.saturating_sub(time_ns()))),
                    None => Duration::ZERO,
                };
            }
            if let Some(d) = deadline {
                timeout = timeout.min(d.saturating_duration_since(Instant::now()));
            }

            if let Err(e) = poll.poll(&mut events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }
            for event in events.iter() {
                let idx = event.token().0;
                if event.token() != WAKER_TOKEN && event.is_writable() {
                    if clients.get(idx).is_some_and(|c| c.blocked.is_some()) {
                        heap.push(idx, None);
                    }
                }
            }
        }

        Ok(())
    }

    /// Send the client's blocked or next message
    ///
    /// Returns when the client should be scheduled again; `None` means it
    /// waits for a writable event or is exhausted.
    fn send_next<I, R>(
        &self,
        poll: &Poll,
        client: &mut Client<I>,
        idx: usize,
        recorder: &mut R,
    ) -> Option<Option<u64>>
    where
        I: Iterator<Item = SyntheticEvent>,
        R: OutcomeRecorder + ?Sized,
    {
        let pending = match client.blocked.take() {
            Some(pending) => pending,
            None => {
                let event = match client.events.next() {
                    Some(event) => event,
                    None => {
                        client.exhausted = true;
                        return None;
                    }
                };
                let index = client.next_index;
                client.next_index += 1;
                Pending { index, message: wire::encode(&event), started: Instant::now() }
            }
        };

        if client.socket.is_none() {
            match UdpSender::connect(self.config.target) {
                Ok(mut socket) => match socket.register(poll.registry(), Token(idx)) {
                    Ok(()) => client.socket = Some(socket),
                    Err(e) => return Some(self.fail(client, &pending, e, recorder)),
                },
                Err(e) => return Some(self.fail(client, &pending, e, recorder)),
            }
        }

        let socket = client.socket.as_ref()?;
        match socket.send(&pending.message) {
            Ok(SendStatus::Sent(_)) => {
                recorder.record(DeliveryOutcome::succeeded(
                    client.id,
                    pending.index,
                    pending.started.elapsed(),
                    pending.message.len(),
                ));
                Some(self.next_slot())
            }
            Ok(SendStatus::WouldBlock) => {
                client.blocked = Some(pending);
                None
            }
            Err(e) => {
                client.socket = None;
                Some(self.fail(client, &pending, e, recorder))
            }
        }
    }

    fn fail<I, R>(
        &self,
        client: &Client<I>,
        pending: &Pending,
        err: rceload_transport::Error,
        recorder: &mut R,
    ) -> Option<u64>
    where
        R: OutcomeRecorder + ?Sized,
    {
        tracing::warn!(
            "Client {} event {}: datagram to {} failed: {}",
            client.id,
            pending.index,
            self.config.target,
            err
        );
        recorder.record(DeliveryOutcome::failed(
            client.id,
            pending.index,
            ErrorKind::ConnectionFailure,
            pending.message.len(),
        ));
        self.next_slot()
    }

    fn next_slot(&self) -> Option<u64> {
        if self.config.pacing.is_zero() {
            None
        } else {
            Some(time_ns().saturating_add(duration_ns(self.config.pacing)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{generate, DistributionSpec, EventCount};
    use std::net::UdpSocket;

    #[test]
    fn test_each_event_is_one_datagram() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        server.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let addr = server.local_addr().unwrap();

        let spec = DistributionSpec::new(3, 10, 0.6).unwrap();
        let sent: Vec<_> = generate(spec, EventCount::Finite(20), Some(1)).unwrap().collect();

        let mut config = UdpConfig::new(addr);
        config.pacing = Duration::from_millis(1);
        let mut outcomes = Vec::new();
        UdpDispatcher::new(config)
            .run(vec![(0, sent.clone().into_iter())], &mut outcomes)
            .unwrap();

        assert_eq!(outcomes.len(), 20);
        assert!(outcomes.iter().all(|o| o.success));

        let mut buf = [0u8; 2048];
        for expected in &sent {
            let n = server.recv(&mut buf).unwrap();
            assert_eq!(&rceload_protocols::decode(&buf[..n]).unwrap(), expected);
        }
    }

    #[test]
    fn test_oversized_message_fails() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();

        // 8-byte header + 8200 features exceeds one datagram
        let spec = DistributionSpec::new(1, 8200, 0.0).unwrap();
        let events = generate(spec, EventCount::Finite(2), Some(2)).unwrap();

        let mut outcomes = Vec::new();
        UdpDispatcher::new(UdpConfig::new(addr)).run(vec![(0, events)], &mut outcomes).unwrap();

        assert_eq!(outcomes.len(), 2);
        for outcome in outcomes {
            assert_eq!(outcome.error_kind, Some(ErrorKind::ConnectionFailure));
        }
    }

    #[test]
    fn test_unpaced_run_stops_on_cancel_or_duration() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        let spec = DistributionSpec::new(2, 4, 0.0).unwrap();

        let mut config = UdpConfig::new(addr);
        config.duration = Some(Duration::from_millis(200));
        let start = Instant::now();
        let mut outcomes = Vec::new();
        let unbounded = generate(spec, EventCount::Unbounded, Some(4)).unwrap();
        UdpDispatcher::new(config).run(vec![(0, unbounded)], &mut outcomes).unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(outcomes.iter().any(|o| o.success));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });
        let start = Instant::now();
        let mut outcomes = Vec::new();
        let unbounded = generate(spec, EventCount::Unbounded, Some(5)).unwrap();
        UdpDispatcher::new(UdpConfig::new(addr))
            .with_cancellation(cancel)
            .run(vec![(0, unbounded)], &mut outcomes)
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(outcomes.iter().any(|o| o.success));
    }
}
