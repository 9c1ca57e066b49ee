//! TCP socket dispatcher
//!
//! One `SocketDispatcher::run` call is a single-threaded reactor: every
//! logical client it owns gets its own non-blocking connection registered
//! with one `mio::Poll`. A client has at most one event in flight; pacing
//! between a client's events is a send time in a `ReadyHeap`, never a sleep,
//! so an idle client does not hold up the others.
//!
//! ```text
//!            ┌──────────── ReadyHeap (next send time per client) ──────────┐
//!            ▼                                                              │
//! next event ─► encode ─► WriteBuffer ─► writable? flush ─► written ──┬──► outcome
//!                                                                     │      ▲
//!                                           acknowledge ─► read 127 ──┘──────┘
//! ```
//!
//! A connection failure fails the in-flight event with
//! `ErrorKind::ConnectionFailure` and drops the connection; the client's next
//! event opens a fresh one.

use super::{DeliveryOutcome, ErrorKind, OutcomeRecorder, ReadyHeap, MAX_POLL_WAIT};
use crate::cancel::CancellationToken;
use crate::timing::{duration_ns, time_ns};
use crate::Result;
use mio::{Events, Interest, Poll, Token, Waker};
use rceload_common::SyntheticEvent;
use rceload_protocols::wire;
use rceload_transport::TcpSender;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Acknowledgement byte an ingestion service sends per accepted message
pub const ACK_SUCCESS: u8 = 127;

const WAKER_TOKEN: Token = Token(usize::MAX);

#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub target: SocketAddr,
    /// Delay between the end of one event and the start of the next, per client
    pub pacing: Duration,
    /// Wait for `ACK_SUCCESS` after every message
    pub acknowledge: bool,
    /// Longest an event may stay in flight, connect included
    pub io_timeout: Duration,
    /// Wall-clock cap on the run
    pub duration: Option<Duration>,
}

impl SocketConfig {
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            pacing: Duration::ZERO,
            acknowledge: false,
            io_timeout: Duration::from_secs(10),
            duration: None,
        }
    }
}

pub struct SocketDispatcher {
    config: SocketConfig,
    cancel: CancellationToken,
}

impl SocketDispatcher {
    pub fn new(config: SocketConfig) -> Self {
        Self { config, cancel: CancellationToken::new() }
    }

    /// Stop the run when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// Dispatch every client's events until all are exhausted, the configured
    /// duration elapses, or the run is cancelled
    ///
    /// `clients` pairs a client id (used in outcomes and logs) with its event
    /// stream. Events of one client are sent in stream order. An `Err` is
    /// only returned when the poller itself fails.
    pub fn run<I, R>(&self, clients: Vec<(usize, I)>, recorder: &mut R) -> Result<()>
    where
        I: Iterator<Item = SyntheticEvent>,
        R: OutcomeRecorder + ?Sized,
    {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        self.cancel.register_waker(waker);

        let clients = clients
            .into_iter()
            .map(|(id, events)| Client {
                id,
                events,
                next_index: 0,
                exhausted: false,
                conn: None,
                in_flight: None,
                recv_buf: Vec::new(),
            })
            .collect();

        let mut reactor = Reactor {
            config: &self.config,
            poll,
            clients,
            heap: ReadyHeap::new(),
            encode_buf: Vec::new(),
            recorder,
        };
        reactor.run(&self.cancel)
    }
}

/// Dispatch one logical client's events to `target`
pub fn dispatch<I>(events: I, target: SocketAddr, pacing: Duration) -> Result<Vec<DeliveryOutcome>>
where
    I: IntoIterator<Item = SyntheticEvent>,
{
    let mut config = SocketConfig::new(target);
    config.pacing = pacing;

    let mut outcomes = Vec::new();
    SocketDispatcher::new(config).run(vec![(0, events.into_iter())], &mut outcomes)?;
    Ok(outcomes)
}

struct InFlight {
    index: u64,
    /// Write offset at which the whole message has left the buffer
    end_offset: u64,
    bytes: usize,
    started: Instant,
    written: bool,
}

struct Client<I> {
    id: usize,
    events: I,
    next_index: u64,
    exhausted: bool,
    conn: Option<TcpSender>,
    in_flight: Option<InFlight>,
    recv_buf: Vec<u8>,
}

impl<I> Client<I> {
    fn is_done(&self) -> bool {
        self.exhausted && self.in_flight.is_none()
    }
}

struct Reactor<'a, I, R: ?Sized> {
    config: &'a SocketConfig,
    poll: Poll,
    clients: Vec<Client<I>>,
    heap: ReadyHeap,
    encode_buf: Vec<u8>,
    recorder: &'a mut R,
}

impl<I, R> Reactor<'_, I, R>
where
    I: Iterator<Item = SyntheticEvent>,
    R: OutcomeRecorder + ?Sized,
{
    fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        let deadline = self.config.duration.map(|d| Instant::now() + d);
        let mut events = Events::with_capacity(1024);

        for idx in 0..self.clients.len() {
            self.heap.push(idx, None);
        }

        loop {
            if cancel.is_cancelled() {
                tracing::info!("Socket dispatch to {} cancelled", self.config.target);
                self.abandon_in_flight();
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::info!("Socket dispatch to {} reached its duration", self.config.target);
                self.abandon_in_flight();
                break;
            }
            if self.clients.iter().all(Client::is_done) {
                break;
            }

            let now = time_ns();
            for idx in self.heap.pop_all_ready(now) {
                self.start_next(idx);
            }
            self.expire_stalled();

            let timeout = self.poll_timeout(deadline);
            if let Err(e) = self.poll.poll(&mut events, Some(timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                if event.token() == WAKER_TOKEN {
                    continue;
                }
                let idx = event.token().0;
                let writable = event.is_writable() || event.is_error() || event.is_write_closed();
                let readable = event.is_readable() || event.is_read_closed();
                self.handle_event(idx, writable, readable);
            }
        }

        for client in &mut self.clients {
            if let Some(conn) = client.conn.take() {
                conn.close(self.poll.registry());
            }
        }
        Ok(())
    }

    fn poll_timeout(&self, deadline: Option<Instant>) -> Duration {
        let mut timeout = MAX_POLL_WAIT;
        if !self.heap.is_empty() {
            timeout = match self.heap.peek_next_time() {
                Some(ready_at) => timeout.min(Duration::from_nanos(ready_at.saturating_sub(time_ns()))),
                None => Duration::ZERO,
            };
        }
        if let Some(deadline) = deadline {
            timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
        }
        timeout
    }

    fn start_next(&mut self, idx: usize) {
        let client = &mut self.clients[idx];
        if client.exhausted || client.in_flight.is_some() {
            return;
        }

        let Some(event) = client.events.next() else {
            client.exhausted = true;
            if let Some(conn) = client.conn.take() {
                conn.close(self.poll.registry());
            }
            tracing::debug!("Client {} sent all {} events", client.id, client.next_index);
            return;
        };

        let index = client.next_index;
        client.next_index += 1;
        self.encode_buf.clear();
        wire::encode_into(&event, &mut self.encode_buf);
        let bytes = self.encode_buf.len();

        if client.conn.is_none() {
            let interest = Interest::READABLE;
            match TcpSender::connect(self.poll.registry(), Token(idx), self.config.target, interest) {
                Ok(conn) => client.conn = Some(conn),
                Err(e) => {
                    let client_id = client.id;
                    tracing::warn!(
                        "Client {} event {}: connect to {} failed: {}",
                        client_id,
                        index,
                        self.config.target,
                        e
                    );
                    self.recorder.record(DeliveryOutcome::failed(
                        client_id,
                        index,
                        ErrorKind::ConnectionFailure,
                        bytes,
                    ));
                    self.schedule(idx);
                    return;
                }
            }
        }

        if let Some(conn) = client.conn.as_mut() {
            conn.queue(&self.encode_buf);
            client.in_flight = Some(InFlight {
                index,
                end_offset: conn.queued_total(),
                bytes,
                started: Instant::now(),
                written: false,
            });
        }
        self.pump(idx);
    }

    fn handle_event(&mut self, idx: usize, writable: bool, readable: bool) {
        if writable {
            let Some(conn) = self.clients.get_mut(idx).and_then(|c| c.conn.as_mut()) else {
                return;
            };
            match conn.on_writable() {
                Ok(true) => tracing::debug!("Client {} connected to {}", idx, conn.target()),
                Ok(false) => {}
                Err(e) => {
                    self.fail_connection(idx, e);
                    return;
                }
            }
            self.pump(idx);
        }

        if readable {
            let Some(client) = self.clients.get_mut(idx) else {
                return;
            };
            let Some(conn) = client.conn.as_mut() else {
                return;
            };
            match conn.read_available(&mut client.recv_buf) {
                Ok(status) => {
                    self.check_progress(idx);
                    if !self.config.acknowledge {
                        self.clients[idx].recv_buf.clear();
                    }
                    if status.eof {
                        self.fail_connection(idx, "connection closed by peer");
                    }
                }
                Err(e) => self.fail_connection(idx, e),
            }
        }
    }

    /// Flush queued bytes and settle the in-flight event if it is done
    fn pump(&mut self, idx: usize) {
        let Some(conn) = self.clients[idx].conn.as_mut() else {
            return;
        };
        if let Err(e) = conn.flush() {
            self.fail_connection(idx, e);
            return;
        }
        self.check_progress(idx);
    }

    fn check_progress(&mut self, idx: usize) {
        let acknowledge = self.config.acknowledge;
        let client = &mut self.clients[idx];
        let (Some(conn), Some(flight)) = (client.conn.as_ref(), client.in_flight.as_mut()) else {
            return;
        };

        if !flight.written && conn.written_total() >= flight.end_offset {
            flight.written = true;
            if !acknowledge {
                self.finish(idx, None);
                return;
            }
        }

        if acknowledge && flight.written && !client.recv_buf.is_empty() {
            let ack = client.recv_buf.remove(0);
            if ack == ACK_SUCCESS {
                self.finish(idx, None);
            } else {
                tracing::warn!(
                    "Client {} event {}: unexpected acknowledgement {} from {}",
                    client.id,
                    flight.index,
                    ack,
                    self.config.target
                );
                self.finish(idx, Some(ErrorKind::ResponseMismatch));
            }
        }
    }

    /// Record the in-flight event's outcome and schedule the client's next send
    fn finish(&mut self, idx: usize, failure: Option<ErrorKind>) {
        let client = &mut self.clients[idx];
        let Some(flight) = client.in_flight.take() else {
            return;
        };

        let outcome = match failure {
            None => DeliveryOutcome::succeeded(
                client.id,
                flight.index,
                flight.started.elapsed(),
                flight.bytes,
            ),
            Some(kind) => DeliveryOutcome::failed(client.id, flight.index, kind, flight.bytes),
        };
        self.recorder.record(outcome);
        self.schedule(idx);
    }

    fn schedule(&mut self, idx: usize) {
        let pacing = self.config.pacing;
        let ready_at = if pacing.is_zero() {
            None
        } else {
            Some(time_ns().saturating_add(duration_ns(pacing)))
        };
        self.heap.push(idx, ready_at);
    }

    fn fail_connection(&mut self, idx: usize, reason: impl fmt::Display) {
        let client = &mut self.clients[idx];
        if let Some(conn) = client.conn.take() {
            conn.close(self.poll.registry());
        }
        client.recv_buf.clear();

        match client.in_flight.as_ref() {
            Some(flight) => {
                tracing::warn!(
                    "Client {} event {}: delivery to {} failed: {}",
                    client.id,
                    flight.index,
                    self.config.target,
                    reason
                );
                self.finish(idx, Some(ErrorKind::ConnectionFailure));
            }
            None => tracing::debug!("Client {} dropped idle connection: {}", client.id, reason),
        }
    }

    fn expire_stalled(&mut self) {
        let timeout = self.config.io_timeout;
        for idx in 0..self.clients.len() {
            let stalled = self.clients[idx]
                .in_flight
                .as_ref()
                .is_some_and(|flight| flight.started.elapsed() > timeout);
            if stalled {
                self.fail_connection(idx, format_args!("no progress within {timeout:?}"));
            }
        }
    }

    fn abandon_in_flight(&mut self) {
        for client in &mut self.clients {
            if let Some(flight) = client.in_flight.take() {
                self.recorder.record(DeliveryOutcome::failed(
                    client.id,
                    flight.index,
                    ErrorKind::Cancelled,
                    flight.bytes,
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{generate, DistributionSpec, EventCount};
    use rceload_protocols::WireDecoder;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn events(count: u64, seed: u64) -> impl Iterator<Item = SyntheticEvent> {
        let spec = DistributionSpec::new(3, 10, 0.6).unwrap();
        generate(spec, EventCount::Finite(count), Some(seed)).unwrap()
    }

    /// Read one connection to EOF and decode everything on it
    fn drain(mut socket: TcpStream) -> Vec<SyntheticEvent> {
        let mut decoder = WireDecoder::new();
        let mut buf = [0u8; 4096];
        let mut decoded = Vec::new();
        loop {
            let n = socket.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            decoder.extend(&buf[..n]);
            decoded.extend(decoder.drain_events().unwrap());
        }
        assert_eq!(decoder.pending_bytes(), 0);
        decoded
    }

    /// Decode messages and answer each with `reply`
    fn acknowledge(mut socket: TcpStream, reply: u8) {
        let mut decoder = WireDecoder::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match socket.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            decoder.extend(&buf[..n]);
            for _ in decoder.drain_events().unwrap() {
                if socket.write_all(&[reply]).is_err() {
                    return;
                }
            }
        }
    }

    #[test]
    fn test_single_client_delivers_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || drain(listener.accept().unwrap().0));

        let sent: Vec<_> = events(200, 1).collect();
        let outcomes = dispatch(sent.clone(), addr, Duration::ZERO).unwrap();

        assert_eq!(outcomes.len(), 200);
        assert!(outcomes.iter().all(|o| o.success));
        let indices: Vec<u64> = outcomes.iter().map(|o| o.event_index).collect();
        assert_eq!(indices, (0..200).collect::<Vec<_>>());
        assert_eq!(server.join().unwrap(), sent);
    }

    #[test]
    fn test_many_clients_share_one_poller() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let socket = listener.accept().unwrap().0;
                    thread::spawn(move || drain(socket).len())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum::<usize>()
        });

        let clients: Vec<_> = (0..4).map(|id| (id, events(50, id as u64))).collect();
        let mut outcomes = Vec::new();
        SocketDispatcher::new(SocketConfig::new(addr)).run(clients, &mut outcomes).unwrap();

        assert_eq!(outcomes.len(), 200);
        assert!(outcomes.iter().all(|o| o.success));
        for id in 0..4 {
            assert_eq!(outcomes.iter().filter(|o| o.client_id == id).count(), 50);
        }
        assert_eq!(server.join().unwrap(), 200);
    }

    #[test]
    fn test_acknowledged_delivery() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || acknowledge(listener.accept().unwrap().0, ACK_SUCCESS));

        let mut config = SocketConfig::new(addr);
        config.acknowledge = true;
        let mut outcomes = Vec::new();
        SocketDispatcher::new(config).run(vec![(0, events(20, 2))], &mut outcomes).unwrap();

        assert_eq!(outcomes.len(), 20);
        assert!(outcomes.iter().all(|o| o.success && o.latency.is_some()));
    }

    #[test]
    fn test_wrong_acknowledgement_is_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || acknowledge(listener.accept().unwrap().0, 0));

        let mut config = SocketConfig::new(addr);
        config.acknowledge = true;
        let mut outcomes = Vec::new();
        SocketDispatcher::new(config).run(vec![(0, events(5, 3))], &mut outcomes).unwrap();

        assert_eq!(outcomes.len(), 5);
        for outcome in outcomes {
            assert!(!outcome.success);
            assert_eq!(outcome.error_kind, Some(ErrorKind::ResponseMismatch));
        }
    }

    #[test]
    fn test_refused_connection_fails_each_event() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let outcomes = dispatch(events(5, 4), addr, Duration::ZERO).unwrap();

        assert_eq!(outcomes.len(), 5);
        for outcome in outcomes {
            assert_eq!(outcome.error_kind, Some(ErrorKind::ConnectionFailure));
        }
    }

    #[test]
    fn test_pacing_spaces_events() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || drain(listener.accept().unwrap().0));

        let start = Instant::now();
        let outcomes = dispatch(events(5, 5), addr, Duration::from_millis(20)).unwrap();

        assert_eq!(outcomes.len(), 5);
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn test_cancellation_unblocks_run() {
        // Accepts but never acknowledges, so the first event stays in flight
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(10));
            drop(socket);
        });

        let mut config = SocketConfig::new(addr);
        config.acknowledge = true;
        config.io_timeout = Duration::from_secs(60);
        let cancel = CancellationToken::new();
        let dispatcher = SocketDispatcher::new(config).with_cancellation(cancel.clone());

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            cancel.cancel();
        });

        let spec = DistributionSpec::new(3, 10, 0.6).unwrap();
        let unbounded = generate(spec, EventCount::Unbounded, Some(6)).unwrap();
        let start = Instant::now();
        let mut outcomes = Vec::new();
        dispatcher.run(vec![(0, unbounded)], &mut outcomes).unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(outcomes.last().and_then(|o| o.error_kind), Some(ErrorKind::Cancelled));
        canceller.join().unwrap();
    }

    #[test]
    fn test_duration_ends_unbounded_run() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || drain(listener.accept().unwrap().0));

        let mut config = SocketConfig::new(addr);
        config.pacing = Duration::from_millis(5);
        config.duration = Some(Duration::from_millis(150));

        let spec = DistributionSpec::new(2, 4, 0.0).unwrap();
        let unbounded = generate(spec, EventCount::Unbounded, Some(7)).unwrap();
        let start = Instant::now();
        let mut outcomes = Vec::new();
        SocketDispatcher::new(config).run(vec![(0, unbounded)], &mut outcomes).unwrap();

        assert!(start.elapsed() >= Duration::from_millis(150));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!outcomes.is_empty());
    }

    /// Read and discard until the peer closes
    fn discard(mut socket: TcpStream) {
        let mut buf = [0u8; 64 * 1024];
        while matches!(socket.read(&mut buf), Ok(n) if n > 0) {}
    }

    fn unpaced_unbounded() -> impl Iterator<Item = SyntheticEvent> {
        let spec = DistributionSpec::new(2, 4, 0.0).unwrap();
        generate(spec, EventCount::Unbounded, Some(3)).unwrap()
    }

    #[test]
    fn test_cancellation_ends_unpaced_run() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || discard(listener.accept().unwrap().0));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });

        let start = Instant::now();
        let mut outcomes = Vec::new();
        SocketDispatcher::new(SocketConfig::new(addr))
            .with_cancellation(cancel)
            .run(vec![(0, unpaced_unbounded())], &mut outcomes)
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(outcomes.iter().any(|o| o.success));
    }

    #[test]
    fn test_duration_ends_unpaced_run() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || discard(listener.accept().unwrap().0));

        let mut config = SocketConfig::new(addr);
        config.duration = Some(Duration::from_millis(200));

        let start = Instant::now();
        let mut outcomes = Vec::new();
        SocketDispatcher::new(config).run(vec![(0, unpaced_unbounded())], &mut outcomes).unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(outcomes.iter().any(|o| o.success));
    }
}
