//! Transaction manager.
//!
//! A [`Channel`] owns the secure proxy connection and the
//! [`TransactionTable`]. Callers open a [`Transaction`], stamp their request
//! with its sequence number, and block in [`Channel::send_and_wait`] until the
//! matching response arrives or the deadline passes.
//!
//! # Concurrency
//!
//! Any number of threads may hold transactions at once. Sequence allocation
//! and routing go through the table mutex; reading the receive thread goes
//! through a second lock so exactly one waiter drains the proxy at a time.
//! Whoever drains a frame routes it into the mailbox of the transaction that
//! owns it, so a thread may end up delivering another thread's response.
//!
//! # Closing
//!
//! [`Transaction`] releases its sequence number when dropped, so every exit
//! path (success, error, timeout) closes it.

use std::{
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tisci_proto::{
    DkekResponse, MessageFlags, MessageHeader, MessageType, Request, VersionResponse, WireMessage,
    decode, encode,
};
use tracing::{debug, error, warn};
use zeroize::Zeroizing;

use crate::{
    config::ChannelConfig,
    env::Environment,
    error::ProtocolError,
    transaction::{Disposition, TransactionId, TransactionState, TransactionTable},
    transport::{SecureProxy, TransportError},
};

/// Request/response channel to the system controller.
pub struct Channel<P, E> {
    proxy: P,
    env: E,
    config: ChannelConfig,
    table: Mutex<TransactionTable>,
    rx_lock: Mutex<()>,
    init_lock: Mutex<()>,
    ready: AtomicBool,
}

impl<P: SecureProxy, E: Environment> Channel<P, E> {
    /// Create a channel. The proxy is not touched until [`Channel::init`].
    pub fn new(proxy: P, env: E, config: ChannelConfig) -> Self {
        let table = TransactionTable::new(config.initial_seq);
        Self {
            proxy,
            env,
            config,
            table: Mutex::new(table),
            rx_lock: Mutex::new(()),
            init_lock: Mutex::new(()),
            ready: AtomicBool::new(false),
        }
    }

    /// Initialize the secure proxy.
    ///
    /// Idempotent: only the first successful call reaches the proxy. Must not
    /// race with in-flight traffic.
    pub fn init(&self) -> Result<(), TransportError> {
        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }
        self.proxy.init()?;
        self.ready.store(true, Ordering::Release);
        debug!(tx = %self.config.tx_thread, rx = %self.config.rx_thread, "secure proxy initialized");
        Ok(())
    }

    /// Whether [`Channel::init`] has completed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Channel configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Underlying proxy.
    pub fn proxy(&self) -> &P {
        &self.proxy
    }

    /// Time source.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Number of open transactions.
    pub fn in_flight(&self) -> usize {
        self.table().live_count()
    }

    /// Open a transaction whose response must carry `message_type`.
    pub fn open(
        &self,
        message_type: MessageType,
        flags: MessageFlags,
    ) -> Result<Transaction<'_, P, E>, ProtocolError> {
        let id = self.table().allocate(message_type, flags)?;
        Ok(Transaction { channel: self, id, message_type, flags })
    }

    /// Send a fire-and-forget request and close the transaction.
    pub fn send_only(
        &self,
        transaction: Transaction<'_, P, E>,
        request: &[u8],
    ) -> Result<(), ProtocolError> {
        if transaction.flags.expects_response() {
            return Err(ProtocolError::ResponseExpected { seq: transaction.seq() });
        }
        self.send_request(&transaction, request)
    }

    /// Send `request` and block until its response arrives.
    ///
    /// Frames for other transactions that show up meanwhile are routed to
    /// their owners or dropped. On timeout the transaction is marked timed
    /// out and any response that arrives for it later is discarded. A
    /// `timeout` too large to add to the current instant waits without a
    /// deadline.
    ///
    /// The returned frame has passed the integrity check and carries a
    /// generic ACK.
    pub fn send_and_wait(
        &self,
        transaction: &Transaction<'_, P, E>,
        request: &[u8],
        timeout: Duration,
    ) -> Result<Zeroizing<Vec<u8>>, ProtocolError> {
        if !transaction.flags.expects_response() {
            return Err(ProtocolError::NoResponseExpected { seq: transaction.seq() });
        }
        self.send_request(transaction, request)?;

        let id = transaction.id;
        let start = self.env.now();
        let deadline = start.checked_add(timeout);
        if let Some(deadline) = deadline {
            self.table().arm(id, deadline);
        }

        loop {
            if let Some(frame) = self.table().take(id) {
                return self.accept(transaction, frame);
            }

            let now = self.env.now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                self.table().expire(id);
                warn!(seq = id.seq, message_type = %transaction.message_type, "transaction timed out");
                return Err(ProtocolError::Timeout {
                    seq: id.seq,
                    message_type: transaction.message_type,
                    waited: now.saturating_duration_since(start),
                });
            }

            let poll = deadline.map_or(self.config.poll_interval, |deadline| {
                deadline.saturating_duration_since(now).min(self.config.poll_interval)
            });
            self.pump(id, poll)?;
        }
    }

    /// Stamp, encode, send and decode a typed request.
    ///
    /// The response must echo the request's type code.
    pub fn transact<R: Request>(
        &self,
        mut request: R,
        flags: MessageFlags,
    ) -> Result<R::Response, ProtocolError> {
        let transaction = self.open(R::MESSAGE_TYPE, flags)?;
        transaction.stamp(&mut request);
        let bytes = encode(&request, self.config.integrity);

        let frame = self.send_and_wait(&transaction, &bytes, self.config.timeout)?;
        Ok(decode::<R::Response>(&frame, self.config.integrity)?)
    }

    fn send_request(
        &self,
        transaction: &Transaction<'_, P, E>,
        request: &[u8],
    ) -> Result<(), ProtocolError> {
        let header = MessageHeader::peek(request)?;
        if header.seq() != transaction.seq()
            || header.message_type_raw() != transaction.message_type.to_u16()
        {
            return Err(ProtocolError::RequestMismatch {
                expected_seq: transaction.seq(),
                actual_seq: header.seq(),
                actual_type: header.message_type_raw(),
            });
        }

        if !self.is_ready() {
            return Err(TransportError::NotInitialized.into());
        }
        let max = self.proxy.max_message_size();
        if request.len() > max {
            return Err(TransportError::MessageTooLarge { len: request.len(), max }.into());
        }

        self.proxy.send(self.config.tx_thread, request)?;
        debug!(seq = header.seq(), message_type = %transaction.message_type, len = request.len(), "request sent");
        Ok(())
    }

    /// Drain at most one frame from the receive thread and route it.
    fn pump(&self, waiting: TransactionId, poll: Duration) -> Result<(), ProtocolError> {
        let _rx = self.rx_lock.lock().unwrap_or_else(PoisonError::into_inner);

        // Another waiter may have delivered our frame while we queued for the lock
        if self.table().has_frame(waiting) {
            return Ok(());
        }

        let Some(bytes) = self.proxy.receive(self.config.rx_thread, poll)? else {
            return Ok(());
        };
        let frame = Zeroizing::new(bytes);

        let header = match MessageHeader::peek(&frame) {
            Ok(header) => header,
            Err(err) => {
                warn!(len = frame.len(), %err, "discarding malformed frame");
                return Ok(());
            },
        };

        match self.table().route(&header, frame) {
            Disposition::Queued(id) => {
                debug!(seq = id.seq, generation = id.generation, "response matched");
            },
            Disposition::Late { seq } => {
                warn!(seq, "discarding late response for timed out transaction");
            },
            Disposition::Duplicate(id) => {
                warn!(seq = id.seq, "discarding duplicate response");
            },
            Disposition::Unclaimed { seq, message_type } => {
                warn!(seq, message_type, "sequence mismatch: no transaction claims frame");
            },
        }
        Ok(())
    }

    fn accept(
        &self,
        transaction: &Transaction<'_, P, E>,
        frame: Zeroizing<Vec<u8>>,
    ) -> Result<Zeroizing<Vec<u8>>, ProtocolError> {
        let seq = transaction.seq();

        // The checksum covers the response only, not whatever follows it in
        // the proxy buffer. A short frame (header-only NACK) is checked whole.
        let sealed = &frame[..frame.len().min(response_size(transaction.message_type))];
        if let Err(err) = self.config.integrity.verify(sealed) {
            error!(seq, message_type = %transaction.message_type, %err, "response failed integrity check");
            return Err(err.into());
        }

        let header = MessageHeader::peek(&frame)?;
        if !header.flags().is_ack() {
            error!(seq, message_type = %transaction.message_type, "firmware NACK");
            return Err(ProtocolError::Nack { seq, message_type: transaction.message_type });
        }

        Ok(frame)
    }

    fn table(&self) -> MutexGuard<'_, TransactionTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Encoded size of the response to a request of `message_type`.
fn response_size(message_type: MessageType) -> usize {
    match message_type {
        MessageType::Version => VersionResponse::SIZE,
        MessageType::Sa2ulGetDkek => DkekResponse::SIZE,
    }
}

/// An open transaction. Dropping it releases its sequence number.
pub struct Transaction<'c, P: SecureProxy, E: Environment> {
    channel: &'c Channel<P, E>,
    id: TransactionId,
    message_type: MessageType,
    flags: MessageFlags,
}

impl<P: SecureProxy, E: Environment> Transaction<'_, P, E> {
    /// Sequence number to stamp into the request.
    pub fn seq(&self) -> u8 {
        self.id.seq
    }

    /// Identity including generation.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Type the response must carry.
    pub fn expected_type(&self) -> MessageType {
        self.message_type
    }

    /// Acknowledgement flags of the request.
    pub fn flags(&self) -> MessageFlags {
        self.flags
    }

    /// Current state.
    pub fn state(&self) -> Option<TransactionState> {
        self.channel.table().state(self.id)
    }

    /// Write this transaction's type, host, sequence and flags into a
    /// request header.
    pub fn stamp<M: WireMessage>(&self, message: &mut M) {
        let header = message.header_mut();
        header.set_message_type(self.message_type);
        header.set_host(self.channel.config.host_id);
        header.set_seq(self.id.seq);
        header.set_flags(self.flags);
    }

    /// Release the sequence number now.
    pub fn close(self) {}
}

impl<P: SecureProxy, E: Environment> Drop for Transaction<'_, P, E> {
    fn drop(&mut self) {
        self.channel.table().release(self.id);
    }
}

impl<P: SecureProxy, E: Environment> std::fmt::Debug for Transaction<'_, P, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("message_type", &self.message_type)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Instant,
    };

    use tisci_proto::{IntegrityMode, VersionRequest, VersionResponse};

    use super::*;
    use crate::transport::ProxyThread;

    /// Clock that advances by the poll interval on every empty receive.
    struct StepClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl Environment for StepClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }
    }

    struct QueueProxy {
        clock: Arc<StepClock>,
        inbound: Mutex<VecDeque<Vec<u8>>>,
        sent: Mutex<Vec<Vec<u8>>>,
        inits: AtomicUsize,
    }

    impl QueueProxy {
        fn new(clock: Arc<StepClock>) -> Self {
            Self {
                clock,
                inbound: Mutex::new(VecDeque::new()),
                sent: Mutex::new(Vec::new()),
                inits: AtomicUsize::new(0),
            }
        }

        fn push(&self, frame: Vec<u8>) {
            self.inbound.lock().unwrap().push_back(frame);
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl SecureProxy for QueueProxy {
        fn init(&self) -> Result<(), TransportError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn send(&self, _thread: ProxyThread, message: &[u8]) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(message.to_vec());
            Ok(())
        }

        fn receive(
            &self,
            _thread: ProxyThread,
            timeout: Duration,
        ) -> Result<Option<Vec<u8>>, TransportError> {
            let next = self.inbound.lock().unwrap().pop_front();
            if next.is_none() {
                *self.clock.offset.lock().unwrap() += timeout;
            }
            Ok(next)
        }
    }

    type TestChannel = Channel<QueueProxy, Arc<StepClock>>;

    fn channel(config: ChannelConfig) -> TestChannel {
        let clock = Arc::new(StepClock { base: Instant::now(), offset: Mutex::new(Duration::ZERO) });
        let channel = Channel::new(QueueProxy::new(clock.clone()), clock, config);
        channel.init().unwrap();
        channel
    }

    fn version_reply(seq: u8, ack: bool, mode: IntegrityMode) -> Vec<u8> {
        let request = MessageHeader::new(MessageType::Version, 11, seq, MessageFlags::ACK_ON_PROCESSED);
        let response = VersionResponse::new(request.reply(ack), "SYSFW", 1, (3, 1), 0, 0);
        encode(&response, mode)
    }

    #[test]
    fn init_is_idempotent() {
        let channel = channel(ChannelConfig::default());
        channel.init().unwrap();
        assert_eq!(channel.proxy().inits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn send_before_init_rejected() {
        let clock = Arc::new(StepClock { base: Instant::now(), offset: Mutex::new(Duration::ZERO) });
        let channel = Channel::new(QueueProxy::new(clock.clone()), clock, ChannelConfig::default());

        let result = channel.transact(VersionRequest::new(), MessageFlags::ACK_ON_PROCESSED);
        assert!(matches!(result, Err(ProtocolError::Transport(TransportError::NotInitialized))));
        assert_eq!(channel.in_flight(), 0);
    }

    #[test]
    fn transact_matches_response() {
        let channel = channel(ChannelConfig::default());
        channel.proxy().push(version_reply(0, true, IntegrityMode::Standard));

        let response = channel.transact(VersionRequest::new(), MessageFlags::ACK_ON_PROCESSED).unwrap();
        assert_eq!(response.abi_major(), 3);
        assert_eq!(channel.in_flight(), 0);

        let sent = channel.proxy().sent.lock().unwrap();
        let header = MessageHeader::peek(&sent[0]).unwrap();
        assert_eq!(header.host(), 11);
        assert_eq!(header.flags(), MessageFlags::ACK_ON_PROCESSED);
    }

    #[test]
    fn stray_frame_skipped() {
        let channel = channel(ChannelConfig::default());
        channel.proxy().push(version_reply(42, true, IntegrityMode::Standard));
        channel.proxy().push(version_reply(0, true, IntegrityMode::Standard));

        let response = channel.transact(VersionRequest::new(), MessageFlags::ACK_ON_PROCESSED);
        assert_eq!(response.unwrap().header().seq(), 0);
    }

    #[test]
    fn nack_surfaced() {
        let channel = channel(ChannelConfig::default());
        channel.proxy().push(version_reply(0, false, IntegrityMode::Standard));

        let err = channel.transact(VersionRequest::new(), MessageFlags::ACK_ON_PROCESSED).unwrap_err();
        assert_eq!(err, ProtocolError::Nack { seq: 0, message_type: MessageType::Version });
    }

    #[test]
    fn corrupted_response_rejected_in_high_security_mode() {
        let config = ChannelConfig { integrity: IntegrityMode::HighSecurity, ..ChannelConfig::default() };
        let channel = channel(config);
        let mut reply = version_reply(0, true, IntegrityMode::HighSecurity);
        reply[20] ^= 0x40;
        channel.proxy().push(reply);

        let err = channel.transact(VersionRequest::new(), MessageFlags::ACK_ON_PROCESSED).unwrap_err();
        assert!(err.is_integrity_failure());
        assert_eq!(channel.in_flight(), 0);
    }

    #[test]
    fn trailing_bytes_after_sealed_response_ignored() {
        let config = ChannelConfig { integrity: IntegrityMode::HighSecurity, ..ChannelConfig::default() };
        let channel = channel(config);
        let mut reply = version_reply(0, true, IntegrityMode::HighSecurity);
        reply.extend_from_slice(&[0x55, 0xaa]);
        channel.proxy().push(reply);

        let response = channel.transact(VersionRequest::new(), MessageFlags::ACK_ON_PROCESSED).unwrap();
        assert_eq!(response.abi_major(), 3);
    }

    #[test]
    fn header_only_nack_checked_whole() {
        let config = ChannelConfig { integrity: IntegrityMode::HighSecurity, ..ChannelConfig::default() };
        let channel = channel(config);
        let mut nack = version_reply(0, false, IntegrityMode::Standard);
        nack.truncate(MessageHeader::SIZE);
        IntegrityMode::HighSecurity.seal(&mut nack);
        channel.proxy().push(nack);

        let err = channel.transact(VersionRequest::new(), MessageFlags::ACK_ON_PROCESSED).unwrap_err();
        assert_eq!(err, ProtocolError::Nack { seq: 0, message_type: MessageType::Version });
    }

    #[test]
    fn unbounded_timeout_waits_without_deadline() {
        let channel = channel(ChannelConfig::default());
        let txn = channel.open(MessageType::Version, MessageFlags::ACK_ON_PROCESSED).unwrap();
        let mut request = VersionRequest::new();
        txn.stamp(&mut request);
        let bytes = encode(&request, IntegrityMode::Standard);
        channel.proxy().push(version_reply(0, true, IntegrityMode::Standard));

        let frame = channel.send_and_wait(&txn, &bytes, Duration::MAX).unwrap();
        assert_eq!(MessageHeader::peek(&frame).unwrap().seq(), 0);
        assert_eq!(channel.table().record(txn.id()).map(|record| record.deadline), Some(None));
    }

    #[test]
    fn timeout_frees_sequence() {
        let channel = channel(ChannelConfig::default());

        let err = channel.transact(VersionRequest::new(), MessageFlags::ACK_ON_PROCESSED).unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout { seq: 0, waited, .. } if waited >= Duration::from_secs(1)));
        assert_eq!(channel.in_flight(), 0);

        // The late answer for seq 0 is dropped and the next request uses seq 1
        channel.proxy().push(version_reply(0, true, IntegrityMode::Standard));
        channel.proxy().push(version_reply(1, true, IntegrityMode::Standard));
        let response = channel.transact(VersionRequest::new(), MessageFlags::ACK_ON_PROCESSED).unwrap();
        assert_eq!(response.header().seq(), 1);
    }

    #[test]
    fn flag_mismatch_rejected() {
        let channel = channel(ChannelConfig::default());

        let txn = channel.open(MessageType::Version, MessageFlags::NO_RESPONSE).unwrap();
        let mut request = VersionRequest::new();
        txn.stamp(&mut request);
        let bytes = encode(&request, IntegrityMode::Standard);
        assert!(matches!(
            channel.send_and_wait(&txn, &bytes, Duration::from_secs(1)),
            Err(ProtocolError::NoResponseExpected { seq: 0 })
        ));
        channel.send_only(txn, &bytes).unwrap();
        assert_eq!(channel.in_flight(), 0);
        assert_eq!(channel.proxy().sent_count(), 1);

        let txn = channel.open(MessageType::Version, MessageFlags::ACK_ON_PROCESSED).unwrap();
        let seq = txn.seq();
        assert_eq!(channel.send_only(txn, &bytes), Err(ProtocolError::ResponseExpected { seq }));
    }

    #[test]
    fn unstamped_request_rejected() {
        let channel = channel(ChannelConfig::default());
        let _first = channel.open(MessageType::Version, MessageFlags::ACK_ON_PROCESSED).unwrap();
        let second = channel.open(MessageType::Version, MessageFlags::ACK_ON_PROCESSED).unwrap();

        let bytes = encode(&VersionRequest::new(), IntegrityMode::Standard);
        let result = channel.send_and_wait(&second, &bytes, Duration::from_secs(1));
        assert!(matches!(result, Err(ProtocolError::RequestMismatch { expected_seq: 1, actual_seq: 0, .. })));
        assert_eq!(channel.proxy().sent_count(), 0);
    }

    #[test]
    fn oversized_request_rejected() {
        let channel = channel(ChannelConfig::default());
        let txn = channel.open(MessageType::Version, MessageFlags::ACK_ON_PROCESSED).unwrap();
        let mut request = VersionRequest::new();
        txn.stamp(&mut request);
        let mut bytes = encode(&request, IntegrityMode::Standard);
        bytes.resize(100, 0);

        let err = channel.send_and_wait(&txn, &bytes, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err, ProtocolError::Transport(TransportError::MessageTooLarge { len: 100, max: 56 }));
    }

    #[test]
    fn dropping_transaction_closes_it() {
        let channel = channel(ChannelConfig::default());
        let txn = channel.open(MessageType::Version, MessageFlags::ACK_ON_PROCESSED).unwrap();
        assert_eq!(txn.state(), Some(TransactionState::Pending));
        assert_eq!(channel.in_flight(), 1);
        txn.close();
        assert_eq!(channel.in_flight(), 0);
    }
}
