//! Transaction bookkeeping.
//!
//! Pure state, no I/O: the [`Channel`](crate::channel::Channel) feeds it
//! inbound frames and asks it for sequence numbers, while all blocking and
//! clock reads happen outside.
//!
//! # Lifecycle
//!
//! ```text
//! allocate ──> Pending ──(matching frame taken)──> Completed ──> release
//!                 │
//!                 └──(deadline)──> TimedOut ──> release ──> quarantine
//! ```
//!
//! A live record owns its sequence number until it is released. Releasing a
//! timed-out record puts its sequence number in quarantine: a late response
//! for it is dropped instead of reaching whichever transaction reuses the
//! number next, and the allocator avoids quarantined numbers while any other
//! number is free.
//!
//! Every record also carries a generation that is never reused, so frames
//! queued for one owner of a sequence number can never be handed to a later
//! owner of the same number.

use std::{
    collections::{HashMap, VecDeque},
    time::Instant,
};

use tisci_proto::{MessageFlags, MessageHeader, MessageType};
use zeroize::Zeroizing;

use crate::error::ProtocolError;

/// Number of distinct sequence numbers on the wire.
const SEQ_SPACE: usize = 256;

/// Identity of one transaction: its sequence number plus a unique
/// generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId {
    /// Sequence number on the wire
    pub seq: u8,
    /// Allocation counter, unique for the table's lifetime
    pub generation: u64,
}

/// Transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Waiting for its response
    Pending,
    /// Response taken by the owner
    Completed,
    /// Deadline elapsed without a response
    TimedOut,
}

/// Record of one in-flight transaction.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    /// Identity
    pub id: TransactionId,
    /// Type the response must carry
    pub expected_type: MessageType,
    /// Acknowledgement flags of the request
    pub flags: MessageFlags,
    /// Current state
    pub state: TransactionState,
    /// Response deadline, set once the request is sent
    pub deadline: Option<Instant>,
}

/// What happened to an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Queued for the pending transaction that owns it
    Queued(TransactionId),
    /// Response for a transaction that already timed out; dropped
    Late {
        /// Sequence number in the frame
        seq: u8,
    },
    /// Second frame for a transaction that already has one queued; dropped
    Duplicate(TransactionId),
    /// No transaction claims this seq/type pair; dropped
    Unclaimed {
        /// Sequence number in the frame
        seq: u8,
        /// Type code in the frame
        message_type: u16,
    },
}

/// Sequence allocator and inbound demultiplexer.
#[derive(Debug)]
pub struct TransactionTable {
    next_seq: u8,
    next_generation: u64,
    live: HashMap<u8, TransactionRecord>,
    quarantine: HashMap<u8, MessageType>,
    quarantine_order: VecDeque<u8>,
    mailbox: HashMap<TransactionId, Zeroizing<Vec<u8>>>,
}

impl TransactionTable {
    /// Create a table whose first allocation tries `initial_seq`.
    pub fn new(initial_seq: u8) -> Self {
        Self {
            next_seq: initial_seq,
            next_generation: 0,
            live: HashMap::new(),
            quarantine: HashMap::new(),
            quarantine_order: VecDeque::new(),
            mailbox: HashMap::new(),
        }
    }

    /// Allocate the next free sequence number.
    ///
    /// Numbers are handed out from a wrapping counter, skipping any held by
    /// a live record. Quarantined numbers are skipped too unless nothing
    /// else is free, in which case the oldest quarantine entry is reclaimed.
    pub fn allocate(
        &mut self,
        expected_type: MessageType,
        flags: MessageFlags,
    ) -> Result<TransactionId, ProtocolError> {
        let seq = match self.find_free(true) {
            Some(seq) => seq,
            None => {
                let reclaimed =
                    self.quarantine_order.pop_front().ok_or(ProtocolError::SequenceExhausted)?;
                self.quarantine.remove(&reclaimed);
                reclaimed
            },
        };

        let id = TransactionId { seq, generation: self.next_generation };
        self.next_generation += 1;
        self.next_seq = seq.wrapping_add(1);
        self.live.insert(
            seq,
            TransactionRecord {
                id,
                expected_type,
                flags,
                state: TransactionState::Pending,
                deadline: None,
            },
        );
        Ok(id)
    }

    fn find_free(&self, avoid_quarantine: bool) -> Option<u8> {
        (0..SEQ_SPACE).map(|offset| self.next_seq.wrapping_add(offset as u8)).find(|seq| {
            !self.live.contains_key(seq) && !(avoid_quarantine && self.quarantine.contains_key(seq))
        })
    }

    /// Record the response deadline of a transaction.
    pub fn arm(&mut self, id: TransactionId, deadline: Instant) {
        if let Some(record) = self.record_mut(id) {
            record.deadline = Some(deadline);
        }
    }

    /// Route an inbound frame by its header.
    ///
    /// A frame is queued only when its seq belongs to a pending record whose
    /// expected type matches; everything else is dropped.
    pub fn route(&mut self, header: &MessageHeader, frame: Zeroizing<Vec<u8>>) -> Disposition {
        let seq = header.seq();
        let message_type = header.message_type_raw();

        if let Some(record) = self.live.get(&seq)
            && record.expected_type.to_u16() == message_type
        {
            return match record.state {
                TransactionState::Pending => {
                    let id = record.id;
                    if self.mailbox.contains_key(&id) {
                        Disposition::Duplicate(id)
                    } else {
                        self.mailbox.insert(id, frame);
                        Disposition::Queued(id)
                    }
                },
                TransactionState::Completed => Disposition::Duplicate(record.id),
                TransactionState::TimedOut => Disposition::Late { seq },
            };
        }

        if self.quarantine.get(&seq).is_some_and(|ty| ty.to_u16() == message_type) {
            self.quarantine.remove(&seq);
            self.quarantine_order.retain(|&q| q != seq);
            return Disposition::Late { seq };
        }

        Disposition::Unclaimed { seq, message_type }
    }

    /// Whether a frame is waiting for `id`.
    pub fn has_frame(&self, id: TransactionId) -> bool {
        self.mailbox.contains_key(&id)
    }

    /// Take the frame queued for `id`, marking the transaction completed.
    pub fn take(&mut self, id: TransactionId) -> Option<Zeroizing<Vec<u8>>> {
        let frame = self.mailbox.remove(&id)?;
        if let Some(record) = self.record_mut(id) {
            record.state = TransactionState::Completed;
        }
        Some(frame)
    }

    /// Mark a pending transaction as timed out.
    pub fn expire(&mut self, id: TransactionId) {
        self.mailbox.remove(&id);
        if let Some(record) = self.record_mut(id)
            && record.state == TransactionState::Pending
        {
            record.state = TransactionState::TimedOut;
        }
    }

    /// Release the sequence number held by `id`.
    ///
    /// Idempotent. Timed-out transactions leave their number in quarantine.
    pub fn release(&mut self, id: TransactionId) {
        self.mailbox.remove(&id);
        if self.live.get(&id.seq).is_some_and(|record| record.id == id)
            && let Some(record) = self.live.remove(&id.seq)
            && record.state == TransactionState::TimedOut
        {
            self.quarantine.insert(id.seq, record.expected_type);
            self.quarantine_order.push_back(id.seq);
        }
    }

    /// State of `id`, or `None` once released.
    pub fn state(&self, id: TransactionId) -> Option<TransactionState> {
        self.live.get(&id.seq).filter(|record| record.id == id).map(|record| record.state)
    }

    /// Record for `id`, or `None` once released.
    pub fn record(&self, id: TransactionId) -> Option<&TransactionRecord> {
        self.live.get(&id.seq).filter(|record| record.id == id)
    }

    /// Number of live transactions.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Whether `seq` is quarantined after a timeout.
    pub fn is_quarantined(&self, seq: u8) -> bool {
        self.quarantine.contains_key(&seq)
    }

    fn record_mut(&mut self, id: TransactionId) -> Option<&mut TransactionRecord> {
        self.live.get_mut(&id.seq).filter(|record| record.id == id)
    }
}
