#![no_main]

use std::{collections::HashSet, time::Instant};

use libfuzzer_sys::fuzz_target;
use tisci_core::{Disposition, TransactionId, TransactionTable};
use tisci_proto::{MessageFlags, MessageHeader, MessageType};
use zeroize::Zeroizing;

// Each pair of input bytes is one operation on the table: allocate, release,
// expire, or route a frame with arbitrary seq and type.
fuzz_target!(|data: &[u8]| {
    let mut table = TransactionTable::new(data.first().copied().unwrap_or(0));
    let mut open: Vec<TransactionId> = Vec::new();
    let now = Instant::now();

    for op in data.chunks_exact(2) {
        let (kind, arg) = (op[0], op[1]);
        let message_type =
            if kind & 0x10 == 0 { MessageType::Version } else { MessageType::Sa2ulGetDkek };

        match kind % 4 {
            0 => {
                if let Ok(id) = table.allocate(message_type, MessageFlags::ACK_ON_PROCESSED) {
                    table.arm(id, now);
                    open.push(id);
                }
            },
            1 if !open.is_empty() => {
                let id = open.swap_remove(arg as usize % open.len());
                table.release(id);
            },
            2 if !open.is_empty() => {
                let id = open[arg as usize % open.len()];
                table.expire(id);
            },
            _ => {
                let header = MessageHeader::new(message_type, 11, arg, MessageFlags::GENERIC_ACK);
                if let Disposition::Queued(id) = table.route(&header, Zeroizing::new(vec![arg])) {
                    assert!(open.contains(&id));
                    assert!(table.take(id).is_some());
                }
            },
        }

        let seqs: HashSet<u8> = open.iter().map(|id| id.seq).collect();
        assert_eq!(seqs.len(), open.len());
        assert_eq!(table.live_count(), open.len());
    }
});
