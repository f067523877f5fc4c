#![no_main]

use libfuzzer_sys::fuzz_target;
use tisci_proto::{
    DkekRequest, DkekResponse, IntegrityMode, MessageHeader, VersionRequest, VersionResponse,
    WireMessage, decode, encode,
};

/// A message accepted in high-security mode re-encodes to the exact input.
fn check<M: WireMessage>(data: &[u8]) {
    let _ = decode::<M>(data, IntegrityMode::Standard);

    if let Ok(message) = decode::<M>(data, IntegrityMode::HighSecurity) {
        let bytes = encode(&message, IntegrityMode::HighSecurity);
        assert_eq!(bytes.as_slice(), &data[..M::SIZE]);
    }
}

fuzz_target!(|data: &[u8]| {
    if let Ok(header) = MessageHeader::peek(data) {
        let _ = header.message_type();
        let _ = header.flags().is_ack();
    }

    check::<VersionRequest>(data);
    check::<VersionResponse>(data);
    check::<DkekRequest>(data);
    check::<DkekResponse>(data);
});
