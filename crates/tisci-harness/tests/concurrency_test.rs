//! Several threads sharing one channel.
//!
//! Each thread derives a key for its own context. Responses are drained by
//! whichever thread holds the receive lock, so every thread regularly
//! delivers frames owned by others; none may ever see a key meant for
//! another thread.

use std::thread;

use proptest::prelude::*;
use tisci_core::{ChannelConfig, KeyDerivationClient, KeyDerivationConfig, KeyDerivationError};
use tisci_harness::{FaultRates, FirmwareProfile, Rig, SimulatedFirmware};

// 320 requests in total, so the sequence counter wraps at least once
const THREADS: usize = 8;
const ROUNDS: usize = 40;

#[test]
fn concurrent_clients_receive_their_own_keys() {
    let rig = Rig::with_profile(FirmwareProfile::default());
    let channel = rig.channel(ChannelConfig::default()).unwrap();

    thread::scope(|scope| {
        for worker in 0..THREADS {
            let channel = &channel;
            let firmware = &rig.firmware;
            scope.spawn(move || {
                let mut client = KeyDerivationClient::new(channel, KeyDerivationConfig::default());
                for round in 0..ROUNDS {
                    let context = format!("W{worker}R{round}");
                    let key = client.get_dkek(0, "OP-TEE", &context).unwrap();
                    let expected = firmware.expected_dkek(b"OP-TEE", context.as_bytes()).unwrap();
                    assert_eq!(key.as_bytes(), &*expected, "worker {worker} round {round}");
                    assert!(client.staging_is_clear());
                }
            });
        }
    });

    assert_eq!(channel.in_flight(), 0);
    assert_eq!(rig.firmware.stats().keys_issued, THREADS * ROUNDS);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn faulty_firmware_never_yields_wrong_key(seed in any::<u64>()) {
        let rates = FaultRates { nack: 0.1, corrupt: 0.0, stray: 0.2, drop: 0.1 };
        let rig = Rig::new(SimulatedFirmware::new(FirmwareProfile::default()).with_fault_rates(rates, seed));
        let channel = rig.channel(ChannelConfig::default()).unwrap();
        let mut client = KeyDerivationClient::new(&channel, KeyDerivationConfig::default());

        for round in 0..24 {
            let context = format!("R{round}");
            match client.get_dkek(0, "OP-TEE", &context) {
                Ok(key) => {
                    let expected = rig.firmware.expected_dkek(b"OP-TEE", context.as_bytes()).unwrap();
                    prop_assert_eq!(key.as_bytes(), &*expected);
                },
                Err(KeyDerivationError::Protocol(err)) => {
                    prop_assert!(
                        err.is_retryable() || matches!(err, tisci_core::ProtocolError::Nack { .. }),
                        "unexpected error {:?}", err
                    );
                },
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
            prop_assert!(client.staging_is_clear());
            prop_assert_eq!(channel.in_flight(), 0);
        }
    }
}
