//! Simulated system-controller firmware.
//!
//! Answers the version query and SA2UL derived-key requests the way the real
//! firmware does, byte for byte, and can misbehave on demand. Faults are
//! either scripted one request at a time with [`SimulatedFirmware::inject`]
//! or drawn from a seeded RNG with [`FaultRates`], so every run is
//! reproducible.
//!
//! Keys are derived with HKDF-SHA256 from a fixed device root key, using
//! label followed by context as the info string.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use hkdf::Hkdf;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::Sha256;
use tisci_core::AbiVersion;
use tisci_proto::{
    DkekRequest, DkekResponse, IntegrityMode, MessageHeader, MessageType, SA2UL_DKEK_KEY_LEN,
    VersionRequest, VersionResponse, WireMessage, decode, encode,
};
use tracing::debug;
use zeroize::Zeroizing;

use crate::proxy::Responder;

/// Root key the simulated device derives every DKEK from.
pub const DEFAULT_ROOT_KEY: [u8; 32] = [0x42; 32];

/// What the firmware reports about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareProfile {
    /// Description string, at most 32 bytes on the wire
    pub description: String,
    /// Firmware revision
    pub firmware_revision: u16,
    /// ABI revision
    pub abi: AbiVersion,
    /// Sub version
    pub sub_version: u8,
    /// Patch version
    pub patch_version: u8,
    /// Checksum policy for requests and responses
    pub integrity: IntegrityMode,
}

impl Default for FirmwareProfile {
    fn default() -> Self {
        Self {
            description: "Simulated SYSFW".to_string(),
            firmware_revision: 0x000a,
            abi: AbiVersion::new(4, 0),
            sub_version: 1,
            patch_version: 2,
            integrity: IntegrityMode::Standard,
        }
    }
}

/// A single misbehaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Refuse the request with a generic NACK
    Nack,
    /// Flip a body byte after sealing the response
    Corrupt,
    /// Send an unrelated response (sequence number + 128) first
    Stray,
    /// Never answer
    Drop,
}

/// Per-request fault probabilities, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FaultRates {
    /// Probability of [`Fault::Nack`]
    pub nack: f64,
    /// Probability of [`Fault::Corrupt`]
    pub corrupt: f64,
    /// Probability of [`Fault::Stray`]
    pub stray: f64,
    /// Probability of [`Fault::Drop`]
    pub drop: f64,
}

/// Counters for what the firmware has seen and done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirmwareStats {
    /// Version queries received
    pub version_requests: usize,
    /// DKEK requests received
    pub dkek_requests: usize,
    /// DKEK requests answered with a key
    pub keys_issued: usize,
    /// NACKs sent
    pub nacks: usize,
    /// Responses corrupted
    pub corrupted: usize,
    /// Stray frames sent
    pub stray_frames: usize,
    /// Requests never answered
    pub dropped: usize,
}

struct FirmwareState {
    rng: ChaCha20Rng,
    rates: FaultRates,
    scripted: VecDeque<Fault>,
    stats: FirmwareStats,
}

impl FirmwareState {
    fn next_fault(&mut self) -> Option<Fault> {
        if let Some(fault) = self.scripted.pop_front() {
            return Some(fault);
        }

        let rates = self.rates;
        [
            (Fault::Drop, rates.drop),
            (Fault::Nack, rates.nack),
            (Fault::Corrupt, rates.corrupt),
            (Fault::Stray, rates.stray),
        ]
        .into_iter()
        .find(|&(_, p)| p > 0.0 && self.rng.gen_bool(p.min(1.0)))
        .map(|(fault, _)| fault)
    }
}

/// Firmware double answering requests in memory.
pub struct SimulatedFirmware {
    profile: FirmwareProfile,
    root_key: Zeroizing<[u8; 32]>,
    state: Mutex<FirmwareState>,
}

impl SimulatedFirmware {
    /// Firmware with `profile`, the default root key, and no faults.
    pub fn new(profile: FirmwareProfile) -> Self {
        Self {
            profile,
            root_key: Zeroizing::new(DEFAULT_ROOT_KEY),
            state: Mutex::new(FirmwareState {
                rng: ChaCha20Rng::seed_from_u64(0),
                rates: FaultRates::default(),
                scripted: VecDeque::new(),
                stats: FirmwareStats::default(),
            }),
        }
    }

    /// Replace the device root key.
    #[must_use]
    pub fn with_root_key(mut self, root_key: [u8; 32]) -> Self {
        self.root_key = Zeroizing::new(root_key);
        self
    }

    /// Draw faults at random with `rates`, seeded by `seed`.
    #[must_use]
    pub fn with_fault_rates(self, rates: FaultRates, seed: u64) -> Self {
        {
            let mut state = self.state();
            state.rates = rates;
            state.rng = ChaCha20Rng::seed_from_u64(seed);
        }
        self
    }

    /// Apply `fault` to the next request, ahead of any random faults.
    pub fn inject(&self, fault: Fault) {
        self.state().scripted.push_back(fault);
    }

    /// Counters so far.
    pub fn stats(&self) -> FirmwareStats {
        self.state().stats
    }

    /// Reported profile.
    pub fn profile(&self) -> &FirmwareProfile {
        &self.profile
    }

    /// The key this firmware issues for `label` and `context`.
    pub fn expected_dkek(&self, label: &[u8], context: &[u8]) -> Option<Zeroizing<[u8; 32]>> {
        let mut info = Zeroizing::new(Vec::with_capacity(label.len() + context.len()));
        info.extend_from_slice(label);
        info.extend_from_slice(context);

        let hk = Hkdf::<Sha256>::new(None, self.root_key.as_slice());
        let mut okm = Zeroizing::new([0u8; SA2UL_DKEK_KEY_LEN]);
        hk.expand(&info, okm.as_mut_slice()).ok()?;
        Some(okm)
    }

    fn state(&self) -> MutexGuard<'_, FirmwareState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn answer_version(&self, request: &[u8], refuse: bool) -> Option<Vec<u8>> {
        let mode = self.profile.integrity;
        let header = match decode::<VersionRequest>(request, mode) {
            Ok(request) => *request.header(),
            Err(_) => return self.nack(request),
        };
        if refuse {
            return self.nack(request);
        }

        let response = VersionResponse::new(
            header.reply(true),
            &self.profile.description,
            self.profile.firmware_revision,
            (self.profile.abi.major, self.profile.abi.minor),
            self.profile.sub_version,
            self.profile.patch_version,
        );
        Some(encode(&response, mode))
    }

    fn answer_dkek(&self, request: &[u8], refuse: bool) -> Option<Vec<u8>> {
        let mode = self.profile.integrity;
        let Ok(request_msg) = decode::<DkekRequest>(request, mode) else {
            return self.nack(request);
        };
        if refuse || request_msg.instance() != 0 {
            return self.nack(request);
        }
        let Some(key) = self.expected_dkek(request_msg.label(), request_msg.context()) else {
            return self.nack(request);
        };

        let response = DkekResponse::new(request_msg.header().reply(true), &key);
        self.state().stats.keys_issued += 1;
        Some(encode(&response, mode))
    }

    /// Full-size response for the request's type with an empty flag word.
    fn nack(&self, request: &[u8]) -> Option<Vec<u8>> {
        let header = MessageHeader::peek(request).ok()?.reply(false);
        self.state().stats.nacks += 1;
        let bytes = match header.message_type()? {
            MessageType::Version => {
                encode(&VersionResponse::new(header, "", 0, (0, 0), 0, 0), self.profile.integrity)
            },
            MessageType::Sa2ulGetDkek => {
                encode(&DkekResponse::new(header, &[0; SA2UL_DKEK_KEY_LEN]), self.profile.integrity)
            },
        };
        Some(bytes)
    }

    fn stray(&self, header: &MessageHeader) -> Vec<u8> {
        let mut stray = header.reply(true);
        stray.set_message_type(MessageType::Version);
        stray.set_seq(header.seq().wrapping_add(128));
        let response = VersionResponse::new(stray, "stray", 0, (0, 0), 0, 0);
        encode(&response, self.profile.integrity)
    }
}

impl Responder for SimulatedFirmware {
    fn respond(&self, request: &[u8]) -> Vec<Vec<u8>> {
        let Ok(header) = MessageHeader::peek(request) else {
            return Vec::new();
        };

        let fault = {
            let mut state = self.state();
            match header.message_type() {
                Some(MessageType::Version) => state.stats.version_requests += 1,
                Some(MessageType::Sa2ulGetDkek) => state.stats.dkek_requests += 1,
                None => {},
            }
            state.next_fault()
        };

        let mut frames = Vec::new();
        if fault == Some(Fault::Stray) {
            frames.push(self.stray(&header));
            self.state().stats.stray_frames += 1;
        }
        if fault == Some(Fault::Drop) {
            self.state().stats.dropped += 1;
            return frames;
        }
        if !header.flags().expects_response() {
            return frames;
        }

        let refuse = fault == Some(Fault::Nack);
        let reply = match header.message_type() {
            Some(MessageType::Version) => self.answer_version(request, refuse),
            Some(MessageType::Sa2ulGetDkek) => self.answer_dkek(request, refuse),
            None => None,
        };

        if let Some(mut reply) = reply {
            if fault == Some(Fault::Corrupt) {
                let last = reply.len() - 1;
                reply[last] ^= 0xff;
                self.state().stats.corrupted += 1;
            }
            debug!(seq = header.seq(), ?fault, "firmware response queued");
            frames.push(reply);
        }
        frames
    }
}
