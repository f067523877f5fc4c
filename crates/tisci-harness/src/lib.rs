//! Deterministic test doubles for the system-controller protocol client.
//!
//! A [`ManualClock`], a [`ScriptedProxy`] that advances it on idle polls,
//! and a [`SimulatedFirmware`] that answers requests in memory. [`Rig`]
//! wires the three together.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod firmware;
pub mod proxy;

use std::sync::Arc;

pub use clock::ManualClock;
pub use firmware::{
    DEFAULT_ROOT_KEY, Fault, FaultRates, FirmwareProfile, FirmwareStats, SimulatedFirmware,
};
pub use proxy::{Responder, ScriptedProxy};
use tisci_core::{Channel, ChannelConfig, Platform, PlatformConfig};

/// Channel type the harness builds.
pub type SimChannel = Channel<Arc<ScriptedProxy>, Arc<ManualClock>>;

/// Platform type the harness builds.
pub type SimPlatform = Platform<Arc<ScriptedProxy>, Arc<ManualClock>>;

/// Clock, proxy and firmware sharing one timeline.
#[derive(Clone)]
pub struct Rig {
    /// Shared clock
    pub clock: Arc<ManualClock>,
    /// Simulated firmware behind the proxy
    pub firmware: Arc<SimulatedFirmware>,
    /// Proxy handed to the client
    pub proxy: Arc<ScriptedProxy>,
}

impl Rig {
    /// Connect a proxy to `firmware`.
    pub fn new(firmware: SimulatedFirmware) -> Self {
        let clock = Arc::new(ManualClock::new());
        let firmware = Arc::new(firmware);
        let proxy =
            Arc::new(ScriptedProxy::new(clock.clone()).with_responder(firmware.clone()));
        Self { clock, firmware, proxy }
    }

    /// Rig whose firmware reports `profile`.
    pub fn with_profile(profile: FirmwareProfile) -> Self {
        Self::new(SimulatedFirmware::new(profile))
    }

    /// Initialized channel over this rig.
    pub fn channel(&self, config: ChannelConfig) -> Result<SimChannel, tisci_core::TransportError> {
        let channel = Channel::new(self.proxy.clone(), self.clock.clone(), config);
        channel.init()?;
        Ok(channel)
    }

    /// Platform over this rig, not yet initialized.
    pub fn platform(&self, config: PlatformConfig) -> SimPlatform {
        Platform::new(self.proxy.clone(), self.clock.clone(), config)
    }
}
