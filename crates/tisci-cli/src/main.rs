//! Runs the secure-world boot path against the simulated firmware.
//!
//! ```text
//! tisci huk --min-abi 3.0
//! tisci --high-security derive --label OP-TEE --context STORAGE --len 32
//! tisci --nack-rate 0.5 --seed 7 version
//! ```
//!
//! Output goes through `tracing`; set `RUST_LOG` to change verbosity.

use std::{process::ExitCode, time::Duration};

use clap::{Args, Parser, Subcommand};
use tisci_core::{
    AbiVersion, ChannelConfig, KeyDerivationClient, KeyDerivationConfig, PlatformConfig,
    ProxyThread, VersionNegotiator,
};
use tisci_harness::{FaultRates, FirmwareProfile, Rig, SimulatedFirmware};
use tisci_proto::IntegrityMode;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tisci", version)]
#[command(about = "System-controller protocol client against simulated firmware")]
struct Cli {
    #[command(flatten)]
    channel: ChannelArgs,

    #[command(flatten)]
    firmware: FirmwareArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ChannelArgs {
    /// Host id stamped into requests
    #[arg(long, default_value_t = tisci_core::DEFAULT_HOST_ID)]
    host_id: u8,

    /// Response timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Seal and verify message checksums
    #[arg(long)]
    high_security: bool,

    /// Lowest firmware ABI allowed to derive keys, as MAJOR.MINOR
    #[arg(long, value_parser = parse_abi)]
    min_abi: Option<AbiVersion>,
}

#[derive(Args, Debug)]
struct FirmwareArgs {
    /// ABI the simulated firmware reports, as MAJOR.MINOR
    #[arg(long, value_parser = parse_abi, default_value = "4.0")]
    firmware_abi: AbiVersion,

    /// Probability of a NACK per request
    #[arg(long, default_value_t = 0.0)]
    nack_rate: f64,

    /// Probability of a corrupted response per request
    #[arg(long, default_value_t = 0.0)]
    corrupt_rate: f64,

    /// Probability of a stray frame per request
    #[arg(long, default_value_t = 0.0)]
    stray_rate: f64,

    /// Probability of no response per request
    #[arg(long, default_value_t = 0.0)]
    drop_rate: f64,

    /// Fault injection seed
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Derive the hardware unique key as the boot path does
    Huk {
        /// Key length in bytes
        #[arg(long, default_value_t = 16)]
        len: usize,
    },
    /// Query the firmware version
    Version,
    /// Derive a key for an arbitrary label and context
    Derive {
        /// KDF label
        #[arg(long)]
        label: String,
        /// KDF context
        #[arg(long)]
        context: String,
        /// Key length in bytes
        #[arg(long, default_value_t = 32)]
        len: usize,
    },
}

fn parse_abi(value: &str) -> Result<AbiVersion, String> {
    let (major, minor) = value.split_once('.').unwrap_or((value, "0"));
    let major = major.parse().map_err(|e| format!("invalid ABI major '{major}': {e}"))?;
    let minor = minor.parse().map_err(|e| format!("invalid ABI minor '{minor}': {e}"))?;
    Ok(AbiVersion::new(major, minor))
}

impl ChannelArgs {
    fn integrity(&self) -> IntegrityMode {
        if self.high_security { IntegrityMode::HighSecurity } else { IntegrityMode::Standard }
    }

    fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            host_id: self.host_id,
            tx_thread: ProxyThread(7),
            rx_thread: ProxyThread(6),
            timeout: Duration::from_millis(self.timeout_ms),
            integrity: self.integrity(),
            ..ChannelConfig::default()
        }
    }

    fn key_derivation_config(&self) -> KeyDerivationConfig {
        KeyDerivationConfig { min_abi: self.min_abi }
    }
}

impl FirmwareArgs {
    fn firmware(&self, integrity: IntegrityMode) -> SimulatedFirmware {
        let profile =
            FirmwareProfile { abi: self.firmware_abi, integrity, ..FirmwareProfile::default() };
        let rates = FaultRates {
            nack: self.nack_rate,
            corrupt: self.corrupt_rate,
            stray: self.stray_rate,
            drop: self.drop_rate,
        };
        SimulatedFirmware::new(profile).with_fault_rates(rates, self.seed)
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let rig = Rig::new(cli.firmware.firmware(cli.channel.integrity()));

    match &cli.command {
        Command::Huk { len } => {
            let config = PlatformConfig {
                channel: cli.channel.channel_config(),
                key_derivation: Some(cli.channel.key_derivation_config()),
                huk_length: *len,
                ..PlatformConfig::default()
            };
            let platform = rig.platform(config);
            let huk = platform.hw_unique_key()?;

            let expected = rig.firmware.expected_dkek(b"OP-TEE", b"DKEK");
            let matches = expected.is_some_and(|key| huk.as_bytes() == &key[..huk.len()]);
            info!(len = huk.len(), matches_firmware = matches, "hardware unique key ready");
        },
        Command::Version => {
            let channel = rig.channel(cli.channel.channel_config())?;
            let info = VersionNegotiator::new(&channel).query_version()?;
            info!("{info}");
        },
        Command::Derive { label, context, len } => {
            let channel = rig.channel(cli.channel.channel_config())?;
            let mut client =
                KeyDerivationClient::new(&channel, cli.channel.key_derivation_config());
            let mut key = vec![0u8; *len];
            let result = client.get_dkek_into(0, label, context, &mut key);
            let derived = result.map(|()| {
                let expected = rig.firmware.expected_dkek(label.as_bytes(), context.as_bytes());
                expected.is_some_and(|full| key.as_slice() == &full[..key.len()])
            });
            key.fill(0);
            let matches = derived?;
            info!(len, matches_firmware = matches, "derived key ready");
        },
    }

    debug!(stats = ?rig.firmware.stats(), elapsed = ?rig.clock.elapsed(), "simulation finished");
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "secure boot key path failed");
            ExitCode::FAILURE
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_parsing() {
        assert_eq!(parse_abi("11.2"), Ok(AbiVersion::new(11, 2)));
        assert_eq!(parse_abi("3"), Ok(AbiVersion::new(3, 0)));
        assert!(parse_abi("x.1").is_err());
        assert!(parse_abi("1.300").is_err());
    }

    #[test]
    fn arguments_map_onto_config() {
        let cli = Cli::parse_from([
            "tisci",
            "--host-id",
            "4",
            "--timeout-ms",
            "250",
            "--high-security",
            "--min-abi",
            "3.1",
            "huk",
        ]);

        let config = cli.channel.channel_config();
        assert_eq!(config.host_id, 4);
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.integrity, IntegrityMode::HighSecurity);
        assert_eq!(cli.channel.key_derivation_config().min_abi, Some(AbiVersion::new(3, 1)));
        assert!(matches!(cli.command, Command::Huk { len: 16 }));
    }

    #[test]
    fn boot_path_runs_against_simulator() {
        let cli = Cli::parse_from(["tisci", "--high-security", "--stray-rate", "0.5", "huk"]);
        assert!(run(&cli).is_ok());

        let cli = Cli::parse_from(["tisci", "--firmware-abi", "2.0", "--min-abi", "3.0", "huk"]);
        assert!(run(&cli).is_err());
    }
}
