use std::time::Duration;

use clap::{Args, Subcommand};
use iodp_device::{Device, DeviceConfig, SchedulingMode};
use iodp_transport::UdpLink;

use crate::exit::{device_error, transport_error, CliError, CliResult};
use crate::output::OutputFormat;

pub mod call;
pub mod functions;
pub mod loopback;
pub mod read;
pub mod serve;
pub mod version;
pub mod write;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a device that answers peer requests until interrupted.
    Serve(ServeArgs),
    /// Write bytes into the peer's memory.
    Write(WriteArgs),
    /// Read bytes from the peer's memory.
    Read(ReadArgs),
    /// Call a function on the peer.
    Call(CallArgs),
    /// List the functions `serve` exposes.
    Functions(FunctionsArgs),
    /// Run master and slave in one process and stress the call path.
    Loopback(LoopbackArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Write(args) => write::run(args),
        Command::Read(args) => read::run(args, format),
        Command::Call(args) => call::run(args, format),
        Command::Functions(args) => functions::run(args, format),
        Command::Loopback(args) => loopback::run(args, format),
        Command::Version(args) => version::run(args, format),
    }
}

/// Device tuning shared by every command that opens a device.
#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Reply timeout for reads and calls (e.g. 3s, 500ms).
    #[arg(long, default_value = "3s")]
    pub timeout: String,
    /// Size of the local memory space in bytes.
    #[arg(long, default_value_t = 512)]
    pub memory_size: usize,
    /// Exclusive upper bound on a frame in bytes.
    #[arg(long, default_value_t = 1024)]
    pub max_frame_size: usize,
    /// Drive ingress from the calling thread instead of background threads.
    #[arg(long)]
    pub cooperative: bool,
}

impl DeviceArgs {
    pub fn to_config(&self) -> CliResult<DeviceConfig> {
        let config = DeviceConfig {
            call_timeout: parse_duration(&self.timeout)?,
            memory_size: self.memory_size,
            max_frame_size: self.max_frame_size,
            ingress_capacity: self.max_frame_size.max(DeviceConfig::default().ingress_capacity),
            mode: if self.cooperative {
                SchedulingMode::Cooperative
            } else {
                SchedulingMode::Threaded
            },
            ..DeviceConfig::default()
        };
        config
            .validate()
            .map_err(|err| device_error("invalid device settings", err))?;
        Ok(config)
    }
}

/// UDP endpoints of a requesting device.
#[derive(Args, Debug, Clone)]
pub struct MasterLinkArgs {
    /// Local address to bind.
    #[arg(long, default_value = "127.0.0.1:7777")]
    pub bind: String,
    /// Address of the serving device.
    #[arg(long, default_value = "127.0.0.1:8888")]
    pub peer: String,
    #[command(flatten)]
    pub device: DeviceArgs,
}

impl MasterLinkArgs {
    pub fn open(&self) -> CliResult<Device> {
        open_udp_device(&self.bind, &self.peer, &self.device)
    }
}

/// Literal payload given on the command line.
#[derive(Args, Debug, Clone, Default)]
pub struct PayloadArgs {
    /// Payload as a UTF-8 string.
    #[arg(long, conflicts_with = "hex")]
    pub data: Option<String>,
    /// Payload as hex digits (e.g. 0102ff).
    #[arg(long, conflicts_with = "data")]
    pub hex: Option<String>,
}

impl PayloadArgs {
    pub fn bytes(&self) -> CliResult<Vec<u8>> {
        if let Some(data) = &self.data {
            return Ok(data.as_bytes().to_vec());
        }
        if let Some(hex) = &self.hex {
            return parse_hex(hex);
        }
        Ok(Vec::new())
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Local address to bind.
    #[arg(long, default_value = "127.0.0.1:8888")]
    pub bind: String,
    /// Address of the requesting device.
    #[arg(long, default_value = "127.0.0.1:7777")]
    pub peer: String,
    /// Stop after this long instead of waiting for Ctrl-C (e.g. 10s).
    #[arg(long, value_name = "DURATION")]
    pub duration: Option<String>,
    #[command(flatten)]
    pub device: DeviceArgs,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    #[command(flatten)]
    pub link: MasterLinkArgs,
    /// Start address in the peer's memory (decimal or 0x-prefixed hex).
    #[arg(long, value_parser = parse_u16)]
    pub addr: u16,
    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    #[command(flatten)]
    pub link: MasterLinkArgs,
    /// Start address in the peer's memory (decimal or 0x-prefixed hex).
    #[arg(long, value_parser = parse_u16)]
    pub addr: u16,
    /// Number of bytes to read.
    #[arg(long, value_parser = parse_u16)]
    pub len: u16,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    #[command(flatten)]
    pub link: MasterLinkArgs,
    /// Function code (decimal or 0x-prefixed hex).
    #[arg(long, value_parser = parse_u16)]
    pub code: u16,
    #[command(flatten)]
    pub payload: PayloadArgs,
}

#[derive(Args, Debug, Default)]
pub struct FunctionsArgs {}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    /// Number of calls to make.
    #[arg(long, default_value_t = 100)]
    pub count: usize,
    /// Seed for the argument generator. Random when omitted.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Use two UDP sockets on 127.0.0.1 instead of an in-memory pair.
    #[arg(long)]
    pub udp: bool,
    #[command(flatten)]
    pub device: DeviceArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn open_udp_device(bind: &str, peer: &str, device: &DeviceArgs) -> CliResult<Device> {
    let config = device.to_config()?;
    let link = UdpLink::open(bind, peer).map_err(|err| transport_error("open link failed", err))?;
    Device::open(link, config).map_err(|err| device_error("open device failed", err))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Parse a decimal or `0x`-prefixed hex 16-bit value.
pub fn parse_u16(input: &str) -> Result<u16, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(digits) => u16::from_str_radix(digits, 16),
        None => input.parse(),
    };
    parsed.map_err(|err| format!("invalid 16-bit value {input:?}: {err}"))
}

pub fn parse_hex(input: &str) -> CliResult<Vec<u8>> {
    let digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if !digits.is_ascii() {
        return Err(CliError::usage("hex payload must be ASCII hex digits"));
    }
    if digits.len() % 2 != 0 {
        return Err(CliError::usage("hex payload must have an even number of digits"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| CliError::usage(format!("invalid hex byte {:?}", &digits[i..i + 2])))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn parse_u16_decimal_and_hex() {
        assert_eq!(parse_u16("512"), Ok(512));
        assert_eq!(parse_u16("0x666"), Ok(0x0666));
        assert_eq!(parse_u16("0XDEAD"), Ok(0xDEAD));
        assert!(parse_u16("70000").is_err());
        assert!(parse_u16("0xZZ").is_err());
    }

    #[test]
    fn parse_hex_payloads() {
        assert_eq!(parse_hex("0102ff").unwrap(), vec![1, 2, 0xFF]);
        assert_eq!(parse_hex("01 02").unwrap(), vec![1, 2]);
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn device_args_build_config() {
        let args = DeviceArgs {
            timeout: "500ms".into(),
            memory_size: 256,
            max_frame_size: 2048,
            cooperative: true,
        };
        let config = args.to_config().unwrap();
        assert_eq!(config.call_timeout, Duration::from_millis(500));
        assert_eq!(config.memory_size, 256);
        assert_eq!(config.ingress_capacity, 2048);
        assert_eq!(config.mode, SchedulingMode::Cooperative);
    }

    #[test]
    fn device_args_reject_bad_memory_size() {
        let args = DeviceArgs {
            timeout: "1s".into(),
            memory_size: 0,
            max_frame_size: 1024,
            cooperative: false,
        };
        assert_eq!(args.to_config().unwrap_err().code, crate::exit::USAGE);
    }
}
