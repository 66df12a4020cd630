use iodp_device::DeviceConfig;
use iodp_frame::{max_payload, SYNC};
use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

/// What this build speaks on the wire and how its devices start out.
#[derive(Debug, Serialize)]
struct VersionInfo {
    name: &'static str,
    version: &'static str,
    target_os: &'static str,
    target_arch: &'static str,
    sync: String,
    checksum: &'static str,
    max_frame_size: usize,
    max_payload: usize,
    memory_size: usize,
    call_timeout_ms: u64,
    max_functions: usize,
}

impl VersionInfo {
    fn current() -> Self {
        let defaults = DeviceConfig::default();
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            target_os: std::env::consts::OS,
            target_arch: std::env::consts::ARCH,
            sync: format!("{:02x}{:02x}", SYNC[0], SYNC[1]),
            checksum: "crc32-ieee",
            max_frame_size: defaults.max_frame_size,
            max_payload: max_payload(defaults.max_frame_size),
            memory_size: defaults.memory_size,
            call_timeout_ms: u64::try_from(defaults.call_timeout.as_millis()).unwrap_or(u64::MAX),
            max_functions: defaults.max_functions,
        }
    }
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    if !args.extended {
        println!("iodp {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let info = VersionInfo::current();
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(&info).unwrap_or_else(|_| "{}".to_string())
        ),
        _ => {
            println!("name: {}", info.name);
            println!("version: {}", info.version);
            println!("target: {}-{}", info.target_arch, info.target_os);
            println!(
                "frame: sync={} checksum={} max_frame_size={} max_payload={}",
                info.sync, info.checksum, info.max_frame_size, info.max_payload
            );
            println!(
                "device defaults: memory_size={} call_timeout_ms={} max_functions={}",
                info.memory_size, info.call_timeout_ms, info.max_functions
            );
        }
    }
    Ok(SUCCESS)
}
