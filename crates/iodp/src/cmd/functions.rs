use iodp_device::{Device, DeviceConfig, HandlerResult};
use iodp_transport::MemoryLink;

use crate::cmd::FunctionsArgs;
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::{print_functions, OutputFormat};

/// Sums the argument bytes; returns the total as a big-endian u32.
pub const SUM: u16 = 0x0666;
/// Returns its arguments unchanged.
pub const ECHO: u16 = 0x0001;

pub struct DemoFunction {
    pub code: u16,
    pub name: &'static str,
    pub description: &'static str,
    pub handler: fn(&[u8]) -> HandlerResult,
}

pub const DEMO_FUNCTIONS: &[DemoFunction] = &[
    DemoFunction {
        code: ECHO,
        name: "echo",
        description: "returns the argument bytes unchanged",
        handler: echo,
    },
    DemoFunction {
        code: SUM,
        name: "sum",
        description: "sum of argument bytes as a big-endian u32",
        handler: sum,
    },
];

pub fn sum(args: &[u8]) -> HandlerResult {
    let total: u32 = args.iter().map(|b| u32::from(*b)).sum();
    Ok(total.to_be_bytes().to_vec())
}

pub fn echo(args: &[u8]) -> HandlerResult {
    Ok(args.to_vec())
}

pub fn register_demo_functions(device: &Device) -> CliResult<()> {
    for function in DEMO_FUNCTIONS {
        device
            .register_function(function.code, function.handler)
            .map_err(|err| device_error("register failed", err))?;
    }
    Ok(())
}

pub fn run(_args: FunctionsArgs, format: OutputFormat) -> CliResult<i32> {
    // Build the table the same way `serve` does and list what it holds.
    let (link, _peer) = MemoryLink::pair();
    let device = Device::open(link, DeviceConfig::cooperative())
        .map_err(|err| device_error("open device failed", err))?;
    register_demo_functions(&device)?;

    let rows: Vec<_> = device
        .list_registered_functions()
        .into_iter()
        .filter_map(|code| {
            DEMO_FUNCTIONS
                .iter()
                .find(|f| f.code == code)
                .map(|f| (f.code, f.name, f.description))
        })
        .collect();
    print_functions(&rows, format);
    Ok(SUCCESS)
}
