use crate::cmd::WriteArgs;
use crate::exit::{device_error, CliResult, SUCCESS};

pub fn run(args: WriteArgs) -> CliResult<i32> {
    let data = args.payload.bytes()?;
    let device = args.link.open()?;
    device
        .write_remote_memory(args.addr, &data)
        .map_err(|err| device_error("write failed", err))?;
    tracing::info!(addr = args.addr, len = data.len(), "write sent");
    Ok(SUCCESS)
}
