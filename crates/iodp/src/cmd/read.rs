use crate::cmd::ReadArgs;
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::{print_read, OutputFormat};

pub fn run(args: ReadArgs, format: OutputFormat) -> CliResult<i32> {
    let device = args.link.open()?;
    let data = device
        .read_remote_memory(args.addr, args.len)
        .map_err(|err| device_error("read failed", err))?;
    print_read(args.addr, args.len, &data, format);
    Ok(SUCCESS)
}
