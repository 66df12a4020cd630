use crate::cmd::CallArgs;
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::{print_call, OutputFormat};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let input = args.payload.bytes()?;
    let device = args.link.open()?;
    let ret = device
        .call_remote_function(args.code, &input)
        .map_err(|err| device_error("call failed", err))?;
    print_call(args.code, &ret, format);
    Ok(SUCCESS)
}
