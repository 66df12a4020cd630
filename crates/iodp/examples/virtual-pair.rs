//! Two devices on one in-memory duplex link, each serving the other.
//!
//! Run with:
//!   cargo run --example virtual-pair
//!
//! For the same exchange over UDP, start `iodp serve` and use the
//! `write`, `read` and `call` subcommands from another terminal.

use iodp::device::{Device, DeviceConfig, HandlerResult};
use iodp::transport::MemoryLink;

fn sum(args: &[u8]) -> HandlerResult {
    let total: u32 = args.iter().map(|b| u32::from(*b)).sum();
    Ok(total.to_be_bytes().to_vec())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (a, b) = MemoryLink::pair();
    let master = Device::open(a, DeviceConfig::default())?;
    let slave = Device::open(b, DeviceConfig::default())?;
    slave.register_function(0x0666, sum)?;
    master.register_function(0x0001, |args: &[u8]| -> HandlerResult { Ok(args.to_vec()) })?;

    let data: Vec<u8> = (0..100).collect();
    master.write_remote_memory(0, &data)?;
    let read = master.read_remote_memory(0, 100)?;
    eprintln!("read back {} bytes, match={}", read.len(), read.as_ref() == data.as_slice());

    let ret = master.call_remote_function(0x0666, &[1, 2, 3])?;
    eprintln!("sum(1, 2, 3) = {:?}", ret.as_ref());

    let echoed = slave.call_remote_function(0x0001, b"hello")?;
    eprintln!("slave called master echo: {}", String::from_utf8_lossy(&echoed));

    match master.read_remote_memory(512, 10) {
        Ok(_) => eprintln!("unexpected success reading past the end"),
        Err(err) => eprintln!("read at 512 failed as expected: {err}"),
    }

    eprintln!("master stats: {:?}", master.stats());
    eprintln!("slave stats: {:?}", slave.stats());
    Ok(())
}
