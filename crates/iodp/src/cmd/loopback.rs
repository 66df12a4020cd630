use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use iodp_device::{Device, DeviceConfig};
use iodp_transport::{MemoryLink, UdpLink};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cmd::functions::{register_demo_functions, SUM};
use crate::cmd::LoopbackArgs;
use crate::exit::{device_error, transport_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_loopback, LoopbackReport, OutputFormat};

/// Upper bound on argument length and on each argument byte.
const ARG_SPAN: usize = 100;
const SERVE_TICK: Duration = Duration::from_millis(20);

pub fn run(args: LoopbackArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == 0 {
        return Err(CliError::new(USAGE, "--count must be greater than zero"));
    }
    let config = args.device.to_config()?;
    let (master, slave, transport) = if args.udp {
        let (master, slave) = udp_pair(&config)?;
        (master, slave, "udp")
    } else {
        let (a, b) = MemoryLink::pair();
        let master =
            Device::open(a, config.clone()).map_err(|err| device_error("open device failed", err))?;
        let slave =
            Device::open(b, config.clone()).map_err(|err| device_error("open device failed", err))?;
        (master, slave, "memory")
    };
    register_demo_functions(&slave)?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let stop = AtomicBool::new(false);
    let started = Instant::now();
    let (mismatches, failures) = thread::scope(|scope| {
        if args.device.cooperative {
            // A cooperative slave only answers while someone steps it.
            scope.spawn(|| {
                while !stop.load(Ordering::Acquire) {
                    if let Err(err) = slave.serve_for(SERVE_TICK) {
                        tracing::warn!(error = %err, "slave step failed");
                        break;
                    }
                }
            });
        }
        let tally = stress(&master, &mut rng, args.count);
        stop.store(true, Ordering::Release);
        tally
    });
    let elapsed = started.elapsed();

    let report = LoopbackReport {
        transport,
        calls: args.count,
        mismatches,
        failures,
        elapsed_ms: elapsed.as_millis(),
        calls_per_sec: args.count as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
    };
    print_loopback(&report, format);

    if mismatches + failures == 0 {
        Ok(SUCCESS)
    } else {
        Ok(FAILURE)
    }
}

/// Make `count` sum calls with random arguments; returns
/// `(mismatches, failures)`.
fn stress(master: &Device, rng: &mut impl Rng, count: usize) -> (usize, usize) {
    let mut mismatches = 0usize;
    let mut failures = 0usize;
    for n in 1..=count {
        let len = rng.gen_range(1..=ARG_SPAN);
        let input: Vec<u8> = (0..len).map(|_| rng.gen_range(0..ARG_SPAN as u8)).collect();
        let expected: u32 = input.iter().map(|b| u32::from(*b)).sum();

        match master.call_remote_function(SUM, &input) {
            Ok(ret) if ret[..] == expected.to_be_bytes()[..] => {}
            Ok(ret) => {
                mismatches += 1;
                tracing::warn!(call = n, expected, got = ?&ret[..], "sum mismatch");
            }
            Err(err) => {
                failures += 1;
                tracing::warn!(call = n, error = %err, "call failed");
            }
        }
    }
    (mismatches, failures)
}

fn udp_pair(config: &DeviceConfig) -> CliResult<(Device, Device)> {
    let left = UdpLink::bind("127.0.0.1:0").map_err(|err| transport_error("bind failed", err))?;
    let right = UdpLink::bind("127.0.0.1:0").map_err(|err| transport_error("bind failed", err))?;
    let left_addr = left
        .local_addr()
        .map_err(|err| transport_error("bind failed", err))?;
    let right_addr = right
        .local_addr()
        .map_err(|err| transport_error("bind failed", err))?;
    left.connect(right_addr)
        .map_err(|err| transport_error("connect failed", err))?;
    right
        .connect(left_addr)
        .map_err(|err| transport_error("connect failed", err))?;

    let master =
        Device::open(left, config.clone()).map_err(|err| device_error("open device failed", err))?;
    let slave =
        Device::open(right, config.clone()).map_err(|err| device_error("open device failed", err))?;
    Ok((master, slave))
}
