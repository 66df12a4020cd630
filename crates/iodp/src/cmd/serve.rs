use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::cmd::functions::register_demo_functions;
use crate::cmd::{open_udp_device, parse_duration, ServeArgs};
use crate::exit::{device_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::OutputFormat;

const TICK: Duration = Duration::from_millis(100);

#[derive(Serialize)]
struct ServeSummary {
    requests_served: u64,
    frames_routed: u64,
    frames_dropped: u64,
    bytes_received: u64,
}

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let stop_after = args.duration.as_deref().map(parse_duration).transpose()?;
    let device = open_udp_device(&args.bind, &args.peer, &args.device)?;
    register_demo_functions(&device)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let codes: Vec<String> = device
        .list_registered_functions()
        .iter()
        .map(|code| format!("{code:#06x}"))
        .collect();
    tracing::info!(bind = %args.bind, peer = %args.peer, functions = ?codes, "serving");

    let deadline = stop_after.map(|d| Instant::now() + d);
    let cooperative = args.device.cooperative;
    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        if cooperative {
            device
                .serve_for(TICK)
                .map_err(|err| device_error("serve failed", err))?;
        } else {
            thread::sleep(TICK);
        }
    }

    device.shutdown();
    let stats = device.stats();
    tracing::info!(?stats, "stopped");
    if let OutputFormat::Json = format {
        let summary = ServeSummary {
            requests_served: stats.requests_served,
            frames_routed: stats.frames_routed,
            frames_dropped: stats.frames_dropped,
            bytes_received: stats.bytes_received,
        };
        println!(
            "{}",
            serde_json::to_string(&summary).unwrap_or_else(|_| "{}".to_string())
        );
    }
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
