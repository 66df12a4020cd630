use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use iodp_frame::{FrameConfig, FrameWriter, Request};
use iodp_transport::Link;
use tracing::{debug, info, warn};

use crate::config::{DeviceConfig, SchedulingMode};
use crate::correlation::{self, CallClass, Correlator};
use crate::error::{DeviceError, Result};
use crate::memory::MemorySpace;
use crate::pump::{self, IngressQueue, StepIngress};
use crate::registry::{FunctionRegistry, Handler};
use crate::stats::{Counters, DeviceStats};
use crate::sync::{lock, read, write};

/// Result of one cooperative processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// A complete frame was taken off the ring. `kind` is `None` when it was
    /// dropped (bad checksum or unusable kind).
    Processed { kind: Option<u16> },
    /// The deadline passed before a complete frame arrived.
    TimedOut,
}

/// State shared between the device handle and its ingress side.
pub(crate) struct Shared {
    pub(crate) config: DeviceConfig,
    pub(crate) link: Arc<dyn Link>,
    pub(crate) writer: Mutex<FrameWriter<Arc<dyn Link>>>,
    pub(crate) memory: Mutex<MemorySpace>,
    pub(crate) registry: RwLock<FunctionRegistry>,
    pub(crate) correlator: Correlator,
    pub(crate) stats: Counters,
    pub(crate) running: AtomicBool,
}

enum Ingress {
    Threaded {
        queue: Arc<IngressQueue>,
        workers: Mutex<Vec<JoinHandle<()>>>,
    },
    Cooperative(Mutex<StepIngress>),
}

/// One endpoint of an iodp link, acting as both requester and responder.
///
/// Inbound requests are served from the local [`MemorySpace`] and function
/// table. Outbound reads and calls block until the peer replies or
/// `call_timeout` passes. At most one read and one call are outstanding at a
/// time; further callers of the same class wait for the class permit.
///
/// Registered functions run on the ingress side and must not issue reads or
/// calls on the same device: the reply could only be delivered by the very
/// step that is running the function.
pub struct Device {
    shared: Arc<Shared>,
    ingress: Ingress,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("mode", &self.shared.config.mode)
            .field("running", &self.shared.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Initialize a device over `link`.
    ///
    /// In threaded mode this sets the link's read timeout to `poll_interval`
    /// and starts the `iodp-push` and `iodp-process` threads.
    pub fn open<L: Link + 'static>(link: L, config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let link: Arc<dyn Link> = Arc::new(link);
        let writer = FrameWriter::with_config(
            Arc::clone(&link),
            FrameConfig {
                max_frame_size: config.max_frame_size,
            },
        );

        let shared = Arc::new(Shared {
            link,
            writer: Mutex::new(writer),
            memory: Mutex::new(MemorySpace::new(config.memory_size)),
            registry: RwLock::new(FunctionRegistry::new(config.max_functions)),
            correlator: Correlator::new(config.reply_ring_capacity()),
            stats: Counters::default(),
            running: AtomicBool::new(true),
            config,
        });

        let ingress = match shared.config.mode {
            SchedulingMode::Threaded => {
                let queue = Arc::new(IngressQueue::new(shared.config.ingress_capacity));
                let workers = match pump::spawn(Arc::clone(&shared), Arc::clone(&queue)) {
                    Ok(workers) => workers,
                    Err(err) => {
                        // Lets a thread that did start wind down.
                        shared.running.store(false, Ordering::Release);
                        return Err(err);
                    }
                };
                Ingress::Threaded {
                    queue,
                    workers: Mutex::new(workers),
                }
            }
            SchedulingMode::Cooperative => Ingress::Cooperative(Mutex::new(StepIngress::new(
                shared.config.max_frame_size,
                shared.config.ingress_capacity,
            ))),
        };

        info!(
            mode = ?shared.config.mode,
            memory_size = shared.config.memory_size,
            max_frame_size = shared.config.max_frame_size,
            "device opened"
        );
        Ok(Self { shared, ingress })
    }

    /// Write `data` into the peer's memory at `addr`. The peer does not
    /// answer writes, so success means the frame left this side.
    pub fn write_remote_memory(&self, addr: u16, data: &[u8]) -> Result<()> {
        self.ensure_running()?;
        let max = self.shared.config.max_write_len();
        if data.len() > max {
            return Err(DeviceError::PayloadTooLarge {
                size: data.len(),
                max,
            });
        }
        let request = Request::WriteMemory {
            addr,
            data: Bytes::copy_from_slice(data),
        };
        lock(&self.shared.writer).send(&request)?;
        debug!(addr, len = data.len(), "remote write sent");
        Ok(())
    }

    /// Read `len` bytes of the peer's memory at `addr`.
    ///
    /// The peer clamps reads running past its memory end, so fewer than `len`
    /// bytes may come back.
    pub fn read_remote_memory(&self, addr: u16, len: u16) -> Result<Bytes> {
        let max = self.shared.config.max_read_len();
        if usize::from(len) > max {
            return Err(DeviceError::PayloadTooLarge {
                size: usize::from(len),
                max,
            });
        }
        let body = self.transact(CallClass::ReadMemory, &Request::ReadMemory { addr, len })?;
        correlation::read_reply(addr, &body)
    }

    /// Invoke function `code` on the peer and return what it produced.
    pub fn call_remote_function(&self, code: u16, args: &[u8]) -> Result<Bytes> {
        let max = self.shared.config.max_call_args();
        if args.len() > max {
            return Err(DeviceError::PayloadTooLarge {
                size: args.len(),
                max,
            });
        }
        let request = Request::CallFunction {
            code,
            args: Bytes::copy_from_slice(args),
        };
        let body = self.transact(CallClass::CallFunction, &request)?;
        correlation::call_reply(code, &body)
    }

    /// Send `request` and wait for the reply body of `class`.
    fn transact(&self, class: CallClass, request: &Request) -> Result<Vec<u8>> {
        self.ensure_running()?;
        let slot = self.shared.correlator.slot(class);
        let _permit = slot.begin();

        lock(&self.shared.writer).send(request)?;
        let timeout = self.shared.config.call_timeout;
        let deadline = Instant::now() + timeout;

        let body = match &self.ingress {
            Ingress::Threaded { .. } => slot.wait_until(deadline)?,
            Ingress::Cooperative(ingress) => {
                let poll = self.shared.config.poll_interval;
                loop {
                    if let Some(body) = slot.try_take() {
                        break Some(body);
                    }
                    self.ensure_running()?;
                    let now = Instant::now();
                    if now >= deadline {
                        break None;
                    }
                    // Bounded so a concurrent caller of the other class gets
                    // a turn at the link.
                    let step_deadline = deadline.min(now + poll);
                    pump::step(&self.shared, &mut lock(ingress), step_deadline);
                }
            }
        };

        body.ok_or_else(|| {
            warn!(%class, ?timeout, "no reply");
            DeviceError::Timeout(timeout)
        })
    }

    /// Expose `handler` to the peer under `code`.
    pub fn register_function(&self, code: u16, handler: impl Handler) -> Result<()> {
        write(&self.shared.registry).register(code, Arc::new(handler))
    }

    /// Codes of all registered functions, ascending.
    pub fn list_registered_functions(&self) -> Vec<u16> {
        read(&self.shared.registry).codes()
    }

    /// Read the link until one frame has been processed or `deadline`
    /// passes. Only available in cooperative mode, where a pure responder
    /// calls this in a loop.
    pub fn process_one_frame_or_timeout(&self, deadline: Instant) -> Result<StepOutcome> {
        self.ensure_running()?;
        match &self.ingress {
            Ingress::Cooperative(ingress) => {
                Ok(pump::step(&self.shared, &mut lock(ingress), deadline))
            }
            Ingress::Threaded { .. } => Err(DeviceError::NotCooperative),
        }
    }

    /// Process frames for `duration`, returning how many were routed.
    pub fn serve_for(&self, duration: Duration) -> Result<usize> {
        let deadline = Instant::now() + duration;
        let mut routed = 0;
        while let StepOutcome::Processed { kind } = self.process_one_frame_or_timeout(deadline)? {
            routed += usize::from(kind.is_some());
        }
        Ok(routed)
    }

    /// Run `f` with the local memory space locked.
    pub fn with_memory<R>(&self, f: impl FnOnce(&mut MemorySpace) -> R) -> R {
        f(&mut lock(&self.shared.memory))
    }

    /// Bytes waiting in the reply buffer of `class`.
    pub fn pending_reply_bytes(&self, class: CallClass) -> usize {
        self.shared.correlator.slot(class).buffered()
    }

    pub fn stats(&self) -> DeviceStats {
        self.shared.stats.snapshot()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop ingress processing and join the background threads.
    ///
    /// Callers waiting for a reply and any later requests fail with
    /// [`DeviceError::Shutdown`]. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.correlator.close();
        if let Ingress::Threaded { queue, workers } = &self.ingress {
            queue.wake_all();
            for worker in lock(workers).drain(..) {
                if worker.join().is_err() {
                    warn!("ingress thread panicked");
                }
            }
        }
        info!("device shut down");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(DeviceError::Shutdown)
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown();
    }
}
