use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use iodp_device::{
    CallClass, Device, DeviceConfig, DeviceError, HandlerError, HandlerResult, StepOutcome,
};
use iodp_frame::{
    decode_frame, encode_message, kind, FrameParser, FrameWriter, Operation, Reply, Request,
    RingBuffer, DEFAULT_MAX_FRAME_SIZE,
};
use iodp_transport::{Link, MemoryLink, UdpLink};

fn quick() -> DeviceConfig {
    DeviceConfig {
        call_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(10),
        ..DeviceConfig::default()
    }
}

fn threaded_pair() -> (Device, Device) {
    let (a, b) = MemoryLink::pair();
    let master = Device::open(a, quick()).expect("master should open");
    let slave = Device::open(b, quick()).expect("slave should open");
    (master, slave)
}

fn sum_be(args: &[u8]) -> HandlerResult {
    let total: u32 = args.iter().map(|b| u32::from(*b)).sum();
    Ok(total.to_be_bytes().to_vec())
}

fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Read the next request frame a device sent to a raw link end.
fn next_request(link: &MemoryLink, ring: &mut RingBuffer, parser: &mut FrameParser) -> Request {
    let mut chunk = [0u8; 256];
    loop {
        if let Some(raw) = parser.next_frame(ring) {
            let frame = decode_frame(&raw).expect("device frames should verify");
            return Request::parse(&frame).expect("device should send requests");
        }
        let n = link.read(&mut chunk).expect("raw link read should succeed");
        ring.put(&chunk[..n]).expect("test ring should have room");
    }
}

/// Fails the first reads with `ConnectionReset`, then reads through.
struct FlakyLink {
    inner: MemoryLink,
    failures: Arc<AtomicUsize>,
}

impl FlakyLink {
    fn new(inner: MemoryLink, failures: &Arc<AtomicUsize>) -> Self {
        Self {
            inner,
            failures: Arc::clone(failures),
        }
    }
}

impl Link for FlakyLink {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(io::Error::from(io::ErrorKind::ConnectionReset));
        }
        self.inner.read(buf)
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.set_read_timeout(timeout)
    }
}

/// Hands out queued datagrams, cutting each to the read buffer the way a
/// UDP socket does. Writes go nowhere.
#[derive(Default)]
struct DatagramLink {
    inbound: Mutex<VecDeque<Vec<u8>>>,
}

impl Link for DatagramLink {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inbound.lock().unwrap().pop_front() {
            Some(datagram) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }
}

fn write_frame(addr: u16, data: &[u8]) -> BytesMut {
    let mut buf = BytesMut::new();
    encode_message(
        &Request::WriteMemory {
            addr,
            data: Bytes::copy_from_slice(data),
        },
        DEFAULT_MAX_FRAME_SIZE,
        &mut buf,
    )
    .unwrap();
    buf
}

#[test]
fn write_then_read_round_trip() {
    let (master, slave) = threaded_pair();
    let data: Vec<u8> = (0..100).collect();

    master.write_remote_memory(0, &data).expect("write should send");
    let read = master.read_remote_memory(0, 100).expect("read should succeed");

    assert_eq!(read.as_ref(), data.as_slice());
    slave.with_memory(|mem| assert_eq!(&mem.as_slice()[..100], data.as_slice()));
}

#[test]
fn read_at_memory_end_is_illegal_address() {
    let (master, _slave) = threaded_pair();

    let err = master.read_remote_memory(512, 10).unwrap_err();
    assert!(matches!(
        err,
        DeviceError::Remote {
            op: Operation::ReadMemory,
            code: kind::ERR_ILLEGAL_ADDRESS
        }
    ));
}

#[test]
fn read_past_end_is_clamped() {
    let (master, slave) = threaded_pair();
    slave.with_memory(|mem| mem.write(500, &[0xAB; 12]).expect("in range"));

    let read = master.read_remote_memory(500, 100).expect("read should succeed");
    assert_eq!(read.as_ref(), &[0xAB; 12]);
}

#[test]
fn write_past_end_keeps_in_range_prefix() {
    let (master, slave) = threaded_pair();

    master.write_remote_memory(510, &[1, 2, 3, 4]).expect("write should send");
    // Reads are processed after the write on the same stream.
    let read = master.read_remote_memory(508, 4).expect("read should succeed");
    assert_eq!(read.as_ref(), &[0, 0, 1, 2]);
    assert_eq!(slave.stats().requests_served, 2);
}

#[test]
fn call_sum_function() {
    let (master, slave) = threaded_pair();
    slave.register_function(0x0666, sum_be).expect("register");

    let ret = master
        .call_remote_function(0x0666, &[1, 2, 3])
        .expect("call should succeed");
    assert_eq!(u32::from_be_bytes(ret.as_ref().try_into().unwrap()), 6);
}

#[test]
fn call_unknown_function() {
    let (master, _slave) = threaded_pair();

    let err = master.call_remote_function(0xDEAD, &[]).unwrap_err();
    assert!(matches!(
        err,
        DeviceError::Remote {
            op: Operation::CallFunction,
            code: kind::ERR_UNKNOWN_FUNCTION
        }
    ));
}

#[test]
fn failing_and_oversized_functions() {
    let (master, slave) = threaded_pair();
    slave
        .register_function(1, |_: &[u8]| -> HandlerResult { Err(HandlerError::new("busy")) })
        .expect("register");
    slave
        .register_function(2, |_: &[u8]| -> HandlerResult { Ok(vec![0u8; 513]) })
        .expect("register");

    assert!(matches!(
        master.call_remote_function(1, b"x"),
        Err(DeviceError::Remote { code: kind::ERR_HANDLER_FAILED, .. })
    ));
    assert!(matches!(
        master.call_remote_function(2, b"x"),
        Err(DeviceError::Remote { code: kind::ERR_RETURN_OVERFLOW, .. })
    ));
}

#[test]
fn both_sides_serve_and_call() {
    let (left, right) = threaded_pair();
    left.register_function(0x0001, |args: &[u8]| -> HandlerResult { Ok(args.to_vec()) })
        .expect("register");
    right.register_function(0x0666, sum_be).expect("register");

    assert_eq!(
        left.call_remote_function(0x0666, &[10, 20]).unwrap().as_ref(),
        &30u32.to_be_bytes()
    );
    assert_eq!(
        right.call_remote_function(0x0001, b"echo").unwrap().as_ref(),
        b"echo"
    );
}

#[test]
fn timed_out_read_leaves_buffer_empty() {
    let (a, _silent) = MemoryLink::pair();
    let config = DeviceConfig {
        call_timeout: Duration::from_millis(100),
        ..quick()
    };
    let master = Device::open(a, config).expect("open");

    let start = Instant::now();
    let err = master.read_remote_memory(0, 4).unwrap_err();
    assert!(matches!(err, DeviceError::Timeout(_)));
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(master.pending_reply_bytes(CallClass::ReadMemory), 0);
}

#[test]
fn late_reply_does_not_answer_next_read() {
    let (a, b) = MemoryLink::pair();
    let raw = Arc::new(b);
    let config = DeviceConfig {
        call_timeout: Duration::from_millis(200),
        ..quick()
    };
    let master = Device::open(a, config).expect("open");

    let mut ring = RingBuffer::new(1024);
    let mut parser = FrameParser::default();

    assert!(matches!(
        master.read_remote_memory(0, 2),
        Err(DeviceError::Timeout(_))
    ));
    assert_eq!(
        next_request(&raw, &mut ring, &mut parser),
        Request::ReadMemory { addr: 0, len: 2 }
    );

    // The answer to the abandoned read shows up late.
    let mut writer = FrameWriter::new(Arc::clone(&raw));
    writer
        .send(&Reply::Read {
            addr: 0,
            data: Bytes::from_static(b"no"),
        })
        .expect("raw send");
    wait_for("stale reply to be buffered", || {
        master.pending_reply_bytes(CallClass::ReadMemory) > 0
    });

    let responder = {
        let raw = Arc::clone(&raw);
        thread::spawn(move || {
            let request = next_request(&raw, &mut ring, &mut parser);
            assert_eq!(request, Request::ReadMemory { addr: 4, len: 2 });
            FrameWriter::new(raw)
                .send(&Reply::Read {
                    addr: 4,
                    data: Bytes::from_static(b"ok"),
                })
                .expect("raw send");
        })
    };

    let read = master.read_remote_memory(4, 2).expect("fresh reply");
    assert_eq!(read.as_ref(), b"ok");
    responder.join().unwrap();
}

#[test]
fn garbage_and_corrupt_frames_are_skipped() {
    let (a, b) = MemoryLink::pair();
    let slave = Device::open(b, quick()).expect("open");

    let mut corrupt = write_frame(0, b"bad");
    let last = corrupt.len() - 1;
    corrupt[last] ^= 0xFF;

    a.write(&[0x00, 0x13, 0x37, 0xEB, 0x00]).unwrap();
    a.write(&corrupt).unwrap();
    a.write(&write_frame(16, b"good")).unwrap();

    wait_for("valid write to land", || {
        slave.with_memory(|mem| &mem.as_slice()[16..20] == b"good")
    });
    slave.with_memory(|mem| assert_eq!(&mem.as_slice()[..3], &[0, 0, 0]));

    let stats = slave.stats();
    assert_eq!(stats.frames_dropped, 1);
    assert_eq!(stats.frames_routed, 1);
    assert!(stats.skipped_bytes >= 3);
    assert!(stats.rejected_frames >= 1);
}

#[test]
fn concurrent_read_and_call_classes() {
    let (master, slave) = threaded_pair();
    slave.register_function(0x0666, sum_be).expect("register");
    slave.with_memory(|mem| mem.as_mut_slice()[..8].copy_from_slice(b"abcdefgh"));

    let master = Arc::new(master);
    let readers: Vec<_> = (0..2)
        .map(|_| {
            let master = Arc::clone(&master);
            thread::spawn(move || {
                for _ in 0..20 {
                    assert_eq!(master.read_remote_memory(2, 3).unwrap().as_ref(), b"cde");
                }
            })
        })
        .collect();
    for n in 0..20u8 {
        let ret = master.call_remote_function(0x0666, &[n, 1]).unwrap();
        assert_eq!(ret.as_ref(), &(u32::from(n) + 1).to_be_bytes());
    }
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn cooperative_pair() {
    let (a, b) = MemoryLink::pair();
    let slave = Arc::new(Device::open(b, DeviceConfig::cooperative()).expect("open"));
    let master = Device::open(a, DeviceConfig::cooperative()).expect("open");
    slave.register_function(0x0666, sum_be).expect("register");

    let stop = Arc::new(AtomicBool::new(false));
    let server = {
        let slave = Arc::clone(&slave);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                slave
                    .serve_for(Duration::from_millis(20))
                    .expect("serve should not fail");
            }
        })
    };

    master.write_remote_memory(8, b"coop").unwrap();
    assert_eq!(master.read_remote_memory(8, 4).unwrap().as_ref(), b"coop");
    assert_eq!(
        master.call_remote_function(0x0666, &[4, 5, 6]).unwrap().as_ref(),
        &15u32.to_be_bytes()
    );

    stop.store(true, Ordering::Release);
    server.join().unwrap();
    assert_eq!(slave.stats().requests_served, 3);
}

#[test]
fn cooperative_step_times_out_without_input() {
    let (a, _b) = MemoryLink::pair();
    let device = Device::open(a, DeviceConfig::cooperative()).expect("open");

    let outcome = device
        .process_one_frame_or_timeout(Instant::now() + Duration::from_millis(30))
        .unwrap();
    assert_eq!(outcome, StepOutcome::TimedOut);
}

#[test]
fn cooperative_step_routes_one_frame() {
    let (a, b) = MemoryLink::pair();
    let device = Device::open(a, DeviceConfig::cooperative()).expect("open");
    FrameWriter::new(b)
        .send(&Request::WriteMemory {
            addr: 1,
            data: Bytes::from_static(&[9]),
        })
        .unwrap();

    let outcome = device
        .process_one_frame_or_timeout(Instant::now() + Duration::from_secs(2))
        .unwrap();
    assert_eq!(
        outcome,
        StepOutcome::Processed {
            kind: Some(kind::WRITE_REQUEST)
        }
    );
    device.with_memory(|mem| assert_eq!(mem.as_slice()[1], 9));
}

#[test]
fn stepping_a_threaded_device_is_rejected() {
    let (master, _slave) = threaded_pair();
    assert!(matches!(
        master.process_one_frame_or_timeout(Instant::now()),
        Err(DeviceError::NotCooperative)
    ));
}

#[test]
fn oversized_requests_rejected_locally() {
    let (master, _slave) = threaded_pair();
    let max = master.config().max_write_len();

    assert!(matches!(
        master.write_remote_memory(0, &vec![0u8; max + 1]),
        Err(DeviceError::PayloadTooLarge { .. })
    ));
    assert!(matches!(
        master.read_remote_memory(0, 600),
        Err(DeviceError::PayloadTooLarge { size: 600, max: 512 })
    ));
}

#[test]
fn registered_functions_are_listed() {
    let (master, _slave) = threaded_pair();
    master.register_function(0x0300, sum_be).unwrap();
    master.register_function(0x0001, sum_be).unwrap();

    assert_eq!(master.list_registered_functions(), vec![0x0001, 0x0300]);
    assert!(matches!(
        master.register_function(0x0001, sum_be),
        Err(DeviceError::DuplicateFunction(0x0001))
    ));
}

#[test]
fn shut_down_device_refuses_requests() {
    let (master, _slave) = threaded_pair();
    master.shutdown();
    master.shutdown();

    assert!(!master.is_running());
    assert!(matches!(
        master.write_remote_memory(0, b"x"),
        Err(DeviceError::Shutdown)
    ));
}

#[test]
fn invalid_config_rejected_on_open() {
    let (a, _b) = MemoryLink::pair();
    let config = DeviceConfig {
        ingress_capacity: 16,
        ..DeviceConfig::default()
    };
    assert!(matches!(
        Device::open(a, config),
        Err(DeviceError::InvalidConfig(_))
    ));
}

#[test]
fn udp_loopback_pair() {
    let left = UdpLink::bind("127.0.0.1:0").expect("bind");
    let right = UdpLink::bind("127.0.0.1:0").expect("bind");
    left.connect(right.local_addr().unwrap()).expect("connect");
    right.connect(left.local_addr().unwrap()).expect("connect");

    let master = Device::open(left, quick()).expect("open");
    let slave = Device::open(right, quick()).expect("open");
    slave.register_function(0x0666, sum_be).unwrap();

    master.write_remote_memory(32, b"udp").unwrap();
    assert_eq!(master.read_remote_memory(32, 3).unwrap().as_ref(), b"udp");
    assert_eq!(
        master.call_remote_function(0x0666, &[1, 2, 3]).unwrap().as_ref(),
        &6u32.to_be_bytes()
    );
}

#[test]
fn memory_boundaries_round_trip_and_clamp() {
    const SIZE: usize = 512;
    let cases = [
        (0u16, 1u16),
        (0, 512),
        (511, 1),
        (511, 2),
        (100, 412),
        (100, 413),
        (512, 1),
    ];

    for (addr, len) in cases {
        let (master, slave) = threaded_pair();
        let start = usize::from(addr).min(SIZE);
        let data: Vec<u8> = (0..len).map(|i| (i as u8) ^ 0x5A).collect();
        // Only the part below the memory end lands.
        let landed = (SIZE - start).min(data.len());

        // Writing the same bytes twice leaves the same memory.
        for _ in 0..2 {
            master.write_remote_memory(addr, &data).unwrap();
            let read = master.read_remote_memory(addr, len);
            if usize::from(addr) >= SIZE {
                assert!(
                    matches!(
                        read,
                        Err(DeviceError::Remote {
                            op: Operation::ReadMemory,
                            code: kind::ERR_ILLEGAL_ADDRESS
                        })
                    ),
                    "({addr}, {len}) should be an illegal address"
                );
            } else {
                assert_eq!(
                    read.unwrap().as_ref(),
                    &data[..landed],
                    "({addr}, {len}) read back"
                );
            }
        }

        slave.with_memory(|mem| {
            let mem = mem.as_slice();
            assert_eq!(&mem[start..start + landed], &data[..landed]);
            assert!(mem[..start].iter().all(|b| *b == 0));
            assert!(mem[start + landed..].iter().all(|b| *b == 0));
        });
    }
}

#[test]
fn shutdown_wakes_a_waiting_caller() {
    for config in [quick(), DeviceConfig::cooperative()] {
        let (a, _silent) = MemoryLink::pair();
        let config = DeviceConfig {
            call_timeout: Duration::from_secs(3),
            ..config
        };
        let master = Arc::new(Device::open(a, config).expect("open"));

        let waiter = {
            let master = Arc::clone(&master);
            thread::spawn(move || {
                let start = Instant::now();
                let result = master.read_remote_memory(0, 4);
                (result, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(100));
        master.shutdown();

        let (result, waited) = waiter.join().unwrap();
        assert!(matches!(result, Err(DeviceError::Shutdown)), "{result:?}");
        assert!(waited < Duration::from_secs(2), "waited {waited:?}");
    }
}

#[test]
fn threaded_pump_retries_failed_link_reads() {
    let (a, b) = MemoryLink::pair();
    let master_failures = Arc::new(AtomicUsize::new(5));
    let slave_failures = Arc::new(AtomicUsize::new(5));
    let master = Device::open(FlakyLink::new(a, &master_failures), quick()).expect("open");
    let slave = Device::open(FlakyLink::new(b, &slave_failures), quick()).expect("open");
    slave.register_function(0x0666, sum_be).unwrap();

    master.write_remote_memory(4, b"flaky").unwrap();
    assert_eq!(master.read_remote_memory(4, 5).unwrap().as_ref(), b"flaky");
    assert_eq!(
        master.call_remote_function(0x0666, &[1, 2]).unwrap().as_ref(),
        &3u32.to_be_bytes()
    );

    assert_eq!(master_failures.load(Ordering::SeqCst), 0);
    assert_eq!(slave_failures.load(Ordering::SeqCst), 0);
    assert!(slave.is_running());
}

#[test]
fn cooperative_step_retries_failed_link_reads() {
    let (a, b) = MemoryLink::pair();
    let master_failures = Arc::new(AtomicUsize::new(5));
    let slave_failures = Arc::new(AtomicUsize::new(5));
    let master = Device::open(
        FlakyLink::new(a, &master_failures),
        DeviceConfig::cooperative(),
    )
    .expect("open");
    let slave = Arc::new(
        Device::open(
            FlakyLink::new(b, &slave_failures),
            DeviceConfig::cooperative(),
        )
        .expect("open"),
    );

    let stop = Arc::new(AtomicBool::new(false));
    let server = {
        let slave = Arc::clone(&slave);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                slave
                    .serve_for(Duration::from_millis(20))
                    .expect("serve should not fail");
            }
        })
    };

    master.write_remote_memory(4, b"flaky").unwrap();
    assert_eq!(master.read_remote_memory(4, 5).unwrap().as_ref(), b"flaky");

    stop.store(true, Ordering::Release);
    server.join().unwrap();
    assert_eq!(master_failures.load(Ordering::SeqCst), 0);
    assert_eq!(slave_failures.load(Ordering::SeqCst), 0);
}

#[test]
fn cooperative_step_keeps_datagram_tail() {
    let first = write_frame(0, &[0xAA; 500]);
    let second = write_frame(1, &[0x55; 511]);

    // The first datagram leaves a partial frame in the ring, so the second
    // is larger than the room left.
    let split = first.len() - 2;
    let mut tail = first[split..].to_vec();
    tail.extend_from_slice(&second);
    let link = DatagramLink::default();
    {
        let mut inbound = link.inbound.lock().unwrap();
        inbound.push_back(first[..split].to_vec());
        inbound.push_back(tail);
    }

    let device = Device::open(link, DeviceConfig::cooperative()).expect("open");
    for _ in 0..2 {
        let outcome = device
            .process_one_frame_or_timeout(Instant::now() + Duration::from_secs(2))
            .unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Processed {
                kind: Some(kind::WRITE_REQUEST)
            }
        );
    }

    device.with_memory(|mem| {
        assert_eq!(mem.as_slice()[0], 0xAA);
        assert!(mem.as_slice()[1..].iter().all(|b| *b == 0x55));
    });
    assert_eq!(device.stats().frames_dropped, 0);
}
