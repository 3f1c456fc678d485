//! Framed SPSC ring throughput benchmark.
//!
//! Usage:
//!     cargo run --release --bin ring_bench
//!
//! Environment variables:
//!     PRODUCER_CPU=0  Pin producer to CPU 0 (default: 0)
//!     CONSUMER_CPU=2  Pin consumer to CPU 2 (default: 2)

use std::env;
use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use coil::ring::spsc;

const RING_BYTES: usize = 1 << 20;
const ITERATIONS: u64 = 1 << 22;
const PAYLOAD_LEN: usize = 8;

fn get_cpu_affinity() -> (Option<usize>, Option<usize>) {
    let producer_cpu = env::var("PRODUCER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(0));
    let consumer_cpu = env::var("CONSUMER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(2));
    (producer_cpu, consumer_cpu)
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

fn bench_throughput(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    let (producer, consumer) = spsc::channel::<RING_BYTES>();

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();

    let consumer_thread = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        ready_clone.store(true, Ordering::Release);

        for expected in 0..ITERATIONS {
            loop {
                if let Some(payload) = consumer.pop() {
                    let value = u64::from_le_bytes(payload.try_into().unwrap());
                    assert_eq!(value, expected, "data corruption");
                    break;
                }
                hint::spin_loop();
            }
        }
    });

    while !ready.load(Ordering::Acquire) {
        hint::spin_loop();
    }

    pin_to_cpu(producer_cpu);

    let start = Instant::now();

    for i in 0..ITERATIONS {
        let payload = i.to_le_bytes();
        while producer.push(&payload).is_err() {
            hint::spin_loop();
        }
    }

    consumer_thread.join().unwrap();
    let elapsed = start.elapsed();

    let msgs_per_ms = ITERATIONS as u128 * 1_000_000 / elapsed.as_nanos();
    let mib_per_s = (ITERATIONS as u128 * (PAYLOAD_LEN + 8) as u128 * 1_000_000_000)
        / (elapsed.as_nanos() * 1024 * 1024);
    println!("{msgs_per_ms} msgs/ms, {mib_per_s} MiB/s framed");
}

fn main() {
    coil::init_tracing();
    let (producer_cpu, consumer_cpu) = get_cpu_affinity();

    println!("coil framed SPSC (ring={RING_BYTES} bytes, iters={ITERATIONS}):");
    bench_throughput(producer_cpu, consumer_cpu);
}
