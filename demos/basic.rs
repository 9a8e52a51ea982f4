//! Basic usage example for the shaper crate.

use shaper::{BucketConfig, ShaperBuilder, TokenBucket};
use std::net::UdpSocket;
use std::time::{Duration, Instant};

fn main() {
    println!("=== Basic Bandwidth Shaping Example ===\n");

    // Example 1: Simple token bucket
    simple_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 2: Custom configuration
    custom_config_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 3: Blocking backpressure
    blocking_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 4: Shaped UDP transport
    transport_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 5: Monitoring, retargeting, reset
    metrics_example();
}

fn simple_example() {
    println!("1. Simple Token Bucket:");

    // 1 KB/s with a four-second burst budget of 4096 bytes.
    let bucket = TokenBucket::new(1024.0, 4.0).expect("valid bucket");

    println!("   Created bucket: 1024 B/s, 4096-byte burst");

    let mut sent = 0;
    let mut throttled = 0;

    for i in 1..=6 {
        if bucket.try_consume(1024.0).expect("valid amount") {
            sent += 1;
            println!("   Datagram {} (1024B) - ✅ Sent", i);
        } else {
            throttled += 1;
            println!("   Datagram {} (1024B) - ❌ Throttled", i);
        }
    }

    println!("   Results: {} sent, {} throttled", sent, throttled);
}

fn custom_config_example() {
    println!("2. Custom Configuration:");

    // 256 KiB/s with a two-second burst window.
    let config = BucketConfig::kbps(256.0).with_burst_seconds(2.0);

    println!("   Configuration:");
    println!("   - Rate: {:.0} B/s", config.rate_bytes_per_sec());
    println!("   - Burst capacity: {:.0} bytes", config.capacity_bytes());

    let bucket = TokenBucket::from_config(&config).expect("valid config");

    // Drain the burst budget in MTU-sized chunks.
    let mut burst_bytes = 0u64;
    while bucket.try_consume(1500.0).expect("valid amount") {
        burst_bytes += 1500;
    }

    println!(
        "   Burst test: {} bytes accepted before the first throttle",
        burst_bytes
    );
}

fn blocking_example() {
    println!("3. Blocking Backpressure:");

    // 2 KB/s with only half a second of burst: 1024 bytes.
    let bucket = TokenBucket::new(2048.0, 0.5).expect("valid bucket");

    println!("   Bucket: 2048 B/s, 1024-byte burst");

    let start = Instant::now();
    for i in 1..=3 {
        bucket.consume(1024.0).expect("consume");
        println!("   Chunk {} (1024B) granted at t={:?}", i, start.elapsed());
    }

    println!(
        "   3072 bytes took {:?} (the burst is free, the rest is paced)",
        start.elapsed()
    );
}

fn transport_example() {
    println!("4. Shaped UDP Transport:");

    let sender = UdpSocket::bind("127.0.0.1:0").expect("bind sender");
    let receiver = UdpSocket::bind("127.0.0.1:0").expect("bind receiver");
    let dst = receiver.local_addr().expect("receiver addr");
    receiver
        .set_read_timeout(Some(Duration::from_secs(1)))
        .expect("read timeout");

    // 8 KiB/s with a 2048-byte burst.
    let transport = ShaperBuilder::new()
        .rate_kbps(8.0)
        .burst_seconds(0.25)
        .wrap(sender);

    let payload = [0u8; 2048];
    let start = Instant::now();
    for i in 1..=3 {
        transport.send(&payload, dst).expect("send");
        println!("   Datagram {} (2048B) sent at t={:?}", i, start.elapsed());
    }

    let mut buf = [0u8; 4096];
    let mut received = 0usize;
    while received < 3 * 2048 {
        let (n, _) = receiver.recv_from(&mut buf).expect("recv");
        received += n;
    }

    println!("   Receiver got {} bytes, paced to ~8 KiB/s", received);

    transport.close().expect("close");
}

fn metrics_example() {
    println!("5. Monitoring, Retargeting, and Reset:");

    // 4 KB/s with a 2048-byte burst.
    let bucket = TokenBucket::new(4096.0, 0.5).expect("valid bucket");

    // Two of these fit the burst; the rest are throttled.
    for _ in 0..5 {
        let _ = bucket.try_consume(1024.0).expect("probe");
    }

    let metrics = bucket.metrics();

    println!("   Shaping Metrics:");
    println!("   - Requests: {}", metrics.total_requests);
    println!("   - Throttle rate: {:.2}%", metrics.throttle_rate() * 100.0);
    println!(
        "   - Tokens: {:.0}/{:.0} bytes",
        metrics.current_tokens, metrics.capacity
    );
    println!(
        "   - Consecutive throttled: {}",
        metrics.consecutive_throttled
    );

    let health = metrics.health_status();
    println!("   - Health status: {}", health);
    println!("   - Suggested action: {}", health.suggested_action());

    println!("\n   Retargeting to 8192 B/s...");
    bucket.retarget(8192.0, 8192.0).expect("retarget");
    println!(
        "   - Rate is now {:.0} B/s with a full {:.0}-byte budget",
        bucket.rate(),
        bucket.available()
    );

    println!("\n   Resetting counters...");
    bucket.reset();

    let metrics = bucket.metrics();
    println!(
        "   - After reset: {} requests, {:.0}/{:.0} tokens",
        metrics.total_requests, metrics.current_tokens, metrics.capacity
    );
}
