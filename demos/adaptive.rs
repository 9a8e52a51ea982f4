//! Adaptive shaping walkthrough: estimator warm-up, retargeting, and
//! hysteresis over a loopback socket.

use shaper::ShaperBuilder;
use std::net::UdpSocket;
use std::time::{Duration, Instant};

fn main() {
    println!("=== Adaptive Shaping Example ===\n");

    let sender = UdpSocket::bind("127.0.0.1:0").expect("bind sender");
    let receiver = UdpSocket::bind("127.0.0.1:0").expect("bind receiver");
    let dst = receiver.local_addr().expect("receiver addr");
    receiver
        .set_read_timeout(Some(Duration::from_secs(1)))
        .expect("read timeout");

    // Shape to half of whatever the link currently carries, measured
    // over a one-second sliding window.
    let transport = ShaperBuilder::new()
        .limit_ratio(0.5)
        .window_seconds(1.0)
        .wrap(sender);

    println!("1. Cold start:");
    println!("   is_shaping: {}", transport.is_shaping());

    // Zero-length keepalives carry no bytes, so the estimator stays
    // cold and nothing is delayed.
    for _ in 0..3 {
        transport.send(b"", dst).expect("send");
    }
    println!(
        "   After 3 empty keepalives: is_shaping={}, unshaped_sends={}",
        transport.is_shaping(),
        transport.unshaped_sends()
    );

    println!("\n2. Warm-up:");
    transport.send(&[0u8; 4096], dst).expect("send");
    println!("   First data send produced a measurement and a bucket.");
    println!("   The new bucket starts full, so that send was not delayed.");
    println!(
        "   measured: {:.0} B/s, target: {:?} B/s",
        transport.measured_rate().unwrap_or(0.0),
        transport.target_rate()
    );

    println!("\n3. Retargeting on load change:");
    // Doubling the offered load moves the candidate far outside the
    // 10% band, so the bucket is retargeted (and refilled).
    transport.send(&[0u8; 4096], dst).expect("send");
    println!(
        "   measured: {:.0} B/s, target: {:?} B/s",
        transport.measured_rate().unwrap_or(0.0),
        transport.target_rate()
    );

    println!("\n4. Enforcement:");
    // The retarget drained into the last send, so this one waits for
    // refill at the target rate.
    let start = Instant::now();
    transport.send(&[0u8; 512], dst).expect("send");
    println!("   512B send granted after {:?}", start.elapsed());

    println!("\n5. Hysteresis:");
    let before = transport.target_rate();
    transport.send(&[0u8; 64], dst).expect("send");
    let after = transport.target_rate();
    println!(
        "   Small send moved the candidate by <10%: target {:?} -> {:?}",
        before, after
    );

    // Drain the receiver so nothing is left queued.
    let mut buf = [0u8; 8192];
    let mut received = 0usize;
    while received < 4096 + 4096 + 512 + 64 {
        let (n, _) = receiver.recv_from(&mut buf).expect("recv");
        received += n;
    }
    println!("\n   Receiver drained {} bytes total", received);

    if let Some(metrics) = transport.metrics() {
        println!("\n{}", metrics.summary());
    }

    transport.close().expect("close");
}
