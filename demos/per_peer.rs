//! Per-peer budgets: one bucket per destination, bounded memory, and
//! background cleanup.

use shaper::{BucketConfig, PeerBucketManager};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn main() {
    println!("=== Per-Peer Shaping Example ===\n");

    // Every destination gets 2 KiB/s with a one-second burst, and
    // peers idle for 250ms are swept every 500ms.
    let manager = Arc::new(
        PeerBucketManager::with_cleanup_settings(BucketConfig::kbps(2.0), 500, 250)
            .expect("valid config"),
    );

    let peers: Vec<SocketAddr> = vec![
        "203.0.113.7:4500".parse().expect("peer addr"),
        "203.0.113.9:4500".parse().expect("peer addr"),
        "198.51.100.2:9000".parse().expect("peer addr"),
    ];

    println!("1. Independent budgets (2048 B/s, 2048-byte burst each):");
    for peer in &peers {
        for i in 1..=3 {
            if manager.try_consume(*peer, 1024.0).expect("probe") {
                println!("   {} - datagram {} (1024B) ✅ sent", peer, i);
            } else {
                println!("   {} - datagram {} (1024B) ❌ throttled", peer, i);
            }
        }
        println!();
    }

    println!("2. Blocking until one peer's budget recovers:");
    let start = Instant::now();
    manager.consume(peers[0], 512.0).expect("consume");
    println!(
        "   512B for {} granted after {:?} (other peers were never delayed)",
        peers[0],
        start.elapsed()
    );

    println!("\n3. Background cleanup:");
    let (handle, stop_tx) = manager.clone().start_stoppable_cleanup_thread();
    println!("   {} peers tracked", manager.active_peers());

    thread::sleep(Duration::from_millis(800));
    println!(
        "   After the idle sweep: {} peers tracked",
        manager.active_peers()
    );

    stop_tx.send(()).expect("stop cleanup thread");
    handle.join().expect("join cleanup thread");

    println!("\n4. Manager statistics:");
    println!("{}", manager.stats().summary());
}
