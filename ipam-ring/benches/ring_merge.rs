use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ipam_ring::Ring;
use ipam_types::{Addr, PeerName, Range};

fn build_ring(peer_count: u64) -> Ring {
    let universe = Range::new(Addr(0), Addr(1 << 20));
    let peers: Vec<PeerName> = (0..peer_count).map(PeerName::new).collect();
    let mut ring = Ring::new(universe, peers[0]);
    ring.claim_for_peers(&peers).unwrap();
    ring
}

fn bench_merge(c: &mut Criterion) {
    let a = build_ring(64);
    let mut b = a.clone();
    b.grant_range(Addr(0), Addr(1024), PeerName::new(63)).unwrap();

    c.bench_function("ring_merge_64_peers", |bencher| {
        bencher.iter(|| {
            let mut target = a.clone();
            target.merge(black_box(&b)).unwrap();
            black_box(target);
        });
    });
}

criterion_group!(benches, bench_merge);
criterion_main!(benches);
