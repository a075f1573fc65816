//! Benchmark for the container layout planner
//!
//! Target: a 24-disk node planned well under a millisecond

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use edgefs_operator::deployment::store_config::StoreConfig;
use edgefs_operator::deployment::{get_containers_rt_devices, plan_containers};
use edgefs_operator::domain::devices::LocalDisk;

const TB: u64 = 1_000_000_000_000;

fn node_disks(hdds: usize, ssds: usize) -> Vec<LocalDisk> {
    let disk = |name: String, size: u64, rotational: bool| LocalDisk {
        dev_links: format!("/dev/disk/by-id/ata-{}", name),
        name,
        size,
        rotational,
        empty: true,
        ..Default::default()
    };
    (0..hdds)
        .map(|i| disk(format!("hdd{:02}", i), 8 * TB, true))
        .chain((0..ssds).map(|i| disk(format!("ssd{:02}", i), 2 * TB, false)))
        .collect()
}

fn bench_plan_containers(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout_planner");
    let offload = StoreConfig {
        use_metadata_offload: true,
        ..Default::default()
    };

    for (hdds, ssds) in [(4, 1), (12, 2), (24, 4)] {
        let disks = node_disks(hdds, ssds);
        group.throughput(Throughput::Elements(disks.len() as u64));

        group.bench_with_input(
            BenchmarkId::new("hdd_only", hdds),
            &disks[..hdds],
            |b, disks| {
                b.iter(|| plan_containers(black_box("node-001"), black_box(disks), 0, &StoreConfig::default()));
            },
        );

        group.bench_with_input(
            BenchmarkId::new("metadata_offload", hdds + ssds),
            &disks,
            |b, disks| {
                b.iter(|| plan_containers(black_box("node-001"), black_box(disks), 0, &offload));
            },
        );
    }

    group.finish();
}

fn bench_rt_devices(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout_planner");
    let disks = node_disks(24, 4);
    let offload = StoreConfig {
        use_metadata_offload: true,
        ..Default::default()
    };
    group.throughput(Throughput::Elements(disks.len() as u64));

    group.bench_function("rt_devices_24_hdd_4_ssd", |b| {
        b.iter(|| get_containers_rt_devices(black_box("node-001"), 0, black_box(&disks), &offload));
    });

    group.finish();
}

criterion_group!(benches, bench_plan_containers, bench_rt_devices);
criterion_main!(benches);
