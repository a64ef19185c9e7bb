//! Relay and group hot-path benchmarks
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;

fn bench_udp_classifier(c: &mut Criterion) {
    use mihomo_outbound::proxy::{classify_udp_chain, HopCapability};
    use mihomo_outbound::ProxyType;

    let raw = vec![
        HopCapability::new(ProxyType::Socks5, true),
        HopCapability::new(ProxyType::Shadowsocks, true),
        HopCapability::new(ProxyType::WireGuard, true),
    ];
    let mixed = vec![
        HopCapability::new(ProxyType::Http, false),
        HopCapability::new(ProxyType::Vmess, true),
        HopCapability::new(ProxyType::Trojan, true),
        HopCapability::new(ProxyType::Socks5, true),
        HopCapability::new(ProxyType::Shadowsocks, true),
    ];

    let mut group = c.benchmark_group("udp_classifier");
    group.throughput(Throughput::Elements(1));

    group.bench_function("raw_relay", |b| {
        b.iter(|| black_box(classify_udp_chain(black_box(&raw))))
    });

    group.bench_function("tcp_boundary", |b| {
        b.iter(|| black_box(classify_udp_chain(black_box(&mixed))))
    });

    group.finish();
}

fn bench_proxy_cache(c: &mut Criterion) {
    use mihomo_outbound::outbound::Reject;
    use mihomo_outbound::provider::{HealthCheck, InlineProvider, ProxyProvider, VehicleType};
    use mihomo_outbound::proxy::ProxyCache;
    use mihomo_outbound::OutboundProxy;
    use std::time::Duration;

    let proxies: Vec<Arc<dyn OutboundProxy>> = (0..64)
        .map(|i| Arc::new(Reject::with_name(format!("proxy-{}", i))) as Arc<dyn OutboundProxy>)
        .collect();
    let provider: Arc<dyn ProxyProvider> = Arc::new(InlineProvider::new(
        "pool".to_string(),
        VehicleType::Inline,
        proxies,
        Arc::new(HealthCheck::new(String::new(), Duration::ZERO, true)),
    ));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let cached = ProxyCache::new(vec![provider.clone()]);
    let uncached = ProxyCache::with_ttl(vec![provider], Duration::ZERO);

    let mut group = c.benchmark_group("proxy_cache");
    group.throughput(Throughput::Elements(1));

    group.bench_function("cache_hit", |b| {
        b.iter(|| black_box(runtime.block_on(cached.proxies(false))))
    });

    group.bench_function("refresh", |b| {
        b.iter(|| black_box(runtime.block_on(uncached.proxies(true))))
    });

    group.finish();
}

fn bench_addr_to_metadata(c: &mut Criterion) {
    use mihomo_outbound::addr_to_metadata;

    let mut group = c.benchmark_group("hop_metadata");
    group.throughput(Throughput::Elements(1));

    group.bench_function("ip_literal", |b| {
        b.iter(|| black_box(addr_to_metadata(black_box("10.0.0.1:8388"))))
    });

    group.bench_function("domain", |b| {
        b.iter(|| black_box(addr_to_metadata(black_box("relay.example.com:443"))))
    });

    group.finish();
}

criterion_group!(benches, bench_udp_classifier, bench_proxy_cache, bench_addr_to_metadata);
criterion_main!(benches);
