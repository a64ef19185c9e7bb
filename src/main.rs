//! Mihomo Outbound - CLI Entry Point
//!
//! Loads a configuration, builds its proxy groups and prints their status.
//! With `--target` it also dials through one proxy or group and reports the
//! chain the connection went through.

// Use mimalloc as global allocator for better p99 latency
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Context;
use clap::Parser;
use mihomo_outbound::common::Network;
use mihomo_outbound::dns::{DnsLookup, Resolver};
use mihomo_outbound::outbound::SystemDialer;
use mihomo_outbound::{
    addr_to_metadata, build_groups, Config, DialOptions, Dialer, OutboundProxy, ProxyGroup,
    ProxyManager, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "mihomo-outbound")]
#[command(author = "Tsang")]
#[command(version = VERSION)]
#[command(about = "Inspect and exercise mihomo fallback and relay groups")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', short_alias = 'f', long = "config", default_value = "config.yaml")]
    config: PathBuf,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Proxy or group to dial through
    #[arg(short = 'g', long = "group", requires = "target")]
    group: Option<String>,

    /// Destination as host:port
    #[arg(long = "target")]
    target: Option<String>,

    /// Open a UDP channel instead of a TCP connection
    #[arg(long = "udp")]
    udp: bool,

    /// Emit logs as JSON
    #[arg(long = "json-log")]
    json_log: bool,
}

fn init_logging(json: bool, level: Option<&str>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!("mihomo_outbound={}", level.unwrap_or("info")))
    })?;

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("mihomo-worker")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load_async(&args.config)
        .await
        .with_context(|| format!("loading {}", args.config.display()))?;
    init_logging(args.json_log, config.log_level.as_deref())?;

    info!("Mihomo Outbound v{}", VERSION);
    info!("Loaded configuration from: {}", args.config.display());

    if args.test {
        info!("Configuration test passed");
        return Ok(());
    }

    let resolver: Arc<dyn DnsLookup> = Arc::new(Resolver::new(&config.dns)?);
    let dialer: Arc<dyn Dialer> = Arc::new(SystemDialer::with_resolver(resolver.clone()));

    let mut manager = ProxyManager::new(&config.proxies, dialer.clone())?;
    info!("Loaded {} proxies", manager.len());

    let groups = build_groups(&config, &mut manager, dialer, resolver)?;
    for group in &groups {
        for provider in group.providers() {
            provider.initial().await?;
        }
    }

    for group in &groups {
        println!("{}: {}", group.name(), serde_json::to_string(&group.status().await)?);
    }

    let result = match &args.target {
        Some(target) => dial(&manager, args.group.as_deref(), target, args.udp).await,
        None => Ok(()),
    };

    for group in &groups {
        for provider in group.providers() {
            provider.close().await;
        }
        group.cleanup();
    }

    if let Err(e) = &result {
        error!("Dial failed: {:#}", e);
    }
    result
}

async fn dial(manager: &ProxyManager, via: Option<&str>, target: &str, udp: bool) -> anyhow::Result<()> {
    let via = via.unwrap_or("DIRECT");
    let proxy = manager
        .get(via)
        .with_context(|| format!("no proxy or group named {}", via))?;

    let mut metadata = addr_to_metadata(target)?;
    let opts = DialOptions::default();

    if udp {
        metadata.network = Network::Udp;
        let pc = proxy.listen_udp(&metadata, &opts).await?;
        println!("udp {} via {}", target, pc.chains().join(" <- "));
    } else {
        let conn = proxy.dial_tcp(&metadata, &opts).await?;
        println!("tcp {} via {}", target, conn.chains().join(" <- "));
    }
    Ok(())
}
