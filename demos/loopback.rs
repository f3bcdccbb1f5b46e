//! Runs a master and a slave against each other over the simulated link.
//!
//! With a directory argument, test definitions are loaded from (and results
//! written to) that directory; otherwise a built-in set is run in memory.
//!
//! ```text
//! RUST_LOG=info cargo run --example loopback [storage-root] [loss-probability]
//! ```

use std::path::PathBuf;

use lora_linktest::core::BoardId;
use lora_linktest::radio::{LinkSettings, RadioModule, SimulatedLink};
use lora_linktest::scheduler::{RadioTestRunner, Responder, TestScheduler};
use lora_linktest::storage::{DirectoryStorage, MemoryStorage, TestStorage};
use lora_linktest::{CancellationSignal, NodeConfig, RadioConfig, Result, TestDefinition};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn builtin_definitions() -> Result<Vec<TestDefinition>> {
    let sf = |spreading_factor| RadioConfig {
        spreading_factor,
        ..RadioConfig::BASE
    };
    Ok(vec![
        TestDefinition::new("Test_A", 2, 10, 60, sf(7))?,
        TestDefinition::new("Test_B", 2, 10, 120, sf(8))?,
        TestDefinition::new("Test_C", 1, 5, 20, sf(10))?,
        TestDefinition::new("Test_D", 0, 3, 20, sf(12))?,
    ])
}

async fn run<S: TestStorage>(storage: S, link: SimulatedLink) -> Result<()> {
    let master_config = NodeConfig::new(BoardId(0x81), ".");
    let slave_config = NodeConfig::new(BoardId(0x41), ".");
    master_config.validate()?;
    slave_config.validate()?;

    let master_cancel = CancellationSignal::new();
    let slave_cancel = CancellationSignal::new();

    let master = RadioModule::new(
        link.endpoint(master_config.address()).await,
        master_config.base_radio,
        master_config.protocol.clone(),
        master_cancel.clone(),
    )
    .await?;
    let slave = RadioModule::new(
        link.endpoint(slave_config.address()).await,
        slave_config.base_radio,
        slave_config.protocol.clone(),
        slave_cancel.clone(),
    )
    .await?;

    let mut scheduler = TestScheduler::from_storage(&storage, master_cancel).await?;
    info!(count = scheduler.definitions().len(), "test definitions loaded");
    storage.append_log("Test run started").await?;

    let mut runner = RadioTestRunner::new(master, storage);
    let mut responder = Responder::new(slave);

    let master_side = async {
        let report = scheduler.run(&mut runner).await;
        slave_cancel.set();
        report
    };
    let (report, stats) = tokio::join!(master_side, responder.run());
    let stats = stats?;

    println!("Run stopped: {:?}", report.stop);
    for outcome in &report.outcomes {
        match &outcome.error {
            None => println!(
                "  {:<10} tier {:>3}: {} packets",
                outcome.test_id, outcome.exp_range, outcome.received
            ),
            Some(e) => println!("  {:<10} tier {:>3}: failed ({})", outcome.test_id, outcome.exp_range, e),
        }
    }
    println!(
        "Slave served {} tests and {} heartbeats, {} failures",
        stats.tests, stats.heartbeats, stats.failures
    );

    let (_, storage) = runner.into_parts();
    storage.append_log("Test run finished").await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let root = args.next().map(PathBuf::from);
    let loss_probability = args
        .next()
        .and_then(|p| p.parse::<f64>().ok())
        .unwrap_or(0.05);

    let link = SimulatedLink::new(LinkSettings {
        loss_probability,
        ..Default::default()
    });

    match root {
        Some(root) => {
            let storage = DirectoryStorage::new(root);
            storage.ensure_layout().await?;
            run(storage, link).await
        }
        None => run(MemoryStorage::new(builtin_definitions()?), link).await,
    }
}
