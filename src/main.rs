//! Reward Transfer
//!
//! Runs transfers or a batch job against in-memory stores and prints the
//! result as JSON on stdout.
//!
//! ```text
//! reward_transfer [-e dev] --transfers requests.jsonl [--seed seed.json]
//! reward_transfer [-e dev] --issue <subject id> --quantity <n> [--category CARD]
//! ```
//!
//! ```text
//! ┌───────────┐    ┌─────────┐    ┌──────────┐    ┌─────────────┐
//! │ requests  │───▶│  Queue  │───▶│ Consumer │───▶│ TransferLog │
//! │ (JSONL)   │    │ (FIFO)  │    │  (saga)  │    │  + Ledger   │
//! └───────────┘    └─────────┘    └──────────┘    └─────────────┘
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use reward_transfer::batch::{
    BatchPlanner, BatchWorker, JobRequest, JobRunner, MemoryJobTracker,
};
use reward_transfer::clock::{MonotonicClock, RandomIds};
use reward_transfer::config::AppConfig;
use reward_transfer::content::{ContentStore, MemoryContentStore};
use reward_transfer::ledger::{LedgerKey, MemoryLedger};
use reward_transfer::logging::init_logging;
use reward_transfer::queue::MemoryQueue;
use reward_transfer::transfer::commit::{balance_item, balance_key};
use reward_transfer::transfer::saga::CONTENT_KEY_ATTR;
use reward_transfer::transfer::{
    MemoryTransferLog, TransferConsumer, TransferLog, TransferRequest, TransferSaga,
    TransferSubmitter,
};

// ============================================================
// ARGUMENTS
// ============================================================

/// Value following any of `names`; `None` if the flag is absent, an error if
/// it is present without a value
fn flag_value(args: &[String], names: &[&str]) -> anyhow::Result<Option<String>> {
    let Some(i) = args.iter().position(|a| names.contains(&a.as_str())) else {
        return Ok(None);
    };
    match args.get(i + 1) {
        Some(value) if !value.starts_with('-') => Ok(Some(value.clone())),
        _ => bail!("{} requires a value", args[i]),
    }
}

fn arg_value(names: &[&str]) -> anyhow::Result<Option<String>> {
    let args: Vec<String> = std::env::args().collect();
    flag_value(&args, names)
}

fn get_env() -> anyhow::Result<String> {
    Ok(arg_value(&["--env", "-e"])?.unwrap_or_else(|| "dev".to_string()))
}

// ============================================================
// SEED DATA
// ============================================================

/// Initial store contents for a transfer run
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Seed {
    /// subject id -> content key
    #[serde(default)]
    subjects: BTreeMap<String, String>,
    /// content key -> body
    #[serde(default)]
    content: BTreeMap<String, String>,
    #[serde(default)]
    balances: Vec<SeedBalance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedBalance {
    owner: String,
    reward_type: String,
    balance: u64,
}

fn load_seed(path: Option<String>) -> anyhow::Result<Seed> {
    let Some(path) = path else {
        return Ok(Seed::default());
    };
    let text = fs::read_to_string(&path).with_context(|| format!("Failed to read seed: {path}"))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid seed file: {path}"))
}

// ============================================================
// MODES
// ============================================================

async fn run_transfers(config: &AppConfig, requests_path: &str) -> anyhow::Result<()> {
    let seed = load_seed(arg_value(&["--seed"])?)?;

    let ledger = Arc::new(MemoryLedger::new());
    let content = Arc::new(MemoryContentStore::new());
    for (subject_id, content_key) in &seed.subjects {
        let mut item = serde_json::Map::new();
        item.insert(CONTENT_KEY_ATTR.to_string(), json!(content_key));
        ledger.insert(LedgerKey::new(&config.transfer.subjects_table, subject_id), item);
    }
    for (key, body) in &seed.content {
        content.put(key, body.clone().into_bytes()).await?;
    }
    for b in &seed.balances {
        ledger.insert(
            balance_key(&config.transfer, &b.owner, &b.reward_type),
            balance_item(&b.owner, &b.reward_type, b.balance),
        );
    }

    let log = Arc::new(MemoryTransferLog::new());
    let queue = Arc::new(MemoryQueue::new(config.queue.max_receive_count));
    let saga = Arc::new(TransferSaga::new(
        log.clone(),
        ledger,
        content,
        Arc::new(MonotonicClock::new()),
        config.transfer.clone(),
    ));
    let submitter = TransferSubmitter::new(queue.clone(), Arc::new(RandomIds));
    let consumer = TransferConsumer::new(
        queue.clone(),
        saga,
        config.queue.receive_batch_size,
        config.queue.poll_interval(),
    );

    let text = fs::read_to_string(requests_path)
        .with_context(|| format!("Failed to read transfers: {requests_path}"))?;
    let mut transfer_ids = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let request: TransferRequest = serde_json::from_str(line)
            .with_context(|| format!("{requests_path}:{}: invalid transfer request", line_no + 1))?;
        let submitted = submitter
            .submit(request)
            .await
            .with_context(|| format!("{requests_path}:{}: submit failed", line_no + 1))?;
        transfer_ids.push(submitted.transfer_id);
    }
    info!(count = transfer_ids.len(), "Transfers submitted");

    let report = consumer.run_until_idle().await?;

    let mut records = Vec::with_capacity(transfer_ids.len());
    for id in &transfer_ids {
        if let Some(record) = log.get(id).await? {
            records.push(record);
        }
    }

    let output = json!({
        "report": report,
        "transfers": records,
        "deadLetters": queue.dead_letters(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_issue(config: &AppConfig, subject_id: String) -> anyhow::Result<()> {
    let quantity: u32 = arg_value(&["--quantity", "-n"])?
        .context("--quantity is required with --issue")?
        .parse()
        .context("--quantity must be a positive integer")?;

    let ledger = Arc::new(MemoryLedger::new());
    let tracker = Arc::new(MemoryJobTracker::new());
    let clock = Arc::new(MonotonicClock::new());
    let ids = Arc::new(RandomIds);

    let worker = Arc::new(BatchWorker::new(
        ledger,
        tracker.clone(),
        ids.clone(),
        clock.clone(),
        config.batch.items_table.clone(),
        config.batch.suffix_digits,
    ));
    let planner = BatchPlanner::new(
        tracker.clone(),
        clock,
        config.batch.max_batch_size,
        config.batch.item_prefix.clone(),
    );
    let runner = JobRunner::new(
        planner,
        worker,
        tracker,
        ids,
        config.batch.payload_type.clone(),
        config.batch.worker_concurrency,
    );

    let request = JobRequest {
        subject_id,
        quantity,
        category: arg_value(&["--category"])?,
    };
    let summary = runner.run_to_end(&request).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env()?;
    let config = AppConfig::load(&env)?;
    let _guard = init_logging(&config);

    info!(
        env = %env,
        git_hash = env!("BUILD_GIT_HASH"),
        "reward_transfer starting"
    );

    if let Some(path) = arg_value(&["--transfers"])? {
        run_transfers(&config, &path).await
    } else if let Some(subject_id) = arg_value(&["--issue"])? {
        run_issue(&config, subject_id).await
    } else {
        bail!(
            "usage: reward_transfer [-e <env>] --transfers <file.jsonl> [--seed <file.json>] \
             | --issue <subject id> --quantity <n> [--category <type>]"
        )
    }
}
