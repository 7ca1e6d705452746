pub mod sampler;

use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;

use crate::{
    cli::Args,
    core::{
        client::{QueryClient, WriteClient},
        decode::Decoder,
        report::{ConsoleReporter, PageObserver},
        runner::{CancelOutcome, QueryRunner},
        types::{CommonAttributes, WriteAck, WriteRequest},
    },
    error::AppResult,
    store::Store,
};

use sampler::{Sampler, Snapshot};

/// Samples, writes and reads back forever, one iteration per interval.
/// A failed iteration is logged and the loop carries on.
pub async fn run(args: Args) -> AppResult<()> {
    let store = Store::open(&args.db_path, &args.database)?;
    tracing::info!(path = %store.path.display(), database = %args.database, table = %args.table, "store ready");

    let runner = QueryRunner::new(store.clone(), &args.database, &args.table)?
        .with_decoder(Decoder::new(args.max_depth))
        .with_format(args.format);
    tracing::info!(query = %runner.base_query(), "read-back query");
    let mut sampler = Sampler::new();
    let mut reporter = ConsoleReporter::stdout();

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let snapshot = sampler.sample().await;
        log_snapshot(&snapshot);
        if let Err(e) = iteration(&args, &snapshot, &store, &runner, &mut reporter).await {
            tracing::error!(code = e.code(), error = %e, "monitoring iteration failed");
        }
    }
}

/// Writes one snapshot, then runs the read-back query and any extra queries.
/// Query failures are reported by the runner and end only that query.
pub async fn iteration<W, C>(
    args: &Args,
    snapshot: &Snapshot,
    writer: &W,
    runner: &QueryRunner<C>,
    observer: &mut dyn PageObserver,
) -> AppResult<WriteAck>
where
    W: WriteClient,
    C: QueryClient,
{
    let request = WriteRequest {
        database_name: args.database.clone(),
        table_name: args.table.clone(),
        records: snapshot.records(),
        common_attributes: CommonAttributes {
            dimensions: snapshot.dimensions(&args.device),
            time: epoch_millis_now(),
        },
    };
    let ack = writer.write_records(request).await?;
    tracing::info!(records = ack.records_ingested, "records written");

    if runner
        .run_query_with_limit(args.limit, args.page_size, observer)
        .await
        .is_err()
    {
        tracing::debug!("read-back skipped for this iteration");
    }
    if !args.queries.is_empty() {
        let ok = runner.run_all_queries(&args.queries, args.page_size, observer).await;
        tracing::info!(succeeded = ok, total = args.queries.len(), "extra queries done");
    }
    if args.cancel_probe {
        match runner.cancel_query().await {
            CancelOutcome::Cancelled => tracing::info!("cancel probe: query cancelled"),
            CancelOutcome::AlreadyFinished(message) => {
                tracing::info!(%message, "cancel probe: query finished first")
            }
            CancelOutcome::Failed(e) => {
                tracing::warn!(code = e.code(), error = %e, "cancel probe failed")
            }
        }
    }
    Ok(ack)
}

fn log_snapshot(s: &Snapshot) {
    tracing::info!(
        cpu_load_pct = s.cpu_usage_pct,
        cpu_freq_mhz = s.cpu_freq_mhz,
        cpu_temp_c = s.cpu_temp_c,
        ram_used_mb = s.ram_used_mib(),
        ram_total_mb = s.ram_total_mib(),
        ram_usage_pct = s.ram_usage_pct(),
        "sampled host metrics"
    );
}

fn epoch_millis_now() -> String {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).to_string()
}
