use std::time::Duration;

use pipeline::{
    format_date, get_config_info, run_clean_stage, run_fetch_stage, run_gold_stage,
    run_load_stage, setup_logger, Cli, Stage, Warehouse,
};
use slog::{error, info, Logger};
use time::OffsetDateTime;

/// Retry policy for the full-pipeline run: fixed count, fixed delay,
/// no backoff.
const STAGE_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = get_config_info();
    let logger = setup_logger(&cli);

    info!(logger, "meteo-mart pipeline starting...");
    info!(logger, "  Data dir: {}", cli.data_dir());
    info!(logger, "  Warehouse: {}", cli.database());

    let today = OffsetDateTime::now_utc().date();
    let command = cli.command.clone().unwrap_or(Stage::Run);
    match command {
        Stage::Fetch => {
            run_fetch_stage(&logger, &cli.data_dir(), today).await?;
        }
        Stage::Clean { run_date } => {
            run_clean_stage(&logger, &cli.data_dir(), run_date.as_deref())?;
        }
        Stage::Gold => {
            run_gold_stage(&logger, &cli.data_dir(), &format_date(today)?)?;
        }
        Stage::Load => {
            let warehouse = Warehouse::open(&cli.database())?;
            run_load_stage(&logger, &cli.data_dir(), &warehouse)?;
        }
        Stage::Run => run_pipeline(&cli, &logger, today).await?,
    }

    info!(logger, "pipeline finished OK");
    Ok(())
}

/// All four stages strictly in order; a failing stage is retried with a
/// fixed delay before the whole run fails. Stages exchange data only
/// through the filesystem partitions.
async fn run_pipeline(
    cli: &Cli,
    logger: &Logger,
    today: time::Date,
) -> Result<(), anyhow::Error> {
    let data_dir = cli.data_dir();
    let database = cli.database();
    let run_date = format_date(today)?;

    for stage in ["fetch", "clean", "gold", "load"] {
        let mut attempts = 0;
        loop {
            let result = match stage {
                "fetch" => run_fetch_stage(logger, &data_dir, today).await.map(|_| ()),
                "clean" => run_clean_stage(logger, &data_dir, None).map(|_| ()),
                "gold" => run_gold_stage(logger, &data_dir, &run_date)
                    .map(|_| ())
                    .map_err(anyhow::Error::from),
                _ => Warehouse::open(&database)
                    .map_err(anyhow::Error::from)
                    .and_then(|warehouse| {
                        run_load_stage(logger, &data_dir, &warehouse)
                            .map(|_| ())
                            .map_err(anyhow::Error::from)
                    }),
            };
            match result {
                Ok(()) => {
                    info!(logger, "stage {} finished", stage);
                    break;
                }
                Err(err) if attempts < STAGE_RETRIES => {
                    attempts += 1;
                    error!(
                        logger,
                        "stage {} failed: {}; retry {}/{} in {}s",
                        stage,
                        err,
                        attempts,
                        STAGE_RETRIES,
                        RETRY_DELAY.as_secs()
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(err) => {
                    return Err(err.context(format!(
                        "stage {} failed after {} retries",
                        stage, STAGE_RETRIES
                    )))
                }
            }
        }
    }

    Ok(())
}
