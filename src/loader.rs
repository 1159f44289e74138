//! Drives a full ingest run: read each dump file, fan its blocks out
//! to the worker pool, then archive the file.

use crate::blocks::{Block, read_blocks};
use crate::config::RunConfig;
use crate::counters::IngestCounters;
use crate::error::WhoisDbError;
use crate::worker::parse_blocks;
use crate::{FILE_LIST, WORK_QUEUE_DEPTH};
use log::{error, info};
use rand::seq::SliceRandom;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Process every file in [`FILE_LIST`] that exists under the downloads
/// directory. Per-file failures are logged and skipped; the run only
/// returns once every file has been attempted.
pub async fn run(config: &RunConfig, pool: &PgPool) -> Result<(), WhoisDbError> {
    let overall_start = Instant::now();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, letting in-flight blocks finish");
                cancel.cancel();
            }
        });
    }

    for entry in FILE_LIST {
        if cancel.is_cancelled() {
            break;
        }
        let path = config.downloads_dir.join(entry);
        if !path.exists() {
            info!(
                "File {} not found. Please download it first.",
                path.display()
            );
            continue;
        }

        info!("loading database file: {}", path.display());
        let start = Instant::now();
        let read_path = path.clone();
        let (mut blocks, _ignored) =
            match tokio::task::spawn_blocking(move || read_blocks(&read_path)).await {
                Ok(Ok(result)) => result,
                Ok(Err(err)) => {
                    error!("Failed to read {}: {err:?}", path.display());
                    continue;
                }
                Err(err) => {
                    error!("Reader task for {} failed: {err:?}", path.display());
                    continue;
                }
            };
        let num_blocks = blocks.len() as u64;
        let seconds = start.elapsed().as_secs_f64();
        info!(
            "file loading finished: {seconds:.0} seconds ({:.0} blocks/s)",
            num_blocks as f64 / seconds.max(1e-9)
        );

        let (job_sender, job_receiver) = async_channel::bounded::<Option<Block>>(WORK_QUEUE_DEPTH);
        let counters = Arc::new(IngestCounters::default());
        info!(
            "BLOCKS PARSING START: starting {} workers for {num_blocks} blocks (~{} per worker)",
            config.num_workers,
            num_blocks / config.num_workers.max(1) as u64
        );
        let mut workers = Vec::with_capacity(config.num_workers);
        for worker_id in 0..config.num_workers {
            workers.push(tokio::spawn(parse_blocks(
                worker_id,
                job_receiver.clone(),
                pool.clone(),
                counters.clone(),
                config.commit_count,
                num_blocks,
            )));
        }
        // Only the workers should keep the queue alive.
        drop(job_receiver);

        // Shuffling breaks the locality of parent-key collisions, so
        // peer workers spend less time losing races to each other.
        blocks.shuffle(&mut rand::rng());

        let start = Instant::now();
        let mut queue_closed = false;
        for block in blocks {
            if cancel.is_cancelled() {
                info!("Cancelled; draining the queue to sentinels");
                break;
            }
            if job_sender.send(Some(block)).await.is_err() {
                error!("Work queue closed early, all workers are gone");
                queue_closed = true;
                break;
            }
        }
        if !queue_closed {
            for _ in 0..config.num_workers {
                if job_sender.send(None).await.is_err() {
                    break;
                }
            }
        }
        info!(
            "blocks load into workers finished: {:.0} seconds",
            start.elapsed().as_secs_f64()
        );

        for handle in workers {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("worker failed: {err:?}"),
                Err(err) => error!("worker panicked: {err:?}"),
            }
        }
        info!(
            "BLOCKS PARSING DONE: {} of {num_blocks} blocks processed, {} skipped, {} duplicate races",
            counters.blocks_processed.value(),
            counters.blocks_skipped.value(),
            counters.duplicates.value()
        );

        if cancel.is_cancelled() {
            info!(
                "Skipping archive of {} after cancellation",
                path.display()
            );
            continue;
        }
        let done_dir = config.downloads_dir.join("done");
        if let Err(err) = std::fs::create_dir_all(&done_dir)
            .and_then(|()| std::fs::rename(&path, done_dir.join(entry)))
        {
            error!("Failed to archive {}: {err:?}", path.display());
        }
    }

    info!(
        "run finished: {:.2} seconds",
        overall_start.elapsed().as_secs_f64()
    );
    Ok(())
}
