//! Copy between servers
//!
//! A copy is a dump and a load running at the same time over a bounded
//! in-memory store. The loader removes each data file once loaded, which
//! frees room for the dumper's next chunk.

use quarry_session::SessionFactory;
use quarry_storage::{MemoryStorage, Storage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::console::Console;
use crate::dump::{DumpSummary, Dumper};
use crate::error::{Error, Result};
use crate::layout;
use crate::load::{LoadSummary, Loader};
use crate::options::{CopyOptions, DumpScope};

/// Totals of a finished copy
#[derive(Debug, Clone, Default)]
pub struct CopySummary {
    pub dump: DumpSummary,
    pub load: LoadSummary,
    pub elapsed: Duration,
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::other(format!("Copy task failed: {}", e)))
}

/// Copy from `source` into `target`
pub async fn copy(
    source: Arc<dyn SessionFactory>,
    target: Arc<dyn SessionFactory>,
    options: CopyOptions,
    console: Console,
) -> Result<CopySummary> {
    let started = Instant::now();
    options.validate_all()?;
    let CopyOptions {
        dump,
        mut load,
        wait_dump_timeout,
    } = options;

    let capacity = (dump.threads.max(1) as u64).saturating_mul(dump.bytes_per_chunk);
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::bounded(
        "copy",
        capacity,
        layout::is_data_file,
    ));
    if dump.dry_run {
        let summary = Dumper::new(source, storage, dump, console).run().await?;
        return Ok(CopySummary {
            dump: summary,
            load: LoadSummary {
                dry_run: true,
                ..Default::default()
            },
            elapsed: started.elapsed(),
        });
    }

    // nothing persists between runs of a copy
    load.progress_file = Some(String::new());
    load.reset_progress = false;
    let token = CancellationToken::new();
    let dumper = Dumper::new(source, storage.clone(), dump, console.clone())
        .with_cancellation(token.clone());
    let loader = Loader::new(target, storage, load, console)
        .with_cancellation(token.clone())
        .with_wait(wait_dump_timeout.map(|t| Duration::from_secs_f64(t.max(0.0))))
        .consume_files();

    let mut dump_task = tokio::spawn(dumper.run());
    let mut load_task = tokio::spawn(loader.run());

    // a side that failed may leave the other blocked on the store
    let (dump, load) = tokio::select! {
        dump = &mut dump_task => {
            let dump = dump.map_err(join_error)?;
            if dump.is_err() {
                token.cancel();
                load_task.abort();
                debug!("Dump failed, the load was stopped");
                (dump, Err(Error::Cancelled))
            } else {
                (dump, load_task.await.map_err(join_error)?)
            }
        }
        load = &mut load_task => {
            let load = load.map_err(join_error)?;
            if load.is_err() {
                token.cancel();
                dump_task.abort();
                debug!("Load failed, the dump was stopped");
                (Err(Error::Cancelled), load)
            } else {
                (dump_task.await.map_err(join_error)?, load)
            }
        }
    };
    // report the failure rather than the cancellation it caused
    let dump = match dump {
        Err(e) if !e.is_cancelled() => return Err(e),
        dump => dump,
    };
    let load = load?;
    let dump = dump?;
    Ok(CopySummary {
        dump,
        load,
        elapsed: started.elapsed(),
    })
}

/// Copy every schema of the instance, plus user accounts
pub async fn copy_instance(
    source: Arc<dyn SessionFactory>,
    target: Arc<dyn SessionFactory>,
    mut options: CopyOptions,
    console: Console,
) -> Result<CopySummary> {
    options.dump = options.dump.with_scope(DumpScope::Instance);
    copy(source, target, options, console).await
}

/// Copy the listed schemas
pub async fn copy_schemas(
    source: Arc<dyn SessionFactory>,
    target: Arc<dyn SessionFactory>,
    schemas: Vec<String>,
    mut options: CopyOptions,
    console: Console,
) -> Result<CopySummary> {
    options.dump = options.dump.with_scope(DumpScope::Schemas(schemas));
    copy(source, target, options, console).await
}

/// Copy tables and views of one schema; `all` takes every one of them
pub async fn copy_tables(
    source: Arc<dyn SessionFactory>,
    target: Arc<dyn SessionFactory>,
    schema: String,
    tables: Vec<String>,
    all: bool,
    mut options: CopyOptions,
    console: Console,
) -> Result<CopySummary> {
    options.dump = options.dump.with_scope(DumpScope::Tables {
        schema,
        tables,
        all,
    });
    copy(source, target, options, console).await
}
