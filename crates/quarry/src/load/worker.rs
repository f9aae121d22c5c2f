//! Data chunk loaders

use bytes::Bytes;
use futures::StreamExt;
use quarry_session::prelude::*;
use quarry_storage::{Compression, DecompressingReader, ReadStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::checksum::ContentHasher;
use crate::console::{Console, Progress};
use crate::dialect::{RowSplitter, Segment};
use crate::error::{Error, FirstError, Result};
use crate::ident::{quote_identifier, quote_string};
use crate::layout::{DataFile, TableDescriptor};
use crate::ledger::{event, ProgressLedger};
use crate::load::scheduler::{DataJob, Scheduler};
use crate::load::source::DumpSource;

/// Column list and `SET` clause restoring encoded columns
fn column_clause(table: &TableDescriptor) -> String {
    let mut columns = Vec::with_capacity(table.columns.len());
    let mut sets = Vec::new();
    for (i, column) in table.columns.iter().enumerate() {
        match table.decode_columns.get(column) {
            Some(function) => {
                let var = format!("@col{}", i);
                sets.push(format!("{} = {}({})", quote_identifier(column), function, var));
                columns.push(var);
            }
            None => columns.push(quote_identifier(column)),
        }
    }
    let mut clause = format!("({})", columns.join(", "));
    if !sets.is_empty() {
        clause.push_str(" SET ");
        clause.push_str(&sets.join(", "));
    }
    clause
}

fn partition_clause(file: &DataFile) -> String {
    file.partition
        .as_ref()
        .map(|p| format!(" PARTITION ({})", quote_identifier(p)))
        .unwrap_or_default()
}

/// `LOAD DATA LOCAL INFILE` statement of one data file
pub(crate) fn load_data_sql(
    table: &TableDescriptor,
    target: &str,
    file: &DataFile,
    charset: &str,
) -> String {
    format!(
        "LOAD DATA LOCAL INFILE {} INTO TABLE {}{} CHARACTER SET {} {} {}",
        quote_string(&file.name),
        target,
        partition_clause(file),
        quote_string(charset),
        table.dialect.load_data_clause(),
        column_clause(table)
    )
}

/// Statement loading a data file the server reads from `url` itself
pub(crate) fn bulk_load_sql(
    table: &TableDescriptor,
    target: &str,
    file: &DataFile,
    url: &str,
    charset: &str,
) -> String {
    let source = if url.starts_with("s3-") { "S3" } else { "URL" };
    format!(
        "LOAD DATA FROM {} {} INTO TABLE {}{} CHARACTER SET {} {} {} ALGORITHM=BULK",
        source,
        quote_string(url),
        target,
        partition_clause(file),
        quote_string(charset),
        table.dialect.load_data_clause(),
        column_clause(table)
    )
}

/// What one loaded data file produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ChunkLoaded {
    pub target: String,
    pub rows: u64,
    /// Stored size
    pub bytes: u64,
    /// Uncompressed size
    pub data_bytes: u64,
    pub warnings: u64,
    /// Statements the file was split into
    pub statements: u64,
}

/// State shared by data loaders
pub(crate) struct LoadContext {
    pub source: DumpSource,
    pub ledger: Arc<ProgressLedger>,
    pub charset: String,
    pub max_bytes_per_transaction: Option<u64>,
    /// The target accepts `BULK LOAD`
    pub bulk_load: bool,
    /// Remove files once loaded
    pub remove_loaded: bool,
    pub progress: Arc<Progress>,
    pub first_error: FirstError,
    pub console: Console,
    pub warnings: AtomicU64,
}

impl LoadContext {
    pub fn warnings(&self) -> u64 {
        self.warnings.load(Ordering::Relaxed)
    }
}

/// Pieces buffered per statement ahead of the server
const STATEMENT_BUFFER: usize = 4;

/// Data of one `LOAD DATA` statement
type StatementData = mpsc::Receiver<std::io::Result<Bytes>>;

async fn open_data(source: &DumpSource, file: &DataFile) -> Result<Box<dyn ReadStream>> {
    let stored = source.storage().open_read(&file.name).await?;
    if file.compression == Compression::None {
        return Ok(stored);
    }
    Ok(Box::new(DecompressingReader::new(stored, file.compression)?))
}

async fn stored_size(source: &DumpSource, job: &DataJob) -> Result<u64> {
    if job.size > 0 {
        return Ok(job.size);
    }
    Ok(source
        .storage()
        .list(&job.file.name)
        .await?
        .into_iter()
        .find(|o| o.name == job.file.name)
        .map_or(0, |o| o.size))
}

fn checksum_mismatch(job: &DataJob, actual: &str, expected: &str) -> Error {
    Error::checksum(
        format!("{} ({})", job.target, job.file.name),
        format!(
            "Data file is corrupted: CRC32 {} does not match {} recorded by the dump",
            actual, expected
        ),
    )
}

/// Compare the CRC32 of the uncompressed content of a file with `expected`
async fn verify_file(source: &DumpSource, job: &DataJob, expected: &str) -> Result<()> {
    let mut reader = open_data(source, &job.file).await?;
    let mut hasher = ContentHasher::new();
    while let Some(piece) = reader.read_chunk().await? {
        hasher.update(&piece);
    }
    let actual = hasher.finish();
    if actual != expected {
        return Err(checksum_mismatch(job, &actual, expected));
    }
    Ok(())
}

/// Hands data pieces to statements, opening a statement on its first piece
struct Feeder {
    statements: mpsc::Sender<StatementData>,
    current: Option<mpsc::Sender<std::io::Result<Bytes>>>,
}

impl Feeder {
    /// Returns false once the statements are no longer consumed
    async fn send(&mut self, segment: Segment) -> bool {
        let data = match segment {
            Segment::Cut => {
                self.current = None;
                return true;
            }
            Segment::Rows(data) if data.is_empty() => return true,
            Segment::Rows(data) => data,
        };
        if self.current.is_none() {
            let (tx, rx) = mpsc::channel(STATEMENT_BUFFER);
            if self.statements.send(rx).await.is_err() {
                return false;
            }
            self.current = Some(tx);
        }
        let Some(tx) = &self.current else {
            return false;
        };
        tx.send(Ok(data)).await.is_ok()
    }

    async fn send_all(&mut self, segments: Vec<Segment>) -> bool {
        for segment in segments {
            if !self.send(segment).await {
                return false;
            }
        }
        true
    }

    /// Fail the open statement so the server discards it
    async fn abort(&mut self, reason: &str) {
        if let Some(tx) = self.current.take() {
            let _ = tx.send(Err(std::io::Error::other(reason.to_string()))).await;
        }
    }
}

/// Stream the uncompressed content of a file into statements
///
/// With a `splitter` statements are cut at row boundaries as the data
/// arrives, otherwise the whole file feeds one statement. An `expected` CRC32
/// is checked at the end, and a mismatch aborts the open statement. Returns
/// the uncompressed size.
async fn feed_file(
    source: &DumpSource,
    job: &DataJob,
    mut splitter: Option<RowSplitter>,
    expected: Option<&str>,
    statements: mpsc::Sender<StatementData>,
    progress: &Progress,
) -> Result<u64> {
    let mut feeder = Feeder {
        statements,
        current: None,
    };
    let mut reader = open_data(source, &job.file).await?;
    let mut hasher = ContentHasher::new();
    loop {
        let piece = match reader.read_chunk().await {
            Ok(Some(piece)) => piece,
            Ok(None) => break,
            Err(e) => {
                feeder.abort("could not read the data file").await;
                return Err(e.into());
            }
        };
        hasher.update(&piece);
        progress.add(0, piece.len() as u64);
        let segments = match splitter.as_mut() {
            Some(splitter) => splitter.push(&piece),
            None => vec![Segment::Rows(piece)],
        };
        if !feeder.send_all(segments).await {
            return Ok(hasher.bytes());
        }
    }
    if let Some(splitter) = splitter.as_mut() {
        if !feeder.send_all(splitter.finish()).await {
            return Ok(hasher.bytes());
        }
    }
    let data_bytes = hasher.bytes();
    if let Some(expected) = expected {
        let actual = hasher.finish();
        if actual != expected {
            feeder.abort("data file checksum mismatch").await;
            return Err(checksum_mismatch(job, &actual, expected));
        }
    }
    Ok(data_bytes)
}

async fn report_warnings(
    session: &mut dyn Session,
    job: &DataJob,
    count: u64,
    ctx: &LoadContext,
) -> u64 {
    if count == 0 {
        return 0;
    }
    match session.warnings().await {
        Ok(warnings) => {
            for w in &warnings {
                ctx.console.warning(format!(
                    "{} error {}: {}: {}",
                    job.file.name, w.code, w.level, w.message
                ));
            }
            count
        }
        Err(e) => {
            warn!("Could not read warnings for {}: {}", job.file.name, e);
            count
        }
    }
}

/// Load one data file
pub(crate) async fn load_chunk(
    session: &mut dyn Session,
    job: &DataJob,
    ctx: &LoadContext,
) -> Result<ChunkLoaded> {
    let table = &job.table;
    let label = job.label();
    let data_error = |e: SessionError| Error::data(job.target.clone(), Some(label.clone()), e);
    let mut loaded = ChunkLoaded {
        target: job.target.clone(),
        ..Default::default()
    };

    let url = if ctx.bulk_load
        && job.file.compression == Compression::None
        && table.decode_columns.is_empty()
    {
        ctx.source.storage().object_url(&job.file.name)
    } else {
        None
    };
    if let Some(url) = url {
        let sql = bulk_load_sql(table, &job.target, &job.file, &url, &ctx.charset);
        debug!("Bulk loading {} into {}", job.file.name, job.target);
        loaded.rows = session.execute(&sql).await.map_err(data_error)?;
        loaded.bytes = job.size;
        loaded.data_bytes = job.record.as_ref().map_or(job.size, |r| r.data_bytes);
        loaded.statements = 1;
        ctx.progress.add(loaded.rows, loaded.data_bytes);
        return Ok(loaded);
    }

    let expected = job.record.as_ref().and_then(|r| r.data_crc32.as_deref());
    let splitter = ctx
        .max_bytes_per_transaction
        .filter(|max| job.record.as_ref().map_or(true, |r| r.data_bytes > *max))
        .map(|max| RowSplitter::new(&table.dialect, max as usize));
    // Content split over several statements is verified before any commits
    let expected = match (expected, &splitter) {
        (Some(crc), Some(_)) => {
            verify_file(&ctx.source, job, crc).await?;
            None
        }
        (expected, _) => expected,
    };

    let sql = load_data_sql(table, &job.target, &job.file, &ctx.charset);
    let (tx, mut statements) = mpsc::channel::<StatementData>(1);
    let feed = feed_file(&ctx.source, job, splitter, expected, tx, &ctx.progress);
    let run = async move {
        let mut tally = ChunkLoaded::default();
        while let Some(data) = statements.recv().await {
            ctx.first_error.check()?;
            let data = futures::stream::unfold(data, |mut rx| async move {
                rx.recv().await.map(|piece| (piece, rx))
            })
            .boxed();
            trace!("{}: LOAD DATA statement {}", job.file.name, tally.statements + 1);
            let result = session
                .load_data_stream(&sql, data)
                .await
                .map_err(data_error)?;
            tally.rows += result.rows;
            tally.statements += 1;
            tally.warnings += report_warnings(&mut *session, job, result.warnings, ctx).await;
            ctx.progress.add(result.rows, 0);
        }
        Ok::<_, Error>(tally)
    };
    let (fed, ran) = tokio::join!(feed, run);
    loaded.data_bytes = fed?;
    let tally = ran?;
    loaded.rows = tally.rows;
    loaded.statements = tally.statements;
    loaded.warnings = tally.warnings;
    loaded.bytes = stored_size(&ctx.source, job).await?;
    if let Some(record) = &job.record {
        if record.rows != loaded.rows {
            ctx.console.warning(format!(
                "{}: {} rows were loaded but the dump recorded {}",
                job.file.name, loaded.rows, record.rows
            ));
        }
    }
    Ok(loaded)
}

/// Load one file with ledger bookkeeping and optional removal
async fn handle_job(session: &mut dyn Session, job: &DataJob, ctx: &LoadContext) -> Result<ChunkLoaded> {
    let label = job.label();
    ctx.ledger
        .start(event::DATA_CHUNK, &job.target, Some(&label))
        .await?;
    match load_chunk(session, job, ctx).await {
        Ok(loaded) => {
            ctx.ledger
                .done(event::DATA_CHUNK, &job.target, Some(&label))
                .await?;
            ctx.warnings.fetch_add(loaded.warnings, Ordering::Relaxed);
            if ctx.remove_loaded {
                ctx.source.storage().remove(&job.file.name).await?;
            }
            Ok(loaded)
        }
        Err(e) => {
            ctx.ledger
                .error(event::DATA_CHUNK, &job.target, Some(&label), &e.to_string())
                .await?;
            Err(e)
        }
    }
}

/// Load files handed out by `scheduler` until it is drained or the load failed
pub(crate) async fn run_loader(
    worker: usize,
    pool: Arc<SessionPool>,
    scheduler: Arc<Scheduler>,
    ctx: Arc<LoadContext>,
) -> Vec<ChunkLoaded> {
    let mut loaded = Vec::new();
    let mut session = match pool.acquire().await {
        Ok(session) => session,
        Err(e) => {
            ctx.first_error.record(e.into());
            scheduler.wake();
            return loaded;
        }
    };
    loop {
        let job = tokio::select! {
            job = scheduler.next() => job,
            _ = ctx.first_error.token().cancelled() => None,
        };
        let Some(job) = job else {
            break;
        };
        let result = handle_job(&mut *session, &job, &ctx).await;
        scheduler.finish(&job);
        match result {
            Ok(chunk) => loaded.push(chunk),
            Err(e) => {
                ctx.first_error.record(e);
                scheduler.wake();
                break;
            }
        }
    }
    debug!("Loader {} finished {} files", worker, loaded.len());
    pool.release(session);
    loaded
}
