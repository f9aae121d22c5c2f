//! Data chunk workers

use quarry_session::prelude::*;
use quarry_storage::prelude::*;
use quarry_storage::CompressedWriter;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::catalog::{Catalog, Table, TableId};
use crate::checksum::{self, ChecksumRecord, ContentHasher};
use crate::chunker::{Chunk, ChunkPlanner, PlanOptions, TablePlan};
use crate::console::{Console, Progress};
use crate::dialect::{Dialect, RowFormatter};
use crate::error::{Error, FirstError, Result};
use crate::ident::quote_identifier;
use crate::layout::ChunkRecord;
use crate::rate_limiter::{RateLimitConfig, TokenBucketRateLimiter};

/// Formatted bytes buffered before a write
const WRITE_BUFFER_SIZE: usize = 256 * 1024;
/// Rows per batch handed over by the session
const ROW_BATCH_SIZE: usize = 1000;
/// Batches in flight between the session and the writer
const BATCH_CHANNEL_SIZE: usize = 4;

/// How the rows of one table are selected and formatted
#[derive(Debug, Clone)]
pub(crate) struct TableFormat {
    pub select_list: String,
    pub string_columns: Vec<bool>,
    pub columns: Vec<String>,
}

impl TableFormat {
    pub fn new(table: &Table, dialect: &Dialect) -> Self {
        let mut select = Vec::new();
        let mut string_columns = Vec::new();
        let mut columns = Vec::new();
        for column in table.data_columns() {
            let quoted = quote_identifier(&column.name);
            if column.is_binary() {
                select.push(dialect.binary_encoding.encode_expr(&quoted));
            } else {
                select.push(quoted);
            }
            string_columns.push(column.is_string());
            columns.push(column.name.clone());
        }
        Self {
            select_list: select.join(", "),
            string_columns,
            columns,
        }
    }
}

/// One data file to write
#[derive(Debug, Clone)]
pub(crate) struct ChunkJob {
    pub schema: String,
    pub table: String,
    pub plan: Arc<TablePlan>,
    pub format: Arc<TableFormat>,
    pub chunk: Chunk,
    pub file: String,
}

/// What a written chunk produced
#[derive(Debug, Clone)]
pub(crate) struct ChunkOutcome {
    pub schema: String,
    pub table: String,
    pub record: ChunkRecord,
    pub checksum: Option<ChecksumRecord>,
}

/// State shared by the data workers
pub(crate) struct WriterContext {
    pub storage: Arc<dyn Storage>,
    pub dialect: Dialect,
    pub compression: Compression,
    pub checksum: bool,
    pub max_rate: u64,
    pub progress: Arc<Progress>,
    pub first_error: FirstError,
}

async fn flush(
    writer: &mut CompressedWriter,
    buffer: &mut Vec<u8>,
    hasher: &mut ContentHasher,
    limiter: &TokenBucketRateLimiter,
) -> Result<()> {
    if buffer.is_empty() {
        return Ok(());
    }
    limiter.acquire(buffer.len() as u64).await;
    hasher.update(buffer);
    writer.write(buffer).await?;
    buffer.clear();
    Ok(())
}

/// Select the rows of one chunk and write them to its data file
pub(crate) async fn write_chunk(
    session: &mut dyn Session,
    job: &ChunkJob,
    ctx: &WriterContext,
    limiter: &TokenBucketRateLimiter,
) -> Result<ChunkOutcome> {
    let sql = job.plan.select_sql(&job.chunk, &job.format.select_list);
    let label = job.chunk.label();
    debug!("Dumping {} chunk {} to {}", job.plan.qualified, label, job.file);
    trace!("{}", sql);

    let inner = ctx.storage.open_write(&job.file).await?;
    let mut writer = CompressedWriter::new(inner, ctx.compression)?;
    let formatter = RowFormatter::new(&ctx.dialect, job.format.string_columns.clone());
    let (tx, rx) = mpsc::channel::<RowBatch>(BATCH_CHANNEL_SIZE);

    let stream = session.stream_rows(&sql, tx, ROW_BATCH_SIZE);
    let consume = async {
        let mut rx = rx;
        let mut buffer = Vec::with_capacity(WRITE_BUFFER_SIZE + 4096);
        let mut hasher = ContentHasher::new();
        let mut rows = 0u64;
        let mut pending_rows = 0u64;
        while let Some(batch) = rx.recv().await {
            ctx.first_error.check()?;
            for row in &batch {
                formatter.format_row(row.values(), &mut buffer);
            }
            rows += batch.len() as u64;
            pending_rows += batch.len() as u64;
            if buffer.len() >= WRITE_BUFFER_SIZE {
                let bytes = buffer.len() as u64;
                flush(&mut writer, &mut buffer, &mut hasher, limiter).await?;
                ctx.progress.add(pending_rows, bytes);
                pending_rows = 0;
            }
        }
        let bytes = buffer.len() as u64;
        flush(&mut writer, &mut buffer, &mut hasher, limiter).await?;
        ctx.progress.add(pending_rows, bytes);
        Ok::<_, Error>((rows, hasher))
    };
    let (streamed, consumed) = tokio::join!(stream, consume);

    let (rows, hasher) = match (streamed, consumed) {
        (Err(e), Ok(_)) => {
            Box::new(writer).abort().await.ok();
            return Err(Error::data(job.plan.qualified.clone(), Some(label), e));
        }
        (_, Err(e)) => {
            Box::new(writer).abort().await.ok();
            return Err(e);
        }
        (Ok(_), Ok(done)) => done,
    };
    let data_bytes = writer.plain_bytes();
    let bytes = Box::new(writer).finish().await?;

    let checksum = if ctx.checksum {
        let sum = checksum::compute(session, &job.plan, &job.chunk, &job.format.columns).await?;
        Some(ChecksumRecord {
            schema: job.schema.clone(),
            table: job.table.clone(),
            partition: job.chunk.partition.clone(),
            chunk: job.chunk.chunk_id(),
            range: job.chunk.range.clone(),
            condition: job.plan.condition.clone(),
            columns: job.format.columns.clone(),
            rows: sum.rows,
            checksum: sum.checksum,
        })
    } else {
        None
    };

    debug!(
        "Dumped {} chunk {}: {} rows, {} bytes",
        job.plan.qualified, label, rows, bytes
    );
    Ok(ChunkOutcome {
        schema: job.schema.clone(),
        table: job.table.clone(),
        record: ChunkRecord {
            file: job.file.clone(),
            partition: job.chunk.partition.clone(),
            chunk: job.chunk.chunk_id(),
            rows,
            bytes,
            data_bytes,
            data_crc32: Some(hasher.finish()),
        },
        checksum,
    })
}

/// Write chunks from `queue` until it is empty or the run failed
pub(crate) async fn run_writer(
    worker: usize,
    pool: Arc<SessionPool>,
    queue: Arc<Mutex<VecDeque<ChunkJob>>>,
    ctx: Arc<WriterContext>,
) -> Vec<ChunkOutcome> {
    let mut outcomes = Vec::new();
    let mut session = match pool.acquire().await {
        Ok(session) => session,
        Err(e) => {
            ctx.first_error.record(e.into());
            return outcomes;
        }
    };
    let limiter = TokenBucketRateLimiter::new(RateLimitConfig::new(ctx.max_rate));
    loop {
        if ctx.first_error.is_cancelled() {
            break;
        }
        let Some(job) = queue.lock().pop_front() else {
            break;
        };
        match write_chunk(&mut *session, &job, &ctx, &limiter).await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                ctx.first_error.record(e);
                break;
            }
        }
    }
    debug!("Writer {} finished {} chunks", worker, outcomes.len());
    pool.release(session);
    outcomes
}

/// Plan tables from `queue` until it is empty or the run failed
pub(crate) async fn run_planner(
    pool: Arc<SessionPool>,
    queue: Arc<Mutex<VecDeque<TableId>>>,
    catalog: Arc<Catalog>,
    options: Arc<PlanOptions>,
    console: Console,
    first_error: FirstError,
) -> Vec<TablePlan> {
    let mut plans = Vec::new();
    let mut session = match pool.acquire().await {
        Ok(session) => session,
        Err(e) => {
            first_error.record(e.into());
            return plans;
        }
    };
    let planner = ChunkPlanner::new(&catalog, &options, &console);
    loop {
        if first_error.is_cancelled() {
            break;
        }
        let Some(tid) = queue.lock().pop_front() else {
            break;
        };
        match planner.plan(&mut *session, tid).await {
            Ok(plan) => plans.push(plan),
            Err(e) => {
                first_error.record(e);
                break;
            }
        }
    }
    pool.release(session);
    plans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, SchemaId};
    use crate::dialect::{DialectName, DialectOverrides};
    use quarry_session::testing::{Reply, Script, ScriptedFactory};
    use tokio_util::sync::CancellationToken;

    fn column(name: &str, data_type: &str) -> Column {
        Column {
            name: name.into(),
            data_type: data_type.into(),
            column_type: data_type.into(),
            nullable: true,
            auto_increment: false,
            generated: false,
        }
    }

    fn job(dialect: &Dialect) -> ChunkJob {
        let mut table = Table::new(SchemaId(0), "t");
        table.columns = vec![column("id", "int"), column("name", "varchar"), column("raw", "blob")];
        ChunkJob {
            schema: "s".into(),
            table: "t".into(),
            plan: Arc::new(TablePlan {
                table: TableId(0),
                qualified: "`s`.`t`".into(),
                index: None,
                condition: None,
                chunks: Vec::new(),
            }),
            format: Arc::new(TableFormat::new(&table, dialect)),
            chunk: Chunk {
                id: None,
                last: true,
                partition: None,
                range: None,
            },
            file: "s.t@@0.tsv".into(),
        }
    }

    fn context(storage: Arc<MemoryStorage>, checksum: bool) -> WriterContext {
        WriterContext {
            storage,
            dialect: Dialect::resolve(DialectName::Default, &DialectOverrides::default()),
            compression: Compression::None,
            checksum,
            max_rate: 0,
            progress: Arc::new(Progress::new("dump", false)),
            first_error: FirstError::new(CancellationToken::new()),
        }
    }

    #[test]
    fn test_table_format_encodes_binary() {
        let dialect = Dialect::resolve(DialectName::Default, &DialectOverrides::default());
        let job = job(&dialect);
        assert_eq!(job.format.select_list, "`id`, `name`, TO_BASE64(`raw`)");
        assert_eq!(job.format.string_columns, vec![false, true, true]);
    }

    #[tokio::test]
    async fn test_write_chunk() {
        let storage = Arc::new(MemoryStorage::new("test"));
        let ctx = context(storage.clone(), true);
        let job = job(&ctx.dialect);
        let script = Script::new()
            .rows(
                r"^SELECT SQL_NO_CACHE",
                &["id", "name", "raw"],
                vec![
                    vec![Value::from(1i64), Value::from("a"), Value::from("AQ==")],
                    vec![Value::from(2i64), Value::Null, Value::from("Ag==")],
                ],
            )
            .on(
                r"^SELECT COUNT\(\*\)",
                Reply::rows(&["rows", "checksum"], vec![vec![Value::from(2u64), Value::from(99u64)]]),
            );
        let factory = ScriptedFactory::new(script);
        let mut session = factory.connect().await.unwrap();
        let limiter = TokenBucketRateLimiter::new(RateLimitConfig::unlimited());

        let outcome = write_chunk(session.as_mut(), &job, &ctx, &limiter).await.unwrap();
        let data = storage.read_all("s.t@@0.tsv").await.unwrap();
        assert_eq!(&data[..], b"1\ta\tAQ==\n2\t\\N\tAg==\n");
        assert_eq!(outcome.record.rows, 2);
        assert_eq!(outcome.record.data_bytes, data.len() as u64);
        assert_eq!(outcome.record.chunk, -1);
        assert_eq!(
            outcome.record.data_crc32.as_deref(),
            Some(checksum::content_checksum(&data).as_str())
        );
        let sum = outcome.checksum.unwrap();
        assert_eq!((sum.rows, sum.checksum), (2, 99));
        assert_eq!(ctx.progress.rows(), 2);
    }

    #[tokio::test]
    async fn test_write_chunk_failure_removes_file() {
        let storage = Arc::new(MemoryStorage::new("test"));
        let ctx = context(storage.clone(), false);
        let job = job(&ctx.dialect);
        let script = Script::new().fail(r"^SELECT SQL_NO_CACHE", 1146, "Table 's.t' doesn't exist");
        let factory = ScriptedFactory::new(script);
        let mut session = factory.connect().await.unwrap();
        let limiter = TokenBucketRateLimiter::new(RateLimitConfig::unlimited());

        let err = write_chunk(session.as_mut(), &job, &ctx, &limiter).await.unwrap_err();
        assert!(matches!(err, Error::Data { .. }));
        assert!(!storage.exists("s.t@@0.tsv").await.unwrap());
    }
}
