use std::sync::Arc;
use std::time::{Duration, Instant};

use model::stream::Stream;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cancel::cancellable;
use crate::error::{ExtractError, RetryDisposition};
use crate::partition::Partition;
use crate::partition::factory::PartitionFactory;
use crate::source::{RowQuerier, RowSink};
use crate::state::store::StateStore;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Rows fetched per resumable batch.
    pub fetch_size: u64,
    /// Wall-clock interval between mid-batch checkpoints.
    pub checkpoint_interval: Duration,
    /// Streams read concurrently.
    pub concurrency: usize,
    /// Retries per stream for transient source failures.
    pub max_retries: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            fetch_size: 10_000,
            checkpoint_interval: Duration::from_secs(60),
            concurrency: 4,
            max_retries: 3,
        }
    }
}

/// Did the partition run to its end, or stop at a checkpoint with more
/// rows behind it?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionOutcome {
    Completed,
    Checkpointed,
}

/// Drives streams from their persisted checkpoints to completion:
/// asks the factory what to read next, executes it, emits the rows,
/// and persists progress after every batch.
pub struct PartitionRunner {
    querier: Arc<dyn RowQuerier>,
    sink: Arc<dyn RowSink>,
    store: Arc<dyn StateStore>,
    config: RunnerConfig,
}

impl PartitionRunner {
    pub fn new(
        querier: Arc<dyn RowQuerier>,
        sink: Arc<dyn RowSink>,
        store: Arc<dyn StateStore>,
        config: RunnerConfig,
    ) -> Self {
        PartitionRunner { querier, sink, store, config }
    }

    /// Runs all streams with bounded concurrency. The first failure is
    /// reported after every in-flight stream has wound down.
    pub async fn run_streams(
        self: &Arc<Self>,
        factory: Arc<PartitionFactory>,
        streams: Vec<Stream>,
        cancel: CancellationToken,
    ) -> Result<(), ExtractError> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut handles = Vec::with_capacity(streams.len());
        for stream in streams {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| ExtractError::Unexpected(e.to_string()))?;
            let runner = Arc::clone(self);
            let factory = Arc::clone(&factory);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                runner.run_stream(&factory, &stream, &cancel).await
            }));
        }

        let mut first_error = None;
        for handle in handles {
            let result = handle
                .await
                .map_err(|e| ExtractError::Unexpected(e.to_string()))?;
            if let Err(err) = result {
                error!(error = %err, "stream extraction failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Runs one stream until the factory reports nothing left to read.
    pub async fn run_stream(
        &self,
        factory: &PartitionFactory,
        stream: &Stream,
        cancel: &CancellationToken,
    ) -> Result<(), ExtractError> {
        let stream_id = stream.id();
        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(ExtractError::Cancelled);
            }
            let last = self.store.load(&stream_id).await?;
            let Some(partition) = factory.create(stream, last.as_ref()).await? else {
                info!(stream = %stream_id, "stream is caught up");
                return Ok(());
            };
            match self.run_partition(partition.as_ref(), cancel).await {
                Ok(_) => attempts = 0,
                Err(err) => {
                    if err.retry_disposition() == RetryDisposition::Retry
                        && attempts < self.config.max_retries
                    {
                        attempts += 1;
                        warn!(
                            stream = %stream_id,
                            attempt = attempts,
                            error = %err,
                            "transient failure; resuming from last checkpoint"
                        );
                        tokio::time::sleep(Duration::from_millis(
                            250 * u64::from(attempts),
                        ))
                        .await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Executes one partition and persists the checkpoint it ends on.
    pub async fn run_partition(
        &self,
        partition: &dyn Partition,
        cancel: &CancellationToken,
    ) -> Result<PartitionOutcome, ExtractError> {
        let stream = partition.stream();
        let stream_id = stream.id();

        let Some(query) = partition.resumable_query(self.config.fetch_size) else {
            let rows = cancellable(cancel, self.querier.query(&partition.full_query())).await?;
            let count = rows.len();
            for row in rows {
                self.sink.accept(stream, row).await?;
            }
            self.store.save(&stream_id, &partition.complete_state()).await?;
            info!(stream = %stream_id, rows = count, "non-resumable partition done");
            return Ok(PartitionOutcome::Completed);
        };

        let rows = cancellable(cancel, self.querier.query(&query)).await?;
        let batch_len = rows.len() as u64;
        let mut last_row = None;
        let mut last_checkpoint = Instant::now();
        for row in rows {
            self.sink.accept(stream, row.clone()).await?;
            if last_checkpoint.elapsed() >= self.config.checkpoint_interval {
                if let Some(state) = partition.incomplete_state(&row)? {
                    self.store.save(&stream_id, &state).await?;
                }
                last_checkpoint = Instant::now();
            }
            last_row = Some(row);
        }

        if batch_len < self.config.fetch_size {
            self.store.save(&stream_id, &partition.complete_state()).await?;
            info!(stream = %stream_id, rows = batch_len, "partition complete");
            return Ok(PartitionOutcome::Completed);
        }

        // A full batch means the range may extend past what we read.
        match last_row {
            Some(row) => match partition.incomplete_state(&row)? {
                Some(state) => {
                    self.store.save(&stream_id, &state).await?;
                    Ok(PartitionOutcome::Checkpointed)
                }
                None => {
                    self.store.save(&stream_id, &partition.complete_state()).await?;
                    Ok(PartitionOutcome::Completed)
                }
            },
            None => {
                self.store.save(&stream_id, &partition.complete_state()).await?;
                Ok(PartitionOutcome::Completed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use model::core::data_type::DataType;
    use model::core::value::Value;
    use model::records::row::Row;
    use model::stream::{Field, SyncMode};
    use query::SelectQuery;
    use query::dialect::Postgres;
    use tempfile::tempdir;

    use super::*;
    use crate::source::BoundQuerier;
    use crate::state::OpaqueState;
    use crate::state::store::SledStateStore;

    fn row(id: i64) -> Row {
        let mut r = Row::default();
        r.push("id", Value::Int(id));
        r
    }

    /// Serves pre-scripted batches regardless of the query text, and
    /// a fixed MAX for the factory.
    struct ScriptedSource {
        batches: Mutex<VecDeque<Result<Vec<Row>, ExtractError>>>,
        max: Option<Value>,
    }

    #[async_trait]
    impl RowQuerier for ScriptedSource {
        async fn query(&self, _query: &SelectQuery) -> Result<Vec<Row>, ExtractError> {
            self.batches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    #[async_trait]
    impl BoundQuerier for ScriptedSource {
        async fn max_value(
            &self,
            _stream: &Stream,
            _field: &Field,
        ) -> Result<Option<Value>, ExtractError> {
            Ok(self.max.clone())
        }
    }

    struct CollectingSink {
        rows: Mutex<Vec<Row>>,
    }

    #[async_trait]
    impl RowSink for CollectingSink {
        async fn accept(&self, _stream: &Stream, row: Row) -> Result<(), ExtractError> {
            self.rows.lock().unwrap().push(row);
            Ok(())
        }
    }

    fn users_stream() -> Stream {
        let id = Field::new("id", DataType::BigInt);
        Stream {
            name: "users".into(),
            namespace: Some("public".into()),
            fields: vec![id.clone()],
            primary_key: vec![id],
            cursor: None,
            sync_mode: SyncMode::FullRefresh,
        }
    }

    fn harness(
        batches: Vec<Result<Vec<Row>, ExtractError>>,
        max: Option<Value>,
        fetch_size: u64,
    ) -> (tempfile::TempDir, Arc<PartitionRunner>, Arc<PartitionFactory>, Arc<CollectingSink>)
    {
        let dir = tempdir().unwrap();
        let source = Arc::new(ScriptedSource {
            batches: Mutex::new(batches.into_iter().collect()),
            max,
        });
        let sink = Arc::new(CollectingSink { rows: Mutex::new(Vec::new()) });
        let store = Arc::new(SledStateStore::open(dir.path()).unwrap());
        let runner = Arc::new(PartitionRunner::new(
            source.clone(),
            sink.clone(),
            store,
            RunnerConfig { fetch_size, max_retries: 2, ..RunnerConfig::default() },
        ));
        let factory = Arc::new(PartitionFactory::new(Arc::new(Postgres), source));
        (dir, runner, factory, sink)
    }

    #[tokio::test]
    async fn stream_runs_batch_by_batch_until_caught_up() {
        let (_dir, runner, factory, sink) = harness(
            vec![Ok(vec![row(1), row(2)]), Ok(vec![row(3), row(100)])],
            Some(Value::Int(100)),
            2,
        );
        let stream = users_stream();
        runner
            .run_stream(&factory, &stream, &CancellationToken::new())
            .await
            .unwrap();

        let emitted = sink.rows.lock().unwrap().len();
        assert_eq!(emitted, 4);
        let state = runner.store.load(&stream.id()).await.unwrap();
        assert_eq!(
            state,
            Some(OpaqueState::PrimaryKey {
                pk_name: Some("id".into()),
                pk_val: Some("100".into()),
                incremental: None,
            })
        );
    }

    #[tokio::test]
    async fn short_batch_completes_the_partition() {
        let (_dir, runner, factory, _sink) =
            harness(vec![Ok(vec![row(1)])], Some(Value::Int(100)), 10);
        let stream = users_stream();
        let last = None;
        let partition = factory.create(&stream, last).await.unwrap().unwrap();
        let outcome = runner
            .run_partition(partition.as_ref(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, PartitionOutcome::Completed);
    }

    #[tokio::test]
    async fn keyless_cursor_stream_emits_every_row_despite_ties() {
        fn cursor_row(updated: i64) -> Row {
            let mut r = Row::default();
            r.push("updated_at", Value::Int(updated));
            r
        }
        // Two rows share the max cursor value. A batched read keyed on
        // the cursor alone could stop between them; the single-pass
        // scan must not.
        let (_dir, runner, factory, sink) = harness(
            vec![Ok(vec![cursor_row(1), cursor_row(2), cursor_row(2)])],
            Some(Value::Int(2)),
            2,
        );
        let updated = Field::new("updated_at", DataType::BigInt);
        let stream = Stream {
            name: "events".into(),
            namespace: Some("public".into()),
            fields: vec![updated.clone()],
            primary_key: Vec::new(),
            cursor: Some(updated),
            sync_mode: SyncMode::CursorIncremental,
        };
        runner
            .run_stream(&factory, &stream, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.rows.lock().unwrap().len(), 3);
        let state = runner.store.load(&stream.id()).await.unwrap();
        assert_eq!(
            state,
            Some(OpaqueState::CursorBased {
                cursor_field: vec!["updated_at".into()],
                cursor: Some("2".into()),
                pk_name: None,
                pk_val: None,
            })
        );
    }

    #[tokio::test]
    async fn transient_failures_resume_from_the_checkpoint() {
        let (_dir, runner, factory, sink) = harness(
            vec![
                Ok(vec![row(1), row(2)]),
                Err(ExtractError::Transient("connection reset".into())),
                Ok(vec![row(3), row(100)]),
            ],
            Some(Value::Int(100)),
            2,
        );
        let stream = users_stream();
        runner
            .run_stream(&factory, &stream, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sink.rows.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn fatal_failures_are_not_retried() {
        let (_dir, runner, factory, _sink) = harness(
            vec![Err(ExtractError::Config("bad".into()))],
            Some(Value::Int(100)),
            2,
        );
        let stream = users_stream();
        let err = runner
            .run_stream(&factory, &stream, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Config(_)));
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_stream() {
        let (_dir, runner, factory, _sink) =
            harness(vec![Ok(vec![row(1)])], Some(Value::Int(100)), 2);
        let token = CancellationToken::new();
        token.cancel();
        let err = runner
            .run_stream(&factory, &users_stream(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Cancelled));
    }

    #[tokio::test]
    async fn run_streams_reports_the_first_failure() {
        let (_dir, runner, factory, _sink) = harness(
            vec![Err(ExtractError::Config("bad".into()))],
            Some(Value::Int(100)),
            2,
        );
        let err = runner
            .run_streams(factory, vec![users_stream()], CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Config(_)));
    }
}
