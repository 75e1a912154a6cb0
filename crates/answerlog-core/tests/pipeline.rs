// End-to-end tests for the answer pipeline
//
// Drives AnswerLog with stub handlers and an in-memory SQLite store, checking
// what ends up in the `answers` table after shutdown.

use std::sync::Arc;

use answerlog_core::hickory_proto::op::{Message, MessageType, Query, ResponseCode};
use answerlog_core::hickory_proto::rr::rdata::A;
use answerlog_core::hickory_proto::rr::{Name, RData, Record, RecordType};
use answerlog_core::{
    AnswerLog, Batch, BatchWriter, Handler, PipelineState, ResponseSink, ServeError, ServeResult,
    SinkError, SqlStore, WriteOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

type Row = (String, DateTime<Utc>, DateTime<Utc>);

async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");
    sqlx::query(
        r#"CREATE TABLE "answers" (
            "domain" TEXT NOT NULL PRIMARY KEY,
            "created_at" DATETIME NOT NULL,
            "updated_at" DATETIME NOT NULL
        )"#,
    )
    .execute(&pool)
    .await
    .expect("Failed to create answers table");
    pool
}

async fn rows(pool: &SqlitePool) -> Vec<Row> {
    sqlx::query_as(r#"SELECT "domain", "created_at", "updated_at" FROM "answers" ORDER BY "domain""#)
        .fetch_all(pool)
        .await
        .expect("Failed to read answers")
}

fn request(name: &str) -> Message {
    let mut msg = Message::new();
    msg.set_id(42);
    msg.set_message_type(MessageType::Query);
    msg.add_query(Query::query(Name::from_ascii(name).unwrap(), RecordType::A));
    msg
}

/// Answers every request with one A record per configured name.
struct StaticAnswers {
    names: Vec<String>,
    failure: Option<ResponseCode>,
}

impl StaticAnswers {
    fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            failure: None,
        }
    }

    fn failing(names: &[&str], rcode: ResponseCode) -> Self {
        Self {
            failure: Some(rcode),
            ..Self::new(names)
        }
    }
}

#[async_trait]
impl Handler for StaticAnswers {
    fn name(&self) -> &str {
        "static"
    }

    async fn serve(&self, request: &Message, sink: &mut dyn ResponseSink) -> ServeResult {
        let mut response = Message::new();
        response.set_id(request.id());
        response.set_message_type(MessageType::Response);
        for name in &self.names {
            response.add_answer(Record::from_rdata(
                Name::from_ascii(name).unwrap(),
                300,
                RData::A(A::new(192, 0, 2, 10)),
            ));
        }
        sink.write_message(&response)
            .await
            .map_err(|e| ServeError::handler(ResponseCode::ServFail, e))?;

        match self.failure {
            Some(rcode) => Err(ServeError::handler(rcode, anyhow::anyhow!("upstream failed"))),
            None => Ok(ResponseCode::NoError),
        }
    }
}

/// Answers each request with the name carried in its question.
struct EchoQuestion;

#[async_trait]
impl Handler for EchoQuestion {
    fn name(&self) -> &str {
        "echo"
    }

    async fn serve(&self, request: &Message, sink: &mut dyn ResponseSink) -> ServeResult {
        let mut response = Message::new();
        response.set_message_type(MessageType::Response);
        for query in request.queries() {
            response.add_answer(Record::from_rdata(
                query.name().clone(),
                60,
                RData::A(A::new(198, 51, 100, 1)),
            ));
        }
        sink.write_message(&response)
            .await
            .map_err(|e| ServeError::handler(ResponseCode::ServFail, e))?;
        Ok(ResponseCode::NoError)
    }
}

#[derive(Default)]
struct NullSink {
    written: usize,
}

#[async_trait]
impl ResponseSink for NullSink {
    async fn write_message(&mut self, _message: &Message) -> Result<(), SinkError> {
        self.written += 1;
        Ok(())
    }
}

fn pipeline(next: impl Handler + 'static, pool: &SqlitePool) -> AnswerLog {
    AnswerLog::new(
        Some(Arc::new(next)),
        Arc::new(SqlStore::Sqlite(pool.clone())),
    )
}

#[tokio::test]
async fn test_overlapping_batches_create_once_update_once() {
    let pool = memory_pool().await;
    let store = Arc::new(SqlStore::Sqlite(pool.clone()));
    let writer = BatchWriter::new(store);

    let first: Batch = ["a.example."].into_iter().collect();
    let second: Batch = ["b.example.", "a.example."].into_iter().collect();
    writer.write(first).await.unwrap();
    writer.write(second).await.unwrap();

    let rows = rows(&pool).await;
    assert_eq!(rows.len(), 2);

    let (a, b) = (&rows[0], &rows[1]);
    assert_eq!(a.0, "a.example.");
    assert_eq!(b.0, "b.example.");

    // b was created by the second write, which also refreshed a
    assert_eq!(b.1, b.2);
    assert_eq!(a.2, b.1);
    assert!(a.1 <= a.2);
}

#[tokio::test]
async fn test_replaying_a_batch_is_idempotent() {
    let pool = memory_pool().await;
    let writer = BatchWriter::new(Arc::new(SqlStore::Sqlite(pool.clone())));
    let batch: Batch = ["x.example.", "y.example."].into_iter().collect();

    writer.write(batch.clone()).await.unwrap();
    let before = rows(&pool).await;

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let outcome = writer.write(batch).await.unwrap();
    assert_eq!(outcome, WriteOutcome::Written { records: 2 });
    let after = rows(&pool).await;

    assert_eq!(after.len(), 2);
    for (old, new) in before.iter().zip(after.iter()) {
        assert_eq!(old.0, new.0);
        assert_eq!(old.1, new.1, "created_at must not change");
        assert!(new.2 > old.2, "updated_at must advance");
    }
}

#[tokio::test]
async fn test_serve_records_answers_and_passes_result_through() {
    let pool = memory_pool().await;
    let log = pipeline(
        StaticAnswers::new(&["www.example.org.", "example.org.", "www.example.org."]),
        &pool,
    );

    let mut sink = NullSink::default();
    let rcode = log
        .serve(&request("www.example.org."), &mut sink)
        .await
        .unwrap();
    assert_eq!(rcode, ResponseCode::NoError);
    assert_eq!(sink.written, 1);

    let stats = log.shutdown().await;
    assert_eq!(stats.batches_written, 1);
    assert_eq!(stats.records_written, 2);

    let domains: Vec<_> = rows(&pool).await.into_iter().map(|r| r.0).collect();
    assert_eq!(domains, vec!["example.org.", "www.example.org."]);
}

#[tokio::test]
async fn test_next_handler_error_is_propagated_and_answers_still_recorded() {
    let pool = memory_pool().await;
    let log = pipeline(
        StaticAnswers::failing(&["partial.example."], ResponseCode::ServFail),
        &pool,
    );

    let mut sink = NullSink::default();
    let err = log
        .serve(&request("partial.example."), &mut sink)
        .await
        .unwrap_err();
    assert_eq!(err.rcode(), ResponseCode::ServFail);

    log.shutdown().await;
    assert_eq!(rows(&pool).await.len(), 1);
}

#[tokio::test]
async fn test_missing_next_handler_fails_with_servfail() {
    let pool = memory_pool().await;
    let log = AnswerLog::new(None, Arc::new(SqlStore::Sqlite(pool.clone())));

    let mut sink = NullSink::default();
    let err = log
        .serve(&request("example.org."), &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(err, ServeError::NoNextHandler { .. }));
    assert_eq!(err.rcode(), ResponseCode::ServFail);

    let stats = log.shutdown().await;
    assert_eq!(stats.batches_skipped, 1);
    assert_eq!(stats.batches_written, 0);
    assert!(rows(&pool).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_drains_every_enqueued_batch() {
    let pool = memory_pool().await;
    let log = Arc::new(AnswerLog::with_capacity(
        Some(Arc::new(EchoQuestion)),
        Arc::new(SqlStore::Sqlite(pool.clone())),
        4,
    ));

    let mut tasks = Vec::new();
    for i in 0..200 {
        let log = Arc::clone(&log);
        tasks.push(tokio::spawn(async move {
            let mut sink = NullSink::default();
            log.serve(&request(&format!("host{}.example.", i)), &mut sink)
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let stats = log.shutdown().await;
    assert_eq!(log.state(), PipelineState::Stopped);
    assert_eq!(stats.batches_written, 200);
    assert_eq!(stats.batches_failed, 0);
    assert_eq!(rows(&pool).await.len(), 200);
}

#[tokio::test]
async fn test_broken_store_reports_failures_without_stalling() {
    let pool = memory_pool().await;
    pool.close().await;
    let log = pipeline(StaticAnswers::new(&["test.example.org."]), &pool);

    for _ in 0..3 {
        let mut sink = NullSink::default();
        let rcode = log
            .serve(&request("test.example.org."), &mut sink)
            .await
            .unwrap();
        assert_eq!(rcode, ResponseCode::NoError);
    }

    let stats = log.shutdown().await;
    assert_eq!(stats.batches_failed, 3);
    assert_eq!(stats.batches_written, 0);
    assert_eq!(log.state(), PipelineState::Stopped);
}

#[tokio::test]
async fn test_lifecycle_misuse_is_tolerated() {
    let pool = memory_pool().await;
    let log = pipeline(StaticAnswers::new(&["late.example."]), &pool);
    assert_eq!(log.state(), PipelineState::Running);

    let first = log.shutdown().await;
    let second = log.shutdown().await;
    assert_eq!(first, second);

    // Serving after shutdown still answers; the batch is dropped
    let mut sink = NullSink::default();
    let rcode = log
        .serve(&request("late.example."), &mut sink)
        .await
        .unwrap();
    assert_eq!(rcode, ResponseCode::NoError);
    assert!(rows(&pool).await.is_empty());
}
