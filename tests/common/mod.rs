//! Shared test infrastructure for integration tests.
#![allow(dead_code)]

use bizq::error::PipelineError;
use bizq::generate::QueryGenerator;
use bizq::lm::{ChatModel, ChatRequest, LmError, ModelProfile};
use bizq::pipeline::{Assistant, AssistantBuilder, AssistantSettings};
use bizq::schema::SchemaHint;
use bizq::store::{ColumnInfo, DataStore, ResultSet, SqliteStore, StoreError};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Chat model answering from a fixed reply per model id.
pub struct ScriptedChat {
    replies: Vec<(String, Option<String>)>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    /// `None` makes that model time out.
    pub fn new(replies: &[(&str, Option<&str>)]) -> Arc<Self> {
        Arc::new(Self {
            replies: replies
                .iter()
                .map(|(model, reply)| (model.to_string(), reply.map(str::to_string)))
                .collect(),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn models_called(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.profile.model.clone())
            .collect()
    }

    /// Concatenated message text of every request sent to `model`.
    pub fn prompt_text(&self, model: &str) -> String {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.profile.model == model)
            .flat_map(|request| request.messages.iter().map(|m| m.content.clone()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl ChatModel for ScriptedChat {
    fn chat(&self, request: &ChatRequest) -> Result<String, LmError> {
        self.requests.lock().unwrap().push(request.clone());
        let model = &request.profile.model;
        match self.replies.iter().find(|(name, _)| name == model) {
            Some((_, Some(reply))) => Ok(reply.clone()),
            Some((_, None)) => Err(LmError::Timeout(request.timeout)),
            None => Err(LmError::Protocol(format!("no reply scripted for {model}"))),
        }
    }
}

/// Generator returning the same raw text for every question.
pub struct ScriptedGenerator {
    raw: String,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(raw: &str) -> Arc<Self> {
        Arc::new(Self {
            raw: raw.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl QueryGenerator for ScriptedGenerator {
    fn generate_query(
        &self,
        _question: &str,
        _hint: &SchemaHint,
        _timeout: Duration,
    ) -> Result<String, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.raw.clone())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// SQLite store that counts how often it is touched.
pub struct CountingStore {
    inner: SqliteStore,
    pub queries: AtomicUsize,
    pub catalog_reads: AtomicUsize,
}

impl CountingStore {
    pub fn open(path: &Path) -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteStore::open(path, 2).unwrap(),
            queries: AtomicUsize::new(0),
            catalog_reads: AtomicUsize::new(0),
        })
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn catalog_count(&self) -> usize {
        self.catalog_reads.load(Ordering::SeqCst)
    }
}

impl DataStore for CountingStore {
    fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        self.catalog_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.list_tables()
    }

    fn list_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, StoreError> {
        self.catalog_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.list_columns(table)
    }

    fn query(&self, sql: &str, retain: usize, timeout: Duration) -> Result<ResultSet, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(sql, retain, timeout)
    }
}

/// Small shop database in a temp dir: three products in stock, one sold out,
/// and eighty orders.
pub struct ShopFixture {
    _dir: TempDir,
    pub db_path: PathBuf,
    pub docs_dir: PathBuf,
}

impl ShopFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("shop.db");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE products (
                 id INTEGER PRIMARY KEY,
                 name TEXT NOT NULL,
                 price REAL NOT NULL,
                 stock INTEGER NOT NULL,
                 description TEXT,
                 image TEXT
             );
             CREATE TABLE orders (
                 id INTEGER PRIMARY KEY,
                 product_id INTEGER NOT NULL REFERENCES products(id),
                 quantity INTEGER NOT NULL,
                 created_at TEXT NOT NULL
             );
             INSERT INTO products (name, price, stock, description, image) VALUES
                 ('Kettle', 25.5, 12, 'secret supplier notes', 'data:image/png;base64,AAAA'),
                 ('Desk Fan', 40.0, 3, 'secret supplier notes', NULL),
                 ('Lamp', 12.0, 7, 'secret supplier notes', NULL),
                 ('Toaster', 30.0, 0, 'secret supplier notes', NULL);",
        )
        .unwrap();
        for i in 0..80 {
            conn.execute(
                "INSERT INTO orders (product_id, quantity, created_at) VALUES (?1, ?2, '2024-05-01')",
                rusqlite::params![1 + i % 4, 1 + i % 3],
            )
            .unwrap();
        }

        let docs_dir = dir.path().join("docs");
        std::fs::create_dir(&docs_dir).unwrap();
        std::fs::write(
            docs_dir.join("policies.md"),
            "Returns are accepted within 7 days of delivery with the original receipt.\n\n\
             Shipping is free for orders above 50 dollars.\n",
        )
        .unwrap();

        Self {
            _dir: dir,
            db_path,
            docs_dir,
        }
    }

    pub fn store(&self) -> Arc<CountingStore> {
        CountingStore::open(&self.db_path)
    }
}

/// Settings whose model ids name the task they serve.
pub fn settings() -> AssistantSettings {
    AssistantSettings {
        classify: ModelProfile::new("classify", 16, None),
        general: ModelProfile::new("general", 256, None),
        generate: ModelProfile::new("generate", 256, None),
        summary: ModelProfile::new("summary", 256, None),
        keep_alive: None,
        ..AssistantSettings::default()
    }
}

pub fn builder(chat: Arc<ScriptedChat>, store: Arc<CountingStore>) -> AssistantBuilder {
    Assistant::builder(chat, store).settings(settings())
}
