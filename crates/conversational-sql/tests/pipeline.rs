//! End-to-end runs of the orchestrator against a real SQLite file

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conversational_sql::generation::prompts;
use conversational_sql::{
    create_sqlite_orchestrator, Completion, Config, ConversationTurn, ExecutionEngine, FailureKind, GenerationAdapter, HistoryDatabase,
    HistoryStore, QueryOrchestrator, RequestOptions, SchemaCatalog, SchemaView, SqliteDataSource, SqliteHistoryStore,
};
use rusqlite::Connection;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Answers SQL prompts by keyword on the question line; answer prompts get a fixed text
struct ScriptedGenerator {
    rules: Vec<(&'static str, &'static str)>,
    delay: Option<Duration>,
    cancel_on: Option<(&'static str, CancellationToken)>,
    sql_prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn new(rules: Vec<(&'static str, &'static str)>) -> Self {
        Self {
            rules,
            delay: None,
            cancel_on: None,
            sql_prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.sql_prompts.lock().unwrap().clone()
    }
}

fn question_line(prompt: &str) -> &str {
    let tail = prompt.rsplit("Question: ").next().unwrap_or(prompt);
    tail.split("\n\nSQL:").next().unwrap_or(tail)
}

#[async_trait]
impl GenerationAdapter for ScriptedGenerator {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<Completion> {
        if system_prompt == prompts::answer_system_prompt() {
            return Ok(Completion::new("Scripted answer."));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sql_prompts.lock().unwrap().push(user_prompt.to_string());

        let question = question_line(user_prompt).to_lowercase();
        if let Some((keyword, token)) = &self.cancel_on {
            if question.contains(keyword) {
                token.cancel();
            }
        }
        let sql = self
            .rules
            .iter()
            .find(|(keyword, _)| question.contains(keyword))
            .map(|(_, sql)| *sql)
            .unwrap_or("ERROR: no rule for this question");
        Ok(Completion::new(format!("```sql\n{}\n```", sql)))
    }
}

fn seed_shop(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE products (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            sub_category TEXT,
            price REAL,
            rating REAL
        );
        INSERT INTO products (name, sub_category, price, rating) VALUES
            ('Oxford', 'Formal Shoes', 120.0, 4.5),
            ('Derby', 'Formal Shoes', 95.0, 4.1),
            ('Brogue', 'Formal Shoes', 150.0, 4.8),
            ('Pegasus', 'Running Shoes', 110.0, 4.7),
            ('Glide', 'Running Shoes', 80.0, 4.2),
            ('Sandal', 'Casual', 25.0, 3.9);
        CREATE TABLE orders (
            id INTEGER PRIMARY KEY,
            product_id INTEGER NOT NULL,
            quantity INTEGER NOT NULL
        );
        INSERT INTO orders (product_id, quantity) VALUES (1, 2), (4, 1), (6, 3);",
    )
    .unwrap();
}

struct Fixture {
    _dir: TempDir,
    source: Arc<SqliteDataSource>,
    history: Arc<SqliteHistoryStore>,
    generator: Arc<ScriptedGenerator>,
    orchestrator: QueryOrchestrator,
}

async fn fixture(generator: ScriptedGenerator) -> Fixture {
    let dir = TempDir::new().unwrap();
    let data_path = dir.path().join("shop.db");
    seed_shop(&data_path);

    let source = Arc::new(SqliteDataSource::open(&data_path).unwrap());
    let schema = SchemaView::introspect(source.as_ref(), Duration::from_secs(5))
        .await
        .unwrap();
    let history = Arc::new(
        HistoryDatabase::new(&dir.path().join("history.db"))
            .unwrap()
            .history_store(20),
    );
    let generator = Arc::new(generator);
    let orchestrator = QueryOrchestrator::new(
        Config::default(),
        schema,
        Arc::clone(&generator) as Arc<dyn GenerationAdapter>,
        Arc::clone(&source) as Arc<dyn ExecutionEngine>,
        Arc::clone(&history) as Arc<dyn HistoryStore>,
    );
    Fixture {
        _dir: dir,
        source,
        history,
        generator,
        orchestrator,
    }
}

#[tokio::test]
async fn follow_up_reuses_previous_filters() {
    let f = fixture(ScriptedGenerator::new(vec![
        (
            "formal",
            "SELECT name, rating FROM products WHERE sub_category = 'Formal Shoes' ORDER BY rating DESC LIMIT 3",
        ),
        (
            "running",
            "SELECT name, rating FROM products WHERE sub_category = 'Running Shoes' ORDER BY rating DESC LIMIT 3",
        ),
    ]))
    .await;

    let first = f.orchestrator.process("Top 3 formal shoes by rating", "alice").await;
    assert!(first.success);
    assert_eq!(first.row_count, 3);
    assert_eq!(first.data[0]["name"], "Brogue");
    assert_eq!(first.query_type.as_deref(), Some("ranking"));

    let second = f.orchestrator.process("same for running shoes", "alice").await;
    assert!(second.success);
    assert_eq!(second.row_count, 2);
    assert_eq!(second.data[0]["name"], "Pegasus");

    let prompts = f.generator.prompts();
    assert!(!prompts[0].contains("CONVERSATION CONTEXT"));
    assert!(prompts[1].contains("CONVERSATION CONTEXT (Follow-up detected)"));
    assert!(prompts[1].contains("[Q1] Top 3 formal shoes by rating"));
    assert!(prompts[1].contains("sub_category = 'Formal Shoes'"));
    assert!(prompts[1].contains("[Result: 3 rows returned]"));

    let turns = f.history.get_recent("alice", 10).unwrap();
    assert_eq!(turns.len(), 4);
    assert_eq!(turns[3].row_count(), 2);
    assert!(f.history.get_recent("bob", 10).unwrap().is_empty());
}

#[tokio::test]
async fn compound_question_is_aggregated_once() {
    let f = fixture(ScriptedGenerator::new(vec![
        ("cheapest", "SELECT name, price FROM products ORDER BY price ASC LIMIT 2"),
        ("orders", "SELECT missing_column FROM orders"),
    ]))
    .await;

    let outcome = f
        .orchestrator
        .process("What are the cheapest shoes? How many orders were placed?", "alice")
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.parts.len(), 2);
    assert_eq!(outcome.row_count, 2);
    assert!(outcome.answer.contains("**Part 1:** Scripted answer."));
    assert!(outcome.answer.contains("**Part 2:**"));
    assert!(outcome.answer.contains("(Error: execution failed)"));
    assert!(!outcome.answer.contains("missing_column"));
    assert_eq!(outcome.sql.as_deref(), Some("SELECT name, price FROM products ORDER BY price ASC LIMIT 2"));
    assert_eq!(outcome.parts[1].failure.as_ref().unwrap().kind, FailureKind::ExecutionFailed);

    let turns = f.history.get_recent("alice", 10).unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].content, "What are the cheapest shoes? How many orders were placed?");
    assert_eq!(
        turns[1].sql(),
        Some("SELECT name, price FROM products ORDER BY price ASC LIMIT 2; SELECT missing_column FROM orders LIMIT 50")
    );
    assert_eq!(turns[1].row_count(), 2);
}

#[tokio::test]
async fn destructive_sql_never_reaches_the_store() {
    let f = fixture(ScriptedGenerator::new(vec![(
        "wipe",
        "SELECT * FROM products; DROP TABLE products",
    )]))
    .await;

    let outcome = f.orchestrator.process("please wipe the product list", "alice").await;
    assert!(!outcome.success);
    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::SafetyRejected);
    assert_eq!(failure.reason, "Forbidden SQL keyword detected: DROP");
    assert!(outcome.answer.contains("Forbidden SQL keyword detected: DROP"));

    let still_there = f.source.execute("SELECT COUNT(*) AS n FROM products").await.unwrap();
    assert_eq!(still_there.rows[0]["n"], 6);
}

#[tokio::test]
async fn slow_generation_times_out_and_is_recorded() {
    let mut generator = ScriptedGenerator::new(vec![("shoes", "SELECT name FROM products")]);
    generator.delay = Some(Duration::from_millis(300));
    let f = fixture(generator).await;

    let options = RequestOptions {
        generation_timeout: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let outcome = f
        .orchestrator
        .process_with("list the formal shoes by price", "alice", options)
        .await;

    assert_eq!(outcome.failure.as_ref().unwrap().kind, FailureKind::GenerationTimeout);
    assert!(outcome.answer.contains("generation timeout"));

    let turns = f.history.get_recent("alice", 10).unwrap();
    assert_eq!(turns.len(), 2);
    let error = turns[1].metadata.as_ref().and_then(|m| m.error.clone()).unwrap();
    assert!(error.starts_with("generation timeout"));
}

#[tokio::test]
async fn cancellation_keeps_finished_parts() {
    let token = CancellationToken::new();
    let mut generator = ScriptedGenerator::new(vec![
        ("cheapest", "SELECT name, price FROM products ORDER BY price ASC LIMIT 2"),
        ("ratings", "SELECT name, rating FROM products LIMIT 5"),
        ("orders", "SELECT COUNT(*) AS n FROM orders"),
    ]);
    generator.cancel_on = Some(("ratings", token.clone()));
    let f = fixture(generator).await;

    let outcome = f
        .orchestrator
        .process_with(
            "What are the cheapest shoes? Show product ratings; How many orders exist?",
            "alice",
            RequestOptions::with_cancellation(token),
        )
        .await;

    assert!(outcome.cancelled);
    assert_eq!(outcome.parts.len(), 3);
    assert!(outcome.parts[0].success);
    assert_eq!(outcome.parts[0].row_count, 2);
    for part in &outcome.parts[1..] {
        assert_eq!(part.failure.as_ref().unwrap().kind, FailureKind::Cancelled);
    }
    assert_eq!(outcome.row_count, 2);
    assert_eq!(f.generator.prompts().len(), 2);
    assert!(f.history.get_recent("alice", 10).unwrap().is_empty());
}

#[tokio::test]
async fn factory_wires_sqlite_files() {
    let dir = TempDir::new().unwrap();
    let data_path = dir.path().join("shop.db");
    seed_shop(&data_path);

    let orchestrator = create_sqlite_orchestrator(Config::default(), &data_path, &dir.path().join("state/history.db"))
        .await
        .unwrap();
    let schema = orchestrator.schema();
    let tables: Vec<&str> = schema.table_names().collect();
    assert_eq!(tables, vec!["orders", "products"]);
    assert!(dir.path().join("state/history.db").exists());
}

#[tokio::test]
async fn factory_expires_idle_history_sessions() {
    let dir = TempDir::new().unwrap();
    let data_path = dir.path().join("shop.db");
    let history_path = dir.path().join("history.db");
    seed_shop(&data_path);
    {
        let store = HistoryDatabase::new(&history_path).unwrap().history_store(20);
        store.append("stale", ConversationTurn::user("last year's question")).unwrap();
        store.append("recent", ConversationTurn::user("today's question")).unwrap();
    }
    Connection::open(&history_path)
        .unwrap()
        .execute(
            "UPDATE sessions SET last_accessed = '2000-01-01T00:00:00+00:00' WHERE session_id = 'stale'",
            [],
        )
        .unwrap();

    let mut config = Config::default();
    config.history.retention_days = Some(30);
    let _orchestrator = create_sqlite_orchestrator(config, &data_path, &history_path).await.unwrap();

    let store = HistoryDatabase::new(&history_path).unwrap().history_store(20);
    assert!(store.get_recent("stale", 10).unwrap().is_empty());
    assert_eq!(store.get_recent("recent", 10).unwrap().len(), 1);
}

#[test]
fn introspection_reports_samples() {
    let dir = TempDir::new().unwrap();
    let data_path = dir.path().join("shop.db");
    seed_shop(&data_path);
    let source = SqliteDataSource::open(&data_path).unwrap();

    let columns = tokio_test::block_on(source.describe("products")).unwrap();
    let sub_category = columns.iter().find(|c| c.name == "sub_category").unwrap();
    assert!(sub_category.nullable);
    assert_eq!(sub_category.sample_values.len(), 3);

    let view = tokio_test::block_on(SchemaView::introspect(&source, Duration::from_secs(5))).unwrap();
    let rendered = view.render_for_prompt();
    assert!(rendered.starts_with("TABLE orders: id (INTEGER)"));
    assert!(rendered.contains("\nTABLE products: id (INTEGER)"));
    assert!(rendered.contains("sub_category (TEXT, nullable) [examples: "));
}
