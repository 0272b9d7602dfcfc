use async_trait::async_trait;
use repose_core::config::SessionSettings;
use repose_core::connection::{ReactiveConnection, Rows};
use repose_core::errors::{ReposeError, Result};
use repose_core::model::{AttributeMapping, CascadeStyle, EntityDescriptor, IdStrategy, IdType, SqlValue, TypeHandler, VersionType};
use repose_core::sql::StandardDialect;
use repose_core::{MappingRegistry, Session, SessionFactory};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// One statement the fake connection received
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Scripted in-memory stand-in for a database connection
///
/// Writes are recorded and report `affected_rows` (1 unless changed).
/// Selects answer from rows registered with [`FakeConnection::script_row`],
/// matched on the table name and the first parameter.
pub struct FakeConnection {
    statements: RefCell<Vec<Statement>>,
    rows: RefCell<Vec<(String, SqlValue, Vec<SqlValue>)>>,
    next_key: Cell<i64>,
    sequences: RefCell<HashMap<String, i64>>,
    affected_rows: Cell<u64>,
    fail_on: RefCell<Option<String>>,
    transactions: RefCell<Vec<&'static str>>,
}

#[allow(dead_code)]
impl FakeConnection {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            statements: RefCell::new(Vec::new()),
            rows: RefCell::new(Vec::new()),
            next_key: Cell::new(100),
            sequences: RefCell::new(HashMap::new()),
            affected_rows: Cell::new(1),
            fail_on: RefCell::new(None),
            transactions: RefCell::new(Vec::new()),
        })
    }

    /// Answer selects on `table` whose first parameter is `id` with `row`
    /// (the leading literal `1` included). Scripting the same id twice
    /// makes the select return both rows.
    pub fn script_row(&self, table: &str, id: SqlValue, row: Vec<SqlValue>) {
        self.rows.borrow_mut().push((table.to_string(), id, row));
    }

    pub fn remove_row(&self, table: &str, id: &SqlValue) {
        self.rows
            .borrow_mut()
            .retain(|(t, i, _)| !(t == table && i == id));
    }

    pub fn set_affected_rows(&self, rows: u64) {
        self.affected_rows.set(rows);
    }

    /// Fail every write whose SQL contains `fragment`
    pub fn fail_on(&self, fragment: &str) {
        *self.fail_on.borrow_mut() = Some(fragment.to_string());
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.statements.borrow().clone()
    }

    /// Write statements only, in execution order
    pub fn writes(&self) -> Vec<Statement> {
        self.statements
            .borrow()
            .iter()
            .filter(|s| !s.sql.starts_with("SELECT"))
            .cloned()
            .collect()
    }

    pub fn selects(&self) -> usize {
        self.statements
            .borrow()
            .iter()
            .filter(|s| s.sql.starts_with("SELECT"))
            .count()
    }

    pub fn transactions(&self) -> Vec<&'static str> {
        self.transactions.borrow().clone()
    }

    fn record(&self, sql: &str, params: &[SqlValue]) -> Result<()> {
        self.statements.borrow_mut().push(Statement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        if let Some(fragment) = self.fail_on.borrow().as_deref() {
            if sql.contains(fragment) {
                return Err(ReposeError::database(format!("scripted failure on {}", fragment)));
            }
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl ReactiveConnection for FakeConnection {
    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<u64> {
        self.record(sql, &params)?;
        Ok(self.affected_rows.get())
    }

    async fn insert_returning_key(&self, sql: &str, params: Vec<SqlValue>) -> Result<SqlValue> {
        self.record(sql, &params)?;
        let key = self.next_key.get() + 1;
        self.next_key.set(key);
        Ok(SqlValue::Integer(key))
    }

    async fn select(&self, sql: &str, params: Vec<SqlValue>) -> Result<Rows> {
        self.record(sql, &params)?;
        let first = params.first().cloned().unwrap_or(SqlValue::Null);
        Ok(self
            .rows
            .borrow()
            .iter()
            .filter(|(table, id, _)| sql.contains(&format!("FROM \"{}\"", table)) && id == &first)
            .map(|(_, _, row)| row.clone())
            .collect())
    }

    async fn next_sequence_value(&self, sequence: &str) -> Result<i64> {
        let mut sequences = self.sequences.borrow_mut();
        let value = sequences.entry(sequence.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn begin(&self) -> Result<()> {
        self.transactions.borrow_mut().push("begin");
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.transactions.borrow_mut().push("commit");
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.transactions.borrow_mut().push("rollback");
        Ok(())
    }
}

/// `Book`: assigned long id; `title`, then `author` (many-to-one, cascade persist+merge)
#[allow(dead_code)]
pub fn book() -> EntityDescriptor {
    EntityDescriptor::builder("Book", "books")
        .id("id", "id", IdType::Long, IdStrategy::Assigned)
        .attribute(AttributeMapping::basic("title", TypeHandler::Text))
        .attribute(
            AttributeMapping::many_to_one("author", "Author")
                .cascade(CascadeStyle::PERSIST | CascadeStyle::MERGE | CascadeStyle::REFRESH),
        )
        .build()
        .unwrap()
}

/// `Author`: identity id; `name`, then `books` (one-to-many, cascade all)
#[allow(dead_code)]
pub fn author() -> EntityDescriptor {
    EntityDescriptor::builder("Author", "authors")
        .id("id", "id", IdType::Long, IdStrategy::Identity)
        .attribute(AttributeMapping::basic("name", TypeHandler::Text))
        .attribute(AttributeMapping::one_to_many("books", "Book").cascade(CascadeStyle::ALL))
        .build()
        .unwrap()
}

/// `Article`: assigned id, counter-versioned; `title`, `version`
#[allow(dead_code)]
pub fn article() -> EntityDescriptor {
    EntityDescriptor::builder("Article", "articles")
        .id("id", "id", IdType::Long, IdStrategy::Assigned)
        .attribute(AttributeMapping::basic("title", TypeHandler::Text))
        .attribute(AttributeMapping::basic("version", TypeHandler::Integer))
        .version("version", VersionType::Counter)
        .build()
        .unwrap()
}

/// `Person`: assigned id; `name`, `partner` (self-referencing many-to-one, cascade persist)
#[allow(dead_code)]
pub fn person() -> EntityDescriptor {
    EntityDescriptor::builder("Person", "people")
        .id("id", "id", IdType::Long, IdStrategy::Assigned)
        .attribute(AttributeMapping::basic("name", TypeHandler::Text))
        .attribute(AttributeMapping::many_to_one("partner", "Person").cascade(CascadeStyle::PERSIST))
        .build()
        .unwrap()
}

/// `Node`: identity id; `name`, `partner` (self-referencing many-to-one, cascade persist)
#[allow(dead_code)]
pub fn node() -> EntityDescriptor {
    EntityDescriptor::builder("Node", "nodes")
        .id("id", "id", IdType::Long, IdStrategy::Identity)
        .attribute(AttributeMapping::basic("name", TypeHandler::Text))
        .attribute(AttributeMapping::many_to_one("partner", "Node").cascade(CascadeStyle::PERSIST))
        .build()
        .unwrap()
}

/// `Ticket`: sequence-generated id; `subject`
#[allow(dead_code)]
pub fn ticket() -> EntityDescriptor {
    EntityDescriptor::builder("Ticket", "tickets")
        .id(
            "id",
            "id",
            IdType::Long,
            IdStrategy::Sequence {
                name: "ticket_seq".to_string(),
            },
        )
        .attribute(AttributeMapping::basic("subject", TypeHandler::Text))
        .build()
        .unwrap()
}

/// Factory over every test entity
#[allow(dead_code)]
pub fn factory() -> Arc<SessionFactory> {
    factory_with(SessionSettings::default())
}

#[allow(dead_code)]
pub fn factory_with(settings: SessionSettings) -> Arc<SessionFactory> {
    let mut registry = MappingRegistry::new();
    for descriptor in [book(), author(), article(), person(), node(), ticket()] {
        registry.register(descriptor).unwrap();
    }
    SessionFactory::new(registry, Arc::new(StandardDialect), settings).unwrap()
}

/// A session on the shared test factory plus its connection
#[allow(dead_code)]
pub fn open() -> (Session, Rc<FakeConnection>) {
    let connection = FakeConnection::new();
    let session = factory().open_session(connection.clone());
    (session, connection)
}
