use super::*;
use crate::record;
use crate::value::ValueTag;

// ── Recording executor shared by the tests below ──

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Execute(String, Vec<Value>),
    Begin,
    Commit,
    Rollback,
    TableColumns,
}

#[derive(Debug, Default)]
struct RecordingExecutor {
    calls: Vec<Call>,
    /// Fail the n-th `execute` call (0-based).
    fail_execute_at: Option<usize>,
    fail_commit: bool,
    executes: usize,
    /// `Some(None)`: table missing, `Some(Some(cols))`: existing table,
    /// `None`: introspection unsupported.
    columns: Option<Option<Vec<String>>>,
}

impl RecordingExecutor {
    fn new() -> Self {
        Self::default()
    }

    fn failing_at(n: usize) -> Self {
        Self {
            fail_execute_at: Some(n),
            ..Self::default()
        }
    }

    fn with_table(columns: Option<&[&str]>) -> Self {
        Self {
            columns: Some(columns.map(|c| c.iter().map(|s| s.to_string()).collect())),
            ..Self::default()
        }
    }

    fn executed_sql(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Execute(sql, _) => Some(sql.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Executor for RecordingExecutor {
    fn execute(&mut self, sql: &str, params: &[Value]) -> DictResult<u64> {
        self.calls.push(Call::Execute(sql.to_string(), params.to_vec()));
        let n = self.executes;
        self.executes += 1;
        if self.fail_execute_at == Some(n) {
            return Err(DictError::UniqueViolation("events_pkey: duplicate key".to_string()));
        }
        Ok(1)
    }

    fn commit(&mut self) -> DictResult<()> {
        self.calls.push(Call::Commit);
        if self.fail_commit {
            return Err(DictError::Connection("connection reset".to_string()));
        }
        Ok(())
    }

    fn begin(&mut self) -> DictResult<()> {
        self.calls.push(Call::Begin);
        Ok(())
    }

    fn rollback(&mut self) -> DictResult<()> {
        self.calls.push(Call::Rollback);
        Ok(())
    }

    fn table_columns(&mut self, table: &TableName) -> DictResult<Option<Vec<String>>> {
        self.calls.push(Call::TableColumns);
        match &self.columns {
            Some(columns) => Ok(columns.clone()),
            None => Err(DictError::Unsupported(format!("introspection of {table}"))),
        }
    }
}

fn mapper() -> TypeMapper {
    TypeMapper::builder()
        .direct("id", "int")
        .prefix("pre_", "varchar(10)")
        .suffix("_su", "int")
        .typed(ValueTag::Int64, "int")
        .typed(ValueTag::Object, "varchar(max)")
        .build()
}

fn connector(executor: RecordingExecutor) -> DictConnector<RecordingExecutor> {
    DictConnector::new("events", mapper(), executor).unwrap()
}

// ── Resolution ──

#[test]
fn resolve_uses_the_mapper() {
    let conn = connector(RecordingExecutor::new());
    assert_eq!(conn.resolve("id", &Value::from(5)).unwrap(), "int");
    assert_eq!(conn.resolve("pre_name", &Value::from("x")).unwrap(), "varchar(10)");
    assert!(conn.resolve("other", &Value::from(1.5)).unwrap_err().is_unresolved_type());
}

#[test]
fn typed_columns_follow_record_order() {
    let conn = connector(RecordingExecutor::new());
    let typed = conn
        .typed_columns(&record! { "count_su" => 3, "id" => 1, "other" => "t" })
        .unwrap();
    let pairs: Vec<_> = typed.iter().map(|t| (t.column.as_str(), t.sql_type.as_str())).collect();
    assert_eq!(pairs, vec![("count_su", "int"), ("id", "int"), ("other", "varchar(max)")]);
}

#[test]
fn invalid_table_name_is_rejected() {
    assert!(DictConnector::new("bad table", mapper(), RecordingExecutor::new()).is_err());
}

// ── Single insert ──

#[test]
fn build_insert_has_no_side_effects() {
    let conn = connector(RecordingExecutor::new());
    let stmt = conn.build_insert(&record! { "id" => 1, "name" => "a" }).unwrap();
    assert_eq!(stmt.sql, r#"INSERT INTO events ("id", "name") VALUES ($1, $2)"#);
    assert!(conn.executor().calls.is_empty());
}

#[test]
fn insert_dict_executes_and_commits() {
    let mut conn = connector(RecordingExecutor::new());
    let rows = conn.insert_dict(record! { "id" => 1, "name" => "a" }).unwrap();
    assert_eq!(rows, 1);
    assert_eq!(
        conn.executor().calls,
        vec![
            Call::Execute(
                r#"INSERT INTO events ("id", "name") VALUES ($1, $2)"#.to_string(),
                vec![Value::Int(1), Value::Text("a".into())]
            ),
            Call::Commit,
        ]
    );
}

#[test]
fn insert_dict_drops_nulls_unless_kept() {
    let mut conn = connector(RecordingExecutor::new());
    conn.insert_dict(record! { "id" => 1, "note" => Value::Null }).unwrap();
    assert_eq!(conn.executor().executed_sql(), vec![r#"INSERT INTO events ("id") VALUES ($1)"#]);

    let options = ConnectorOptions::new().keep_nulls(true);
    let mut conn =
        DictConnector::with_options("events", mapper(), RecordingExecutor::new(), options).unwrap();
    conn.insert_dict(record! { "id" => 1, "note" => Value::Null }).unwrap();
    assert_eq!(
        conn.executor().executed_sql(),
        vec![r#"INSERT INTO events ("id", "note") VALUES ($1, $2)"#]
    );
}

#[test]
fn insert_dict_wraps_execution_errors() {
    let mut conn = connector(RecordingExecutor::failing_at(0));
    let err = conn.insert_dict(record! { "id" => 1, "name" => "a" }).unwrap_err();
    match &err {
        DictError::Insert { table, columns, source } => {
            assert_eq!(table, "events");
            assert_eq!(columns, &["id".to_string(), "name".to_string()]);
            assert!(matches!(**source, DictError::UniqueViolation(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_unique_violation());
    // No commit after a failed execute.
    assert!(!conn.executor().calls.contains(&Call::Commit));
}

#[test]
fn composite_id_is_added_before_insert() {
    let options = ConnectorOptions::new().composite_id(CompositeId::new("key", ["region", "id"]));
    let mut conn =
        DictConnector::with_options("events", mapper(), RecordingExecutor::new(), options).unwrap();
    conn.insert_dict(record! { "id" => 7, "region" => "eu" }).unwrap();
    assert_eq!(
        conn.executor().calls[0],
        Call::Execute(
            r#"INSERT INTO events ("id", "region", "key") VALUES ($1, $2, $3)"#.to_string(),
            vec![Value::Int(7), Value::Text("eu".into()), Value::Text("eu+7".into())]
        )
    );
}

#[test]
fn options_are_validated() {
    let options = ConnectorOptions::new().max_rows_per_statement(0);
    assert!(DictConnector::with_options("events", mapper(), RecordingExecutor::new(), options).is_err());

    let options = ConnectorOptions::new().composite_id(CompositeId::new("key", Vec::<String>::new()));
    assert!(DictConnector::with_options("events", mapper(), RecordingExecutor::new(), options).is_err());
}

// ── Keyed writes ──

fn keyed_connector(executor: RecordingExecutor) -> DictConnector<RecordingExecutor> {
    let options = ConnectorOptions::new().id_column("id");
    DictConnector::with_options("events", mapper(), executor, options).unwrap()
}

#[test]
fn keyed_insert_skips_existing_ids() {
    let mut conn = keyed_connector(RecordingExecutor::new());
    conn.insert_dict(record! { "id" => 1, "name" => "a" }).unwrap();
    assert_eq!(
        conn.executor().executed_sql(),
        vec![r#"INSERT INTO events ("id", "name") VALUES ($1, $2) ON CONFLICT ("id") DO NOTHING"#]
    );
}

#[test]
fn upsert_dict_overwrites_existing_ids() {
    let mut conn = keyed_connector(RecordingExecutor::new());
    assert_eq!(conn.upsert_dict(record! { "id" => 1, "name" => "b" }).unwrap(), 1);
    assert_eq!(
        conn.executor().calls,
        vec![
            Call::Execute(
                r#"INSERT INTO events ("id", "name") VALUES ($1, $2) ON CONFLICT ("id") DO UPDATE SET "name" = EXCLUDED."name""#
                    .to_string(),
                vec![Value::Int(1), Value::Text("b".into())]
            ),
            Call::Commit,
        ]
    );
}

#[test]
fn upsert_dict_needs_an_id_column() {
    let mut conn = connector(RecordingExecutor::new());
    let err = conn.upsert_dict(record! { "id" => 1 }).unwrap_err();
    assert!(matches!(err, DictError::Validation(_)));
    assert!(conn.executor().calls.is_empty());
}

#[test]
fn keyed_writes_reject_records_without_id() {
    let mut conn = keyed_connector(RecordingExecutor::new());
    assert!(conn.insert_dict(record! { "name" => "a" }).is_err());
    assert!(conn.append_to_batch(record! { "id" => Value::Null, "name" => "a" }).is_err());
    assert_eq!(conn.pending(), 0);
    assert!(conn.executor().calls.is_empty());
}

#[test]
fn keyed_batch_updates_existing_ids() {
    let mut conn = keyed_connector(RecordingExecutor::new());
    conn.append_to_batch(record! { "id" => 1, "name" => "a" }).unwrap();
    conn.append_to_batch(record! { "id" => 2, "name" => "b" }).unwrap();
    conn.append_to_batch(record! { "id" => 1, "name" => "c" }).unwrap();

    assert_eq!(conn.execute_batch().unwrap(), 1);
    assert_eq!(conn.pending(), 0);
    assert_eq!(
        conn.executor().calls,
        vec![
            Call::Begin,
            Call::Execute(
                r#"INSERT INTO events ("id", "name") VALUES ($1, $2), ($3, $4) ON CONFLICT ("id") DO UPDATE SET "name" = EXCLUDED."name""#
                    .to_string(),
                vec![
                    Value::Int(2),
                    Value::Text("b".into()),
                    Value::Int(1),
                    Value::Text("c".into())
                ]
            ),
            Call::Commit,
        ]
    );
}

#[test]
fn composite_id_can_serve_as_id_column() {
    let options = ConnectorOptions::new()
        .composite_id(CompositeId::new("key", ["region", "id"]))
        .id_column("key");
    let conn =
        DictConnector::with_options("events", mapper(), RecordingExecutor::new(), options).unwrap();
    let stmt = conn.build_insert(&record! { "id" => 7, "region" => "eu" }).unwrap();
    assert!(stmt.sql.ends_with(r#"ON CONFLICT ("key") DO NOTHING"#), "{}", stmt.sql);
}

#[test]
fn invalid_id_column_is_rejected() {
    let options = ConnectorOptions::new().id_column("");
    assert!(DictConnector::with_options("events", mapper(), RecordingExecutor::new(), options).is_err());
}

// ── Batching ──

#[test]
fn mismatched_append_leaves_batch_unchanged() {
    let mut conn = connector(RecordingExecutor::new());
    conn.append_to_batch(record! { "a" => 1, "b" => 2 }).unwrap();
    let err = conn.append_to_batch(record! { "a" => 3, "c" => 4 }).unwrap_err();
    assert!(err.is_schema_mismatch());
    assert_eq!(conn.pending(), 1);
    assert!(conn.executor().calls.is_empty());
}

#[test]
fn empty_batch_does_not_touch_executor() {
    let mut conn = connector(RecordingExecutor::new());
    assert_eq!(conn.execute_batch().unwrap(), 0);
    assert!(conn.executor().calls.is_empty());
}

#[test]
fn execute_batch_runs_one_transaction_and_clears() {
    let mut conn = connector(RecordingExecutor::new());
    conn.append_to_batch(record! { "a" => 1, "b" => Value::Null }).unwrap();
    conn.append_to_batch(record! { "b" => 4, "a" => 3 }).unwrap();

    let rows = conn.execute_batch().unwrap();
    assert_eq!(rows, 1);
    assert_eq!(conn.pending(), 0);
    assert_eq!(
        conn.executor().calls,
        vec![
            Call::Begin,
            Call::Execute(
                r#"INSERT INTO events ("a", "b") VALUES ($1, $2), ($3, $4)"#.to_string(),
                vec![Value::Int(1), Value::Null, Value::Int(3), Value::Int(4)]
            ),
            Call::Commit,
        ]
    );
}

#[test]
fn execute_batch_splits_large_batches() {
    let options = ConnectorOptions::new().max_rows_per_statement(2);
    let mut conn =
        DictConnector::with_options("events", mapper(), RecordingExecutor::new(), options).unwrap();
    for i in 0..5 {
        conn.append_to_batch(record! { "a" => i }).unwrap();
    }
    assert_eq!(conn.execute_batch().unwrap(), 3);
    let calls = &conn.executor().calls;
    assert_eq!(calls.first(), Some(&Call::Begin));
    assert_eq!(calls.last(), Some(&Call::Commit));
    assert_eq!(conn.executor().executed_sql().len(), 3);
}

#[test]
fn failed_flush_rolls_back_and_keeps_batch() {
    let options = ConnectorOptions::new().max_rows_per_statement(1);
    let mut conn =
        DictConnector::with_options("events", mapper(), RecordingExecutor::failing_at(1), options)
            .unwrap();
    conn.append_to_batch(record! { "a" => 1 }).unwrap();
    conn.append_to_batch(record! { "a" => 2 }).unwrap();

    let err = conn.execute_batch().unwrap_err();
    assert!(matches!(
        err,
        DictError::Execution { ref table, rows: 2, .. } if table == "events"
    ));
    assert_eq!(conn.pending(), 2);
    assert_eq!(conn.executor().calls.last(), Some(&Call::Rollback));
    assert!(!conn.executor().calls.contains(&Call::Commit));

    // A retry sends the same rows again.
    conn.executor_mut().fail_execute_at = None;
    assert_eq!(conn.execute_batch().unwrap(), 2);
    assert_eq!(conn.pending(), 0);
}

#[test]
fn failed_commit_keeps_batch() {
    let mut conn = connector(RecordingExecutor {
        fail_commit: true,
        ..RecordingExecutor::default()
    });
    conn.append_to_batch(record! { "a" => 1 }).unwrap();
    assert!(conn.execute_batch().is_err());
    assert_eq!(conn.pending(), 1);
    assert_eq!(conn.executor().calls.last(), Some(&Call::Rollback));
}

#[test]
fn separate_connectors_have_separate_batches() {
    let mut first = connector(RecordingExecutor::new());
    let mut second = DictConnector::new("other", mapper(), RecordingExecutor::new()).unwrap();
    first.append_to_batch(record! { "a" => 1 }).unwrap();
    second.append_to_batch(record! { "z" => 1 }).unwrap();
    assert_eq!(first.batch_columns(), &["a".to_string()]);
    assert_eq!(second.batch_columns(), &["z".to_string()]);
}

#[test]
fn take_and_clear_batch() {
    let mut conn = connector(RecordingExecutor::new());
    conn.append_to_batch(record! { "a" => 1 }).unwrap();
    conn.append_to_batch(record! { "a" => 2 }).unwrap();
    assert_eq!(conn.take_batch().len(), 2);
    conn.append_to_batch(record! { "b" => 1 }).unwrap();
    conn.clear_batch();
    assert_eq!(conn.pending(), 0);
}

// ── Schema sync ──

#[test]
fn sync_creates_missing_table_with_resolved_types() {
    let options = ConnectorOptions::new().sync_schema(true);
    let mut conn =
        DictConnector::with_options("events", mapper(), RecordingExecutor::with_table(None), options)
            .unwrap();
    conn.insert_dict(record! { "id" => 1, "pre_code" => "x", "other" => "y" }).unwrap();
    conn.insert_dict(record! { "id" => 2, "pre_code" => "z", "other" => "w" }).unwrap();

    let calls = &conn.executor().calls;
    assert_eq!(calls.iter().filter(|c| **c == Call::TableColumns).count(), 1);
    assert_eq!(
        conn.executor().executed_sql()[0],
        r#"CREATE TABLE events ("id" int, "pre_code" varchar(10), "other" varchar(max))"#
    );
    assert_eq!(conn.executor().executed_sql().len(), 3);
}

#[test]
fn sync_adds_only_missing_columns() {
    let options = ConnectorOptions::new().sync_schema(true);
    let executor = RecordingExecutor::with_table(Some(&["id"]));
    let mut conn = DictConnector::with_options("events", mapper(), executor, options).unwrap();

    conn.append_to_batch(record! { "id" => 1, "count_su" => Value::Null }).unwrap();
    conn.append_to_batch(record! { "id" => 2, "count_su" => 9 }).unwrap();
    conn.execute_batch().unwrap();

    let sql = conn.executor().executed_sql();
    assert_eq!(sql[0], r#"ALTER TABLE events ADD COLUMN "count_su" int NULL"#);
    assert!(sql[1].starts_with("INSERT INTO events"));
}

#[test]
fn sync_uses_first_non_null_sample_for_typed_fallback() {
    let options = ConnectorOptions::new().sync_schema(true);
    let executor = RecordingExecutor::with_table(Some(&["id"]));
    let mut conn = DictConnector::with_options("events", mapper(), executor, options).unwrap();

    conn.append_to_batch(record! { "id" => 1, "n" => Value::Null }).unwrap();
    conn.append_to_batch(record! { "id" => 2, "n" => 5 }).unwrap();
    conn.execute_batch().unwrap();

    assert_eq!(
        conn.executor().executed_sql()[0],
        r#"ALTER TABLE events ADD COLUMN "n" int NULL"#
    );
}

#[test]
fn sync_surfaces_unresolved_types_before_writing() {
    let options = ConnectorOptions::new().sync_schema(true);
    let executor = RecordingExecutor::with_table(Some(&["id"]));
    let mut conn = DictConnector::with_options("events", mapper(), executor, options).unwrap();

    let err = conn.insert_dict(record! { "id" => 1, "ratio" => 0.5 }).unwrap_err();
    assert!(err.is_unresolved_type());
    assert!(conn.executor().executed_sql().is_empty());
}

#[test]
fn sync_without_introspection_fails_the_flush() {
    let options = ConnectorOptions::new().sync_schema(true);
    let mut conn =
        DictConnector::with_options("events", mapper(), RecordingExecutor::new(), options).unwrap();
    conn.append_to_batch(record! { "id" => 1 }).unwrap();
    match conn.execute_batch().unwrap_err() {
        DictError::Execution { source, .. } => {
            assert!(matches!(*source, DictError::Unsupported(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(conn.pending(), 1);
}

#[test]
fn failed_alter_in_batch_is_wrapped_and_keeps_batch() {
    let options = ConnectorOptions::new().sync_schema(true);
    let executor = RecordingExecutor {
        fail_execute_at: Some(0),
        ..RecordingExecutor::with_table(Some(&["id"]))
    };
    let mut conn = DictConnector::with_options("events", mapper(), executor, options).unwrap();
    conn.append_to_batch(record! { "id" => 1, "count_su" => 2 }).unwrap();
    conn.append_to_batch(record! { "id" => 2, "count_su" => 3 }).unwrap();

    match conn.execute_batch().unwrap_err() {
        DictError::Execution { table, columns, rows, source } => {
            assert_eq!(table, "events");
            assert_eq!(columns, ["id".to_string(), "count_su".to_string()]);
            assert_eq!(rows, 2);
            assert!(matches!(*source, DictError::UniqueViolation(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(conn.pending(), 2);
    assert_eq!(
        conn.executor().executed_sql(),
        vec![r#"ALTER TABLE events ADD COLUMN "count_su" int NULL"#]
    );
    assert!(!conn.executor().calls.contains(&Call::Begin));
}

#[test]
fn failed_alter_in_single_insert_is_wrapped() {
    let options = ConnectorOptions::new().sync_schema(true);
    let executor = RecordingExecutor {
        fail_execute_at: Some(0),
        ..RecordingExecutor::with_table(Some(&["id"]))
    };
    let mut conn = DictConnector::with_options("events", mapper(), executor, options).unwrap();

    let err = conn.insert_dict(record! { "id" => 1, "count_su" => 2 }).unwrap_err();
    match &err {
        DictError::Insert { table, columns, .. } => {
            assert_eq!(table, "events");
            assert_eq!(columns, &["id".to_string(), "count_su".to_string()]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_unique_violation());
    assert_eq!(conn.executor().executed_sql().len(), 1);
}

#[test]
fn failed_introspection_in_single_insert_is_wrapped() {
    let options = ConnectorOptions::new().sync_schema(true);
    let mut conn =
        DictConnector::with_options("events", mapper(), RecordingExecutor::new(), options).unwrap();
    let err = conn.insert_dict(record! { "id" => 1 }).unwrap_err();
    assert!(matches!(
        err,
        DictError::Insert { ref source, .. } if matches!(**source, DictError::Unsupported(_))
    ));
}

#[test]
fn unresolved_type_in_batch_sync_is_not_wrapped() {
    let options = ConnectorOptions::new().sync_schema(true);
    let executor = RecordingExecutor::with_table(Some(&["id"]));
    let mut conn = DictConnector::with_options("events", mapper(), executor, options).unwrap();
    conn.append_to_batch(record! { "id" => 1, "ratio" => 0.5 }).unwrap();

    assert!(conn.execute_batch().unwrap_err().is_unresolved_type());
    assert_eq!(conn.pending(), 1);
}

#[test]
fn sync_declares_id_column_as_primary_key() {
    let options = ConnectorOptions::new().sync_schema(true).id_column("id");
    let mut conn =
        DictConnector::with_options("events", mapper(), RecordingExecutor::with_table(None), options)
            .unwrap();
    conn.insert_dict(record! { "id" => 1, "pre_code" => "x" }).unwrap();
    assert_eq!(
        conn.executor().executed_sql()[0],
        r#"CREATE TABLE events ("id" int PRIMARY KEY, "pre_code" varchar(10))"#
    );
}

#[test]
fn refresh_columns_reports_missing_table() {
    let mut conn = connector(RecordingExecutor::with_table(None));
    assert!(conn.refresh_columns().unwrap().is_none());

    let mut conn = connector(RecordingExecutor::with_table(Some(&["a", "b"])));
    let columns = conn.refresh_columns().unwrap().unwrap();
    assert!(columns.contains("a") && columns.contains("b"));
}
