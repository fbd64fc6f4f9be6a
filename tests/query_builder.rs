use std::sync::Arc;

use quarry::clauses::AggregateFunction;
use quarry::drivers::{InMemoryTestDriver, InMemoryTestResponseBuilder};
use quarry::{
    Connection, ConnectionConfig, DatabaseDriver, ExecuteOutcome, QuarryError, SqlValue, Values,
};

fn connection(driver: &Arc<InMemoryTestDriver>) -> Connection {
    Connection::with_driver(Arc::clone(driver) as Arc<dyn DatabaseDriver>)
}

fn values(pairs: &[(&str, SqlValue)]) -> Values {
    pairs
        .iter()
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect()
}

fn recorded_sql(driver: &InMemoryTestDriver) -> Vec<String> {
    driver
        .recorded_queries()
        .into_iter()
        .map(|q| q.sql)
        .collect()
}

#[tokio::test]
async fn test_select_with_where_and_order() {
    let driver = Arc::new(
        InMemoryTestDriver::new().with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["id", "name", "age"])
                .row(vec![SqlValue::from(1), SqlValue::from("Alice"), SqlValue::from(30)])
                .row(vec![SqlValue::from(2), SqlValue::from("Bob"), SqlValue::from(25)])
                .build(),
        ),
    );
    let conn = connection(&driver);

    let fetched = conn
        .table("users")
        .where_("age", ">", 18)
        .order_by("name", "asc")
        .get()
        .await
        .unwrap();

    driver.assert_last_query(
        "SELECT * FROM users WHERE users.age > ? ORDER BY users.name asc",
        &[SqlValue::from(18)],
    );
    // Reads never open a transaction.
    assert_eq!(driver.recorded_queries().len(), 1);

    let rows = fetched.into_rows().unwrap();
    assert_eq!(rows.count(), 2);
    let first = rows.first().unwrap();
    assert_eq!(first.get("name").unwrap(), &SqlValue::from("Alice"));
    assert!(matches!(
        first.get("missing"),
        Err(QuarryError::ColumnNotFound(_))
    ));
}

#[tokio::test]
async fn test_insert_runs_in_transaction_and_returns_id() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let conn = connection(&driver);

    let id = conn
        .table("users")
        .insert(values(&[
            ("name", SqlValue::from("Bob")),
            ("age", SqlValue::from(30)),
        ]))
        .await
        .unwrap();

    assert_eq!(id, 1);
    driver.assert_last_query(
        "INSERT INTO users (`name`, `age`) VALUES (?, ?)",
        &[SqlValue::from("Bob"), SqlValue::from(30)],
    );
    assert_eq!(
        recorded_sql(&driver),
        vec![
            "BEGIN",
            "INSERT INTO users (`name`, `age`) VALUES (?, ?)",
            "COMMIT"
        ]
    );
}

#[tokio::test]
async fn test_failed_insert_rolls_back_with_context() {
    let driver = Arc::new(
        InMemoryTestDriver::new().fail_on("INSERT INTO users", "duplicate key value"),
    );
    let conn = connection(&driver);

    let err = conn
        .table("users")
        .insert(values(&[("name", SqlValue::from("Bob"))]))
        .await
        .unwrap_err();

    match err {
        QuarryError::Execution {
            message,
            sql,
            params,
        } => {
            assert_eq!(message, "duplicate key value");
            assert_eq!(sql, "INSERT INTO users (`name`) VALUES (?)");
            assert_eq!(params, vec![SqlValue::from("Bob")]);
        }
        other => panic!("Expected Execution error, got {:?}", other),
    }
    assert_eq!(
        recorded_sql(&driver),
        vec!["BEGIN", "INSERT INTO users (`name`) VALUES (?)", "ROLLBACK"]
    );
}

#[tokio::test]
async fn test_update_and_delete_report_affected_rows() {
    let driver = Arc::new(
        InMemoryTestDriver::new()
            .with_execute_outcome(ExecuteOutcome::affected(3))
            .with_execute_outcome(ExecuteOutcome::affected(2)),
    );
    let conn = connection(&driver);

    let updated = conn
        .table("users")
        .where_("age", "<", 18)
        .update(values(&[("minor", SqlValue::from(true))]))
        .await
        .unwrap();
    assert_eq!(updated, 3);
    driver.assert_last_query(
        "UPDATE users SET minor = ? WHERE users.age < ?",
        &[SqlValue::from(true), SqlValue::from(18)],
    );

    let deleted = conn
        .table("users")
        .where_eq("minor", true)
        .delete()
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    driver.assert_last_query(
        "DELETE FROM users WHERE users.minor = ?",
        &[SqlValue::from(true)],
    );
}

#[tokio::test]
async fn test_terminal_call_resets_state() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let conn = connection(&driver);

    let mut builder = conn.table("users");
    builder.where_("age", ">", 18).order_by("name", "asc").rows(10);
    builder.get().await.unwrap();
    assert!(builder.state().is_empty());

    builder.from("users").where_("id", "=", 7);
    let mut fresh = conn.table("users");
    fresh.where_("id", "=", 7);
    assert_eq!(builder.sql().unwrap(), fresh.sql().unwrap());
}

#[tokio::test]
async fn test_delete_falls_back_to_last_table() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let conn = connection(&driver);

    let mut builder = conn.table("sessions");
    builder.delete_where("expired", "=", true).await.unwrap();
    driver.assert_last_query(
        "DELETE FROM sessions WHERE sessions.expired = ?",
        &[SqlValue::from(true)],
    );

    builder.delete().await.unwrap();
    driver.assert_last_query("DELETE FROM sessions", &[]);
}

#[tokio::test]
async fn test_parameters_follow_placeholders_across_clauses() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let conn = connection(&driver);

    let mut builder = conn.table("users");
    builder
        .select(&["users.name", "orders.total"])
        .join("orders", "users.user_id", "=", "orders.user_id")
        .and_join("orders.status", "=", "paid")
        .where_in("users.country", ["BR", "PT"])
        .or_where_between("users.age", 18, 65)
        .where_not_null("users.email")
        .group_by(&["users.name"])
        .order_by_desc("orders.total")
        .limit(5);
    let compiled = builder.sql().unwrap();
    assert_eq!(compiled.placeholder_count(), compiled.params.len());

    builder.get().await.unwrap();
    driver.assert_last_query(
        "SELECT users.name, orders.total FROM users \
         INNER JOIN orders ON users.user_id = orders.user_id AND orders.status = ? \
         WHERE users.country IN (?, ?) OR users.age BETWEEN ? AND ? AND users.email IS NOT NULL \
         GROUP BY users.name ORDER BY orders.total desc LIMIT 5",
        &[
            SqlValue::from("paid"),
            SqlValue::from("BR"),
            SqlValue::from("PT"),
            SqlValue::from(18),
            SqlValue::from(65),
        ],
    );
}

#[tokio::test]
async fn test_illegal_operator_reaches_no_driver() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let conn = connection(&driver);

    let err = conn
        .table("users")
        .where_("col", "DROP TABLE", 1)
        .get()
        .await
        .unwrap_err();

    assert!(matches!(err, QuarryError::InvalidArgument(_)));
    assert!(driver.recorded_queries().is_empty());
}

#[tokio::test]
async fn test_execution_without_connection() {
    let err = Connection::new().table("users").get().await.unwrap_err();
    assert!(matches!(err, QuarryError::NoConnection));

    let err = Connection::new()
        .table("users")
        .insert(values(&[("name", SqlValue::from("Bob"))]))
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::NoConnection));
}

#[tokio::test]
async fn test_insert_without_values_fails() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let conn = connection(&driver);

    let err = conn.table("users").insert(Values::new()).await.unwrap_err();
    assert!(matches!(err, QuarryError::Query(_)));
    assert!(driver.recorded_queries().is_empty());
}

#[tokio::test]
async fn test_aggregate_runs_immediately() {
    let driver = Arc::new(
        InMemoryTestDriver::new().with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["total"])
                .row(vec![SqlValue::Int64(42)])
                .build(),
        ),
    );
    let conn = connection(&driver);

    let fetched = conn
        .table("orders")
        .where_eq("status", "paid")
        .aggregate_now(AggregateFunction::Sum, "amount", Some("total"))
        .await
        .unwrap();

    driver.assert_last_query(
        "SELECT SUM(orders.amount) AS total FROM orders WHERE orders.status = ?",
        &[SqlValue::from("paid")],
    );
    let rows = fetched.into_rows().unwrap();
    assert_eq!(
        rows.first().unwrap().get("total").unwrap(),
        &SqlValue::Int64(42)
    );
}

#[tokio::test]
async fn test_explicit_transaction() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let conn = connection(&driver);

    let tx = conn.begin().await.unwrap();
    tx.execute("UPDATE accounts SET balance = balance - ? WHERE id = ?", &[
        SqlValue::from(10),
        SqlValue::from(1),
    ])
    .await
    .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(
        recorded_sql(&driver),
        vec![
            "BEGIN",
            "UPDATE accounts SET balance = balance - ? WHERE id = ?",
            "COMMIT"
        ]
    );
}

#[tokio::test]
async fn test_dropped_transaction_rolls_back_before_next_begin() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let conn = connection(&driver);

    {
        let _tx = conn.begin().await.unwrap();
    }
    let tx = conn.begin().await.unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(
        recorded_sql(&driver),
        vec!["BEGIN", "ROLLBACK", "BEGIN", "ROLLBACK"]
    );
}

#[tokio::test]
async fn test_call_procedure() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let conn = connection(&driver);

    let ran = conn
        .call_procedure("refresh_totals", &[SqlValue::from(2024), SqlValue::from("BR")])
        .await
        .unwrap();
    assert!(ran);
    driver.assert_last_query(
        "CALL refresh_totals(?, ?)",
        &[SqlValue::from(2024), SqlValue::from("BR")],
    );

    let err = conn
        .call_procedure("x(); DROP TABLE users; --", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::InvalidArgument(_)));
    driver.assert_query_count(1);
}

#[tokio::test]
async fn test_raw_query() {
    let driver = Arc::new(
        InMemoryTestDriver::new().with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["now"])
                .row(vec![SqlValue::from("2024-01-01 00:00:00")])
                .build(),
        ),
    );
    let conn = connection(&driver);

    let fetched = conn.builder().raw_query("SELECT now()").await.unwrap();
    assert_eq!(fetched.len(), 1);
    driver.assert_last_query("SELECT now()", &[]);
}

#[tokio::test]
async fn test_mixed_connectors_keep_repeated_predicate() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let conn = connection(&driver);

    conn.table("users")
        .where_("a", "=", 1)
        .and("b", "=", 2)
        .or("a", "=", 1)
        .get()
        .await
        .unwrap();

    driver.assert_last_query(
        "SELECT * FROM users WHERE users.a = ? AND users.b = ? OR users.a = ?",
        &[SqlValue::from(1), SqlValue::from(2), SqlValue::from(1)],
    );
}

#[tokio::test]
async fn test_update_with_set_predicates_keeps_parameter_order() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let conn = connection(&driver);

    let mut builder = conn.table("users");
    builder
        .where_in("country", ["BR", "PT"])
        .where_between("age", 18, 65);
    builder
        .update(values(&[
            ("status", SqlValue::from("adult")),
            ("score", SqlValue::from(10)),
        ]))
        .await
        .unwrap();

    let last = driver.last_query().unwrap();
    assert_eq!(
        last.sql,
        "UPDATE users SET status = ?, score = ? \
         WHERE users.country IN (?, ?) AND users.age BETWEEN ? AND ?"
    );
    assert_eq!(last.sql.matches('?').count(), last.params.len());
    assert_eq!(
        last.params,
        vec![
            SqlValue::from("adult"),
            SqlValue::from(10),
            SqlValue::from("BR"),
            SqlValue::from("PT"),
            SqlValue::from(18),
            SqlValue::from(65),
        ]
    );
}

#[tokio::test]
async fn test_failed_update_and_delete_roll_back() {
    let driver = Arc::new(
        InMemoryTestDriver::new()
            .fail_on("UPDATE users", "deadlock detected")
            .fail_on("DELETE FROM users", "foreign key violation"),
    );
    let conn = connection(&driver);

    let err = conn
        .table("users")
        .where_eq("id", 1)
        .update(values(&[("name", SqlValue::from("Ann"))]))
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::Execution { ref message, .. } if message == "deadlock detected"));

    let err = conn
        .table("users")
        .where_eq("id", 1)
        .delete()
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::Execution { ref sql, .. } if sql == "DELETE FROM users WHERE users.id = ?"));

    assert_eq!(
        recorded_sql(&driver),
        vec![
            "BEGIN",
            "UPDATE users SET name = ? WHERE users.id = ?",
            "ROLLBACK",
            "BEGIN",
            "DELETE FROM users WHERE users.id = ?",
            "ROLLBACK"
        ]
    );
}

#[tokio::test]
async fn test_failed_commit_rolls_back() {
    let driver = Arc::new(InMemoryTestDriver::new().fail_on("COMMIT", "could not serialize access"));
    let conn = connection(&driver);

    let err = conn
        .table("users")
        .where_eq("id", 1)
        .update(values(&[("name", SqlValue::from("Ann"))]))
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::Execution { .. }));

    // The next statement waits until the background rollback has released the handle.
    conn.table("users").get().await.unwrap();
    assert_eq!(
        recorded_sql(&driver),
        vec![
            "BEGIN",
            "UPDATE users SET name = ? WHERE users.id = ?",
            "COMMIT",
            "ROLLBACK",
            "SELECT * FROM users"
        ]
    );
}

#[tokio::test]
async fn test_statement_on_connection_inside_own_transaction_fails() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let conn = connection(&driver);

    let tx = conn.begin().await.unwrap();
    let err = conn.table("users").where_eq("id", 1).get().await.unwrap_err();
    assert!(matches!(err, QuarryError::TransactionActive));
    let err = conn
        .table("users")
        .where_eq("id", 1)
        .update(values(&[("name", SqlValue::from("Ann"))]))
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::TransactionActive));
    let err = conn.begin().await.unwrap_err();
    assert!(matches!(err, QuarryError::TransactionActive));
    tx.commit().await.unwrap();

    conn.table("users").where_eq("id", 1).get().await.unwrap();
    assert_eq!(
        recorded_sql(&driver),
        vec!["BEGIN", "COMMIT", "SELECT * FROM users WHERE users.id = ?"]
    );
}

#[tokio::test]
async fn test_other_tasks_wait_for_open_transaction() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let conn = connection(&driver);

    let tx = conn.begin().await.unwrap();
    let reader = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.table("users").get().await.map(|f| f.len()) })
    };
    tokio::task::yield_now().await;
    tx.execute("UPDATE users SET name = ?", &[SqlValue::from("Ann")])
        .await
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(reader.await.unwrap().unwrap(), 0);
    assert_eq!(
        recorded_sql(&driver),
        vec![
            "BEGIN",
            "UPDATE users SET name = ?",
            "COMMIT",
            "SELECT * FROM users"
        ]
    );
}

#[tokio::test]
async fn test_connect_rejects_invalid_config_before_connecting() {
    let conn = Connection::new();
    let config = ConnectionConfig {
        host: "localhost".to_string(),
        username: "app".to_string(),
        ..ConnectionConfig::default()
    };

    let err = conn.connect(&config).await.unwrap_err();
    assert!(matches!(err, QuarryError::Configuration(ref m) if m.contains("database")));
    assert!(!conn.is_connected());
}
