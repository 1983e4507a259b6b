use snapdb::catalog::schema::{Column, ColumnSpec, IndexSpec, Schema};
use snapdb::catalog::types::{ColumnType, Row, Value};
use snapdb::config::{EditMode, SnapConfig};
use snapdb::database::{Database, TableState};
use snapdb::error::SnapErrorCode;
use snapdb::storage::{CommitStore, MemoryCommitStore, RootRef, RootSnapshotProvider};
use std::sync::Arc;

fn accounts_db(store: Arc<MemoryCommitStore>, mode: EditMode) -> Database {
    let mut db = Database::new("bank", store, SnapConfig::default().with_edit_mode(mode));
    db.create_table(
        "accounts",
        Schema::new(vec![
            Column::new("id", 10, ColumnType::Integer).primary_key(),
            Column::new("owner", 11, ColumnType::Text).not_null(),
            Column::new("balance", 12, ColumnType::Integer),
        ])
        .expect("schema"),
    )
    .expect("create");
    db
}

fn account(id: i64, owner: &str, balance: i64) -> Row {
    Row::from_values(vec![
        Value::Integer(id),
        Value::from(owner),
        Value::Integer(balance),
    ])
}

#[test]
fn earlier_roots_are_unaffected_by_later_edits() {
    let mut db = accounts_db(Arc::new(MemoryCommitStore::new()), EditMode::Statement);
    db.inserter("accounts")
        .expect("inserter")
        .insert(account(1, "ann", 100))
        .expect("insert");
    db.statement_complete().expect("flush");
    let before = db.root().clone();
    let saved = before.table("accounts").expect("table").clone();

    db.updater("accounts")
        .expect("updater")
        .update(&account(1, "ann", 100), account(1, "ann", 5))
        .expect("update");
    db.inserter("accounts")
        .expect("inserter")
        .insert(account(2, "bob", 7))
        .expect("insert");
    db.statement_complete().expect("flush");
    db.add_column(
        "accounts",
        ColumnSpec::new("note", ColumnType::Text),
        None,
    )
    .expect("add column");

    let old = before.table("accounts").expect("old table");
    assert_eq!(*old, saved);
    assert_eq!(
        old.content_address().expect("address"),
        saved.content_address().expect("address")
    );
    assert_eq!(old.row_count(), 1);
    assert_eq!(old.schema().columns.len(), 3);
    assert_eq!(
        old.get_row(&[Value::Integer(1)]).expect("get"),
        Some(account(1, "ann", 100))
    );
    let new = db.root().table("accounts").expect("new table");
    assert_eq!(new.row_count(), 2);
    assert_eq!(new.schema().columns.len(), 4);
    assert_ne!(*new, saved);
}

#[test]
fn content_address_depends_only_on_content() {
    let mut a = accounts_db(Arc::new(MemoryCommitStore::new()), EditMode::Batched);
    let mut b = accounts_db(Arc::new(MemoryCommitStore::new()), EditMode::Batched);
    {
        let mut ins = a.inserter("accounts").expect("inserter");
        ins.insert(account(1, "ann", 1)).expect("insert");
        ins.insert(account(2, "bob", 2)).expect("insert");
    }
    {
        let mut ins = b.inserter("accounts").expect("inserter");
        ins.insert(account(2, "bob", 2)).expect("insert");
        ins.insert(account(1, "ann", 1)).expect("insert");
    }
    a.flush().expect("flush");
    b.flush().expect("flush");
    let addr = |db: &Database| {
        db.root()
            .table("accounts")
            .expect("table")
            .content_address()
            .expect("address")
    };
    assert_eq!(addr(&a), addr(&b));

    b.deleter("accounts")
        .expect("deleter")
        .delete(&account(2, "bob", 2))
        .expect("delete");
    b.flush().expect("flush");
    assert_ne!(addr(&a), addr(&b));
}

#[test]
fn failed_edits_leave_the_working_copy_unchanged() {
    let mut db = accounts_db(Arc::new(MemoryCommitStore::new()), EditMode::Batched);
    db.create_index("accounts", IndexSpec::new("by_owner", &["owner"]).unique())
        .expect("index");
    {
        let mut ins = db.inserter("accounts").expect("inserter");
        ins.insert(account(1, "ann", 1)).expect("insert");
        let err = ins.insert(account(1, "zed", 1)).unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::DuplicatePrimaryKey);
        let err = ins.insert(account(2, "ann", 1)).unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::UniqueViolation);
        let err = ins
            .insert(Row::from_values(vec![
                Value::Integer(3),
                Value::Null,
                Value::Integer(0),
            ]))
            .unwrap_err();
        assert_eq!(err.code(), SnapErrorCode::NotNullViolation);
    }
    assert_eq!(db.table_state("accounts"), TableState::Editing { pending: 1 });

    let err = db
        .replacer("accounts")
        .expect("replacer")
        .replace(account(9, "ann", 3))
        .unwrap_err();
    assert_eq!(err.code(), SnapErrorCode::UniqueViolation);

    db.flush().expect("flush");
    let rows: Vec<Row> = db.table("accounts").expect("table").rows().collect();
    assert_eq!(rows, vec![account(1, "ann", 1)]);
    let owners = db
        .root()
        .table("accounts")
        .expect("table")
        .index_data("by_owner")
        .expect("index data")
        .len();
    assert_eq!(owners, 1);
}

#[test]
fn dropped_column_tags_are_never_reused() {
    let mut db = accounts_db(Arc::new(MemoryCommitStore::new()), EditMode::Statement);
    let first = db
        .add_column("accounts", ColumnSpec::new("note", ColumnType::Text), None)
        .expect("add");
    db.drop_column("accounts", "note").expect("drop");
    let second = db
        .add_column("accounts", ColumnSpec::new("note", ColumnType::Text), None)
        .expect("re-add");
    assert_ne!(first, second);

    db.drop_column("accounts", "note").expect("drop again");
    let err = db
        .add_column(
            "accounts",
            ColumnSpec::new("memo", ColumnType::Text).with_tag(first),
            None,
        )
        .unwrap_err();
    assert_eq!(err.code(), SnapErrorCode::TagInUse);
}

#[test]
fn tags_are_unique_across_tables() {
    let mut db = accounts_db(Arc::new(MemoryCommitStore::new()), EditMode::Statement);
    db.create_table(
        "ledger",
        Schema::new(vec![Column::new("entry", 20, ColumnType::Integer).primary_key()])
            .expect("schema"),
    )
    .expect("create");
    let err = db
        .add_column(
            "ledger",
            ColumnSpec::new("owner", ColumnType::Text).with_tag(11),
            None,
        )
        .unwrap_err();
    match err {
        snapdb::SnapError::TagInUse { tag, column, table } => {
            assert_eq!(tag, 11);
            assert_eq!(column, "owner");
            assert_eq!(table, "accounts");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn column_and_index_ddl() {
    let mut db = accounts_db(Arc::new(MemoryCommitStore::new()), EditMode::Statement);
    db.inserter("accounts")
        .expect("inserter")
        .insert(account(1, "ann", 100))
        .expect("insert");
    db.statement_complete().expect("flush");

    let err = db
        .add_column(
            "accounts",
            ColumnSpec::new("branch", ColumnType::Text).not_null(),
            None,
        )
        .unwrap_err();
    assert_eq!(err.code(), SnapErrorCode::InvalidArgument);
    let err = db
        .add_column("accounts", ColumnSpec::new("OWNER", ColumnType::Text), None)
        .unwrap_err();
    assert_eq!(err.code(), SnapErrorCode::ColumnAlreadyExists);
    let err = db.drop_column("accounts", "id").unwrap_err();
    assert_eq!(err.code(), SnapErrorCode::UnsupportedOperation);

    db.create_index("accounts", IndexSpec::new("by_balance", &["balance"]))
        .expect("index");
    let err = db
        .create_index("accounts", IndexSpec::new("by_missing", &["nope"]))
        .unwrap_err();
    assert_eq!(err.code(), SnapErrorCode::ColumnNotFound);

    db.rename_column("accounts", "balance", "amount").expect("rename");
    db.rename_index("accounts", "by_balance", "by_amount").expect("rename index");
    let table = db.table("accounts").expect("table");
    assert!(table.schema().column("amount").is_some());
    assert!(table.index("by_amount").is_ok());

    db.drop_column("accounts", "amount").expect("drop");
    let table = db.table("accounts").expect("table");
    assert!(table.index("by_amount").is_err());
    assert!(table.snapshot().index_data("by_amount").is_none());
    assert_eq!(
        table.rows().collect::<Vec<_>>(),
        vec![Row::from_values(vec![Value::Integer(1), Value::from("ann")])]
    );
}

#[tokio::test]
async fn committed_roots_resolve_through_the_store() {
    let store = Arc::new(MemoryCommitStore::new());
    let mut db = accounts_db(Arc::clone(&store), EditMode::Batched);
    db.inserter("accounts")
        .expect("inserter")
        .insert(account(1, "ann", 100))
        .expect("insert");
    let first = db.commit("main", "first").await.expect("commit");
    assert_eq!(db.table_state("accounts"), TableState::Clean);

    db.inserter("accounts")
        .expect("inserter")
        .insert(account(2, "bob", 3))
        .expect("insert");
    let second = db.commit("main", "second").await.expect("commit");
    assert_ne!(first, second);
    assert_eq!(store.load_commit(&second).expect("commit").parent, Some(first));

    let provider = RootSnapshotProvider::new(store.clone());
    let at_first = provider.resolve(&RootRef::Commit(first)).expect("resolve");
    assert_eq!(at_first.table("accounts").expect("table").row_count(), 1);
    let head = provider
        .resolve(&RootRef::Head("main".into()))
        .expect("resolve");
    assert_eq!(head.table("accounts").expect("table").row_count(), 2);

    let reopened = Database::open("bank", store.clone(), SnapConfig::default(), "main")
        .expect("open");
    assert_eq!(reopened.table("accounts").expect("table").row_count(), 2);
    let fresh = Database::open("bank", store, SnapConfig::default(), "other").expect("open");
    assert!(fresh.table_names().is_empty());
}
