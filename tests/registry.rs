use std::sync::Arc;
use std::thread;
use snackdb::core::error::ErrorKind;
use snackdb::core::registry::{DatabaseInfo, Registry, TableInfo};
use snackdb::core::types::{ColumnType, Id, LogicalType, Row};
use snackdb::storage::table::TableOptions;

fn columns() -> Vec<ColumnType> {
    vec![
        ColumnType::key("id", LogicalType::Int),
        ColumnType::column("body", LogicalType::Str),
    ]
}

#[test]
fn lookups_fail_closed() {
    let registry = Registry::default();
    assert_eq!(
        registry.security_get_database(&DatabaseInfo::new("nope")).err().unwrap().kind,
        ErrorKind::NotFound
    );

    registry.get_or_create_database("app").unwrap();
    assert_eq!(
        registry.security_get_table(&TableInfo::new("app", "nope")).err().unwrap().kind,
        ErrorKind::NotFound
    );
    assert_eq!(
        registry.security_get_table(&TableInfo::new("other", "notes")).err().unwrap().kind,
        ErrorKind::NotFound
    );
}

#[test]
fn tables_are_idempotent_by_name() {
    let registry = Registry::default();
    let db = registry.get_or_create_database("app").unwrap();
    let first = db.get_or_create_table("notes", columns()).unwrap();
    first.save(Row::new(Id::from(1)).with("id", 1).with("body", "hi")).unwrap();

    // A second declaration keeps the first table and its rows
    let again = db.get_or_create_table("notes", vec![ColumnType::key("other", LogicalType::Str)]).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(again.len(), 1);
    assert_eq!(again.primary_keys(), ["id".to_string()]);

    let via_registry = registry.security_get_table(&TableInfo::new("app", "notes")).unwrap();
    assert!(Arc::ptr_eq(&first, &via_registry));
}

#[test]
fn invalid_names_and_schemas_are_rejected() {
    let registry = Registry::default();
    assert_eq!(registry.get_or_create_database("").err().unwrap().kind, ErrorKind::Validation);

    let db = registry.get_or_create_database("app").unwrap();
    assert_eq!(db.get_or_create_table("", columns()).err().unwrap().kind, ErrorKind::Validation);
    assert_eq!(db.get_or_create_table("t", Vec::new()).err().unwrap().kind, ErrorKind::Validation);
    assert!(db.table("t").is_none());
}

#[test]
fn drop_and_list() {
    let registry = Registry::new(TableOptions::default());
    let db = registry.get_or_create_database("b").unwrap();
    registry.get_or_create_database("a").unwrap();
    db.get_or_create_table("z", columns()).unwrap();
    db.get_or_create_table("y", columns()).unwrap();

    assert_eq!(registry.database_names(), vec!["a", "b"]);
    assert_eq!(db.table_names(), vec!["y", "z"]);

    assert!(db.drop_table("z").is_some());
    assert!(db.drop_table("z").is_none());
    assert_eq!(db.table_names(), vec!["y"]);

    assert!(registry.drop_database("a").is_some());
    assert_eq!(registry.database_names(), vec!["b"]);
}

#[test]
fn concurrent_creation_yields_one_instance() {
    let registry = Arc::new(Registry::default());
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            thread::spawn(move || {
                registry.get_or_create_database("app").unwrap()
                    .get_or_create_table("notes", columns())
                    .unwrap()
            })
        })
        .collect();
    let tables: Vec<_> = workers.into_iter().map(|h| h.join().unwrap()).collect();

    for table in &tables[1..] {
        assert!(Arc::ptr_eq(&tables[0], table));
    }
}
