use persist_storage::db::FieldType;
use persist_storage::{
    DbAuth, DbStorage, LogicalLocation, Storage, StorageRegistry, TableStorage, TableStorageExt,
};
use persist_types::{CivilTime, PersistError, TemporalValue};
use std::sync::Arc;

fn sqlite_location(dir: &tempfile::TempDir) -> LogicalLocation {
    LogicalLocation::new(format!(
        "sqlite://{}",
        dir.path().join("nested/dir/pipeline.db").display()
    ))
}

fn no_auth() -> Arc<DbAuth> {
    Arc::new(DbAuth::from_entries(Vec::new()))
}

#[test]
fn persisted_row_is_retrieved_by_id() {
    let dir = tempfile::tempdir().unwrap();
    let location = sqlite_location(&dir);

    let mut writer = DbStorage::new(no_auth());
    writer.set_persist_location(&location).unwrap();
    writer
        .execute_sql("CREATE TABLE T (id BIGINT, ra DOUBLE, decl DOUBLE, something INTEGER)")
        .unwrap();
    writer.start_transaction().unwrap();
    writer.set_table_for_insert("T").unwrap();
    writer.set_column("id", &12345i64).unwrap();
    writer.set_column("ra", &3.14159f64).unwrap();
    writer.set_column("decl", &2.71828f64).unwrap();
    writer.set_column_to_null("something").unwrap();
    writer.insert_row().unwrap();
    writer.end_transaction().unwrap();
    drop(writer);

    let mut reader = DbStorage::new(no_auth());
    reader.set_retrieve_location(&location).unwrap();
    reader.start_transaction().unwrap();
    reader.set_table_for_query("T", false).unwrap();
    let ra = reader.out_param::<f64>("ra", false).unwrap();
    let decl = reader.out_param::<f64>("decl", false).unwrap();
    let something = reader.out_param::<i32>("something", false).unwrap();
    reader.cond_param("id", &12345i64).unwrap();
    reader.set_query_where("id = :id");
    reader.query().unwrap();

    assert!(reader.next().unwrap());
    assert_eq!(reader.get(&ra).unwrap(), 3.14159);
    assert_eq!(reader.get(&decl).unwrap(), 2.71828);
    assert!(reader.column_is_null(2).unwrap());
    assert_eq!(reader.get_opt(&something).unwrap(), None);
    assert!(!reader.next().unwrap());
    reader.finish_query().unwrap();
    reader.end_transaction().unwrap();
}

#[test]
fn every_scalar_type_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let location = sqlite_location(&dir);
    let registry = StorageRegistry::new(no_auth());
    let when = TemporalValue::from_civil(
        CivilTime::new(1999, 12, 31, 23, 59, 59).with_nanosecond(999_999_999),
    )
    .unwrap();

    let mut storage = registry.create_instance("relational-database").unwrap();
    storage.set_persist_location(&location).unwrap();
    {
        let table = storage.as_table_mut().unwrap();
        table
            .execute_sql(
                "CREATE TABLE scalars (b BOOLEAN, i8 INTEGER, u8 INTEGER, i16 INTEGER, \
                 u16 INTEGER, i32 INTEGER, u32 INTEGER, i64 INTEGER, u64 INTEGER, \
                 f32 REAL, f64 REAL, s TEXT, t TEXT)",
            )
            .unwrap();
        table.set_table_for_insert("scalars").unwrap();
        table.set_column("b", &true).unwrap();
        table.set_column("i8", &i8::MIN).unwrap();
        table.set_column("u8", &u8::MAX).unwrap();
        table.set_column("i16", &i16::MIN).unwrap();
        table.set_column("u16", &u16::MAX).unwrap();
        table.set_column("i32", &i32::MIN).unwrap();
        table.set_column("u32", &u32::MAX).unwrap();
        table.set_column("i64", &i64::MIN).unwrap();
        table.set_column("u64", &(i64::MAX as u64)).unwrap();
        table.set_column("f32", &-0.1f32).unwrap();
        table.set_column("f64", &f64::MAX).unwrap();
        table.set_column("s", &"héllo\twörld".to_string()).unwrap();
        table.set_column("t", &when).unwrap();
        table.insert_row().unwrap();
    }

    storage.set_retrieve_location(&location).unwrap();
    let table = storage.as_table_mut().unwrap();
    table.set_table_for_query("scalars", false).unwrap();
    let b = table.out_param::<bool>("b", false).unwrap();
    let i8_ = table.out_param::<i8>("i8", false).unwrap();
    let u8_ = table.out_param::<u8>("u8", false).unwrap();
    let i16_ = table.out_param::<i16>("i16", false).unwrap();
    let u16_ = table.out_param::<u16>("u16", false).unwrap();
    let i32_ = table.out_param::<i32>("i32", false).unwrap();
    let u32_ = table.out_param::<u32>("u32", false).unwrap();
    let i64_ = table.out_param::<i64>("i64", false).unwrap();
    let u64_ = table.out_param::<u64>("u64", false).unwrap();
    let f32_ = table.out_param::<f32>("f32", false).unwrap();
    let f64_ = table.out_param::<f64>("f64", false).unwrap();
    let s = table.out_param::<String>("s", false).unwrap();
    let t = table.out_param::<TemporalValue>("t", false).unwrap();
    table.query().unwrap();
    assert!(table.next().unwrap());

    assert!(table.get(&b).unwrap());
    assert_eq!(table.get(&i8_).unwrap(), i8::MIN);
    assert_eq!(table.get(&u8_).unwrap(), u8::MAX);
    assert_eq!(table.get(&i16_).unwrap(), i16::MIN);
    assert_eq!(table.get(&u16_).unwrap(), u16::MAX);
    assert_eq!(table.get(&i32_).unwrap(), i32::MIN);
    assert_eq!(table.get(&u32_).unwrap(), u32::MAX);
    assert_eq!(table.get(&i64_).unwrap(), i64::MIN);
    assert_eq!(table.get(&u64_).unwrap(), i64::MAX as u64);
    assert_eq!(table.get(&f32_).unwrap(), -0.1f32);
    assert_eq!(table.get(&f64_).unwrap(), f64::MAX);
    assert_eq!(table.get(&s).unwrap(), "héllo\twörld");
    assert_eq!(table.get(&t).unwrap(), when);
    assert_eq!(table.column_field_type(11).unwrap(), FieldType::VarString);
}

#[test]
fn u64_beyond_signed_range_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut storage = DbStorage::new(no_auth());
    storage.set_persist_location(&sqlite_location(&dir)).unwrap();
    storage.execute_sql("CREATE TABLE big (n INTEGER)").unwrap();
    storage.set_table_for_insert("big").unwrap();
    storage.set_column("n", &u64::MAX).unwrap();
    assert!(matches!(
        storage.insert_row(),
        Err(PersistError::InvalidArgument(_))
    ));
}

#[test]
fn network_location_without_credentials_is_not_found() {
    let mut storage = DbStorage::new(no_auth());
    let err = storage
        .set_persist_location(&LogicalLocation::new("postgresql://db.invalid:5432/pipeline"))
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn malformed_location_is_invalid() {
    let mut storage = DbStorage::new(no_auth());
    let err = storage
        .set_persist_location(&LogicalLocation::new("not a location"))
        .unwrap_err();
    assert!(matches!(err, PersistError::InvalidArgument(_)));
}
