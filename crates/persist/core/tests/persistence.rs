use persist_core::{
    FormatterConfig, FormatterRegistry, ItemConfig, Persistence, PersistenceConfig,
    PropertySetFormatter, ITEM_NAME_KEY, PROPERTY_SET_NAME,
};
use persist_storage::{DbAuth, LogicalLocation, StorageConfig, StorageList, StorageRegistry};
use persist_types::{PersistError, PropertySet, PropertyValue, TemporalValue};
use std::collections::HashMap;
use std::sync::Arc;

mod support;
use support::{Exposure, ExposureFormatter, MisreadingFormatter, FACTORY_CALLS};

fn visit_config(staging: Option<&std::path::Path>) -> PersistenceConfig {
    let mut items = HashMap::new();
    items.insert(
        "visit".to_string(),
        ItemConfig {
            table_name: Some("Visit".into()),
            key_list: Some(vec![
                "visitId=id".into(),
                "ccdId=ccd".into(),
                "ra".into(),
                "decl".into(),
                "filter".into(),
            ]),
            query_keys: vec!["visitId=id".into(), "ccdId=ccd".into()],
        },
    );
    let mut config = PersistenceConfig::default();
    config
        .formatter
        .insert(PROPERTY_SET_NAME.to_string(), FormatterConfig { items });
    if let Some(dir) = staging {
        config.storage.insert(
            "bulk-load-database".to_string(),
            StorageConfig {
                staging_dir: Some(dir.to_path_buf()),
                keep_staging_file: false,
            },
        );
    }
    config
}

fn persistence(config: PersistenceConfig, formatters: FormatterRegistry) -> Persistence {
    Persistence::new(
        Arc::new(config),
        Arc::new(formatters),
        Arc::new(StorageRegistry::new(Arc::new(DbAuth::from_entries(Vec::new())))),
    )
}

fn sqlite(dir: &tempfile::TempDir) -> LogicalLocation {
    LogicalLocation::new(format!("sqlite://{}", dir.path().join("visits.db").display()))
}

fn visit_item() -> PropertySet {
    PropertySet::new().with(ITEM_NAME_KEY, "visit")
}

fn create_visit_table(persistence: &Persistence, location: &LogicalLocation) {
    let mut storage = persistence
        .get_persist_storage("relational-database", location)
        .unwrap();
    storage
        .as_table_mut()
        .unwrap()
        .execute_sql(
            "CREATE TABLE Visit (visitId INTEGER, ccdId INTEGER, ra REAL, decl REAL, filter TEXT)",
        )
        .unwrap();
}

fn lookup(ccd: i64) -> PropertySet {
    visit_item().with("id", 85_470_982i64).with("ccd", ccd)
}

#[test]
fn property_set_round_trips_through_a_database() {
    let dir = tempfile::tempdir().unwrap();
    let location = sqlite(&dir);
    let persistence = persistence(visit_config(None), FormatterRegistry::with_builtin());
    create_visit_table(&persistence, &location);

    let visit = PropertySet::new()
        .with("id", 85_470_982i64)
        .with("ccd", 3i32)
        .with("ra", 214.884f64)
        .with("decl", 52.6792f64);
    let mut storages: StorageList = vec![persistence
        .get_persist_storage("relational-database", &location)
        .unwrap()];
    persistence
        .persist(&visit, &mut storages, &visit_item())
        .unwrap();

    let mut storages: StorageList = vec![persistence
        .get_retrieve_storage("relational-database", &location)
        .unwrap()];
    let back = persistence
        .retrieve_as::<PropertySet>(&mut storages, &lookup(3))
        .unwrap();
    assert_eq!(back.get_as_i64("id").unwrap(), 85_470_982);
    assert_eq!(back.get_as_i64("ccd").unwrap(), 3);
    assert_eq!(back.get::<f64>("ra").unwrap(), 214.884);
    assert_eq!(back.get::<f64>("decl").unwrap(), 52.6792);
    assert!(!back.exists("filter"), "NULL columns are omitted");
}

#[test]
fn query_keys_bind_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let location = sqlite(&dir);
    let persistence = persistence(visit_config(None), FormatterRegistry::with_builtin());
    create_visit_table(&persistence, &location);

    for ccd in 1..=4i64 {
        let row = PropertySet::new()
            .with("id", 85_470_982i64)
            .with("ccd", ccd)
            .with("filter", format!("ccd-{ccd}").as_str());
        let mut storages: StorageList = vec![persistence
            .get_persist_storage("relational-database", &location)
            .unwrap()];
        persistence.persist(&row, &mut storages, &visit_item()).unwrap();
    }

    let mut storages: StorageList = vec![persistence
        .get_retrieve_storage("relational-database", &location)
        .unwrap()];
    let back = persistence
        .retrieve_as::<PropertySet>(&mut storages, &lookup(2))
        .unwrap();
    assert_eq!(back.get_as_string("filter").unwrap(), "ccd-2");

    let mut storages: StorageList = vec![persistence
        .get_retrieve_storage("relational-database", &location)
        .unwrap()];
    let missing = persistence.retrieve(PROPERTY_SET_NAME, &mut storages, &lookup(9));
    assert!(missing.err().unwrap().is_not_found());
}

#[test]
fn boolean_and_timestamp_columns_keep_their_kind() {
    let dir = tempfile::tempdir().unwrap();
    let location = sqlite(&dir);
    let mut items = HashMap::new();
    items.insert(
        "reading".to_string(),
        ItemConfig {
            table_name: Some("R".into()),
            key_list: Some(vec!["id".into(), "n".into(), "f".into(), "ok".into(), "at".into()]),
            query_keys: vec!["id".into()],
        },
    );
    let mut config = PersistenceConfig::default();
    config
        .formatter
        .insert(PROPERTY_SET_NAME.to_string(), FormatterConfig { items });
    let persistence = persistence(config, FormatterRegistry::with_builtin());
    let mut storage = persistence
        .get_persist_storage("relational-database", &location)
        .unwrap();
    storage
        .as_table_mut()
        .unwrap()
        .execute_sql("CREATE TABLE R (id INTEGER, n INTEGER, f REAL, ok BOOLEAN, at TIMESTAMP)")
        .unwrap();
    drop(storage);

    let reading = PropertySet::new().with(ITEM_NAME_KEY, "reading");
    let before_epoch = TemporalValue::from_nsecs(-86_399_999_999_999);
    let row = PropertySet::new()
        .with("id", 1i64)
        .with("n", 7i16)
        .with("f", 0.5f32)
        .with("ok", true)
        .with("at", before_epoch);
    let mut storages: StorageList = vec![persistence
        .get_persist_storage("relational-database", &location)
        .unwrap()];
    persistence.persist(&row, &mut storages, &reading).unwrap();

    let mut storages: StorageList = vec![persistence
        .get_retrieve_storage("relational-database", &location)
        .unwrap()];
    let back = persistence
        .retrieve_as::<PropertySet>(&mut storages, &reading.clone().with("id", 1i64))
        .unwrap();
    assert_eq!(back.last("ok"), Some(&PropertyValue::Bool(true)));
    assert_eq!(back.last("at"), Some(&PropertyValue::Temporal(before_epoch)));
    // SQLite keeps no integer or float width.
    assert_eq!(back.get_as_i64("n").unwrap(), 7);
    assert_eq!(back.get::<f64>("f").unwrap(), 0.5);
}

#[test]
fn bulk_loaded_rows_are_queryable() {
    let dir = tempfile::tempdir().unwrap();
    let staging = tempfile::tempdir().unwrap();
    let location = sqlite(&dir);
    let persistence = persistence(
        visit_config(Some(staging.path())),
        FormatterRegistry::with_builtin(),
    );
    create_visit_table(&persistence, &location);

    let row = PropertySet::new()
        .with("id", 85_470_982i64)
        .with("ccd", 7i32)
        .with("ra", 1.25f64)
        .with("filter", "i");
    let mut storages: StorageList = vec![persistence
        .get_persist_storage("bulk-load-database", &location)
        .unwrap()];
    persistence.persist(&row, &mut storages, &visit_item()).unwrap();
    assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);

    let mut storages: StorageList = vec![persistence
        .get_retrieve_storage("relational-database", &location)
        .unwrap()];
    let back = persistence
        .retrieve_as::<PropertySet>(&mut storages, &lookup(7))
        .unwrap();
    assert_eq!(back.get::<f64>("ra").unwrap(), 1.25);
    assert_eq!(back.get_as_string("filter").unwrap(), "i");
    assert!(!back.exists("decl"));
}

#[test]
fn later_storages_override_earlier_ones() {
    let dir = tempfile::tempdir().unwrap();
    let text = LogicalLocation::new(dir.path().join("a.arch").display().to_string());
    let xml = LogicalLocation::new(dir.path().join("b.xml").display().to_string());
    let persistence = persistence(PersistenceConfig::default(), FormatterRegistry::with_builtin());
    let none = PropertySet::new();

    let first = PropertySet::new().with("name", "first").with("x", 1i32);
    let second = PropertySet::new().with("name", "second").with("y", 2i32);
    let mut storages: StorageList = vec![persistence.get_persist_storage("archive-file", &text).unwrap()];
    persistence.persist(&first, &mut storages, &none).unwrap();
    let mut storages: StorageList = vec![persistence.get_persist_storage("xml-file", &xml).unwrap()];
    persistence.persist(&second, &mut storages, &none).unwrap();

    let mut storages: StorageList = vec![
        persistence.get_retrieve_storage("archive-file", &text).unwrap(),
        persistence.get_retrieve_storage("xml-file", &xml).unwrap(),
    ];
    let merged = persistence
        .retrieve_as::<PropertySet>(&mut storages, &none)
        .unwrap();
    assert_eq!(merged.get_as_string("name").unwrap(), "second");
    assert_eq!(merged.get::<i32>("x").unwrap(), 1);
    assert_eq!(merged.get::<i32>("y").unwrap(), 2);

    let mut storages: StorageList = vec![
        persistence.get_retrieve_storage("xml-file", &xml).unwrap(),
        persistence.get_retrieve_storage("archive-file", &text).unwrap(),
    ];
    let merged = persistence
        .retrieve_as::<PropertySet>(&mut storages, &none)
        .unwrap();
    assert_eq!(merged.get_as_string("name").unwrap(), "first");
}

#[test]
fn one_persistable_written_to_several_storages() {
    let dir = tempfile::tempdir().unwrap();
    let text = LogicalLocation::new(dir.path().join("one.arch").display().to_string());
    let xml = LogicalLocation::new(dir.path().join("one.xml").display().to_string());
    let persistence = persistence(PersistenceConfig::default(), FormatterRegistry::with_builtin());
    let none = PropertySet::new();
    let set = PropertySet::new().with("exposure", 30.0f32);

    let mut storages: StorageList = vec![
        persistence.get_persist_storage("archive-file", &text).unwrap(),
        persistence.get_persist_storage("xml-file", &xml).unwrap(),
    ];
    persistence.persist(&set, &mut storages, &none).unwrap();

    for (backend, location) in [("archive-file", &text), ("xml-file", &xml)] {
        let mut storages: StorageList =
            vec![persistence.get_retrieve_storage(backend, location).unwrap()];
        let back = persistence
            .retrieve_as::<PropertySet>(&mut storages, &none)
            .unwrap();
        assert_eq!(back.last("exposure"), Some(&PropertyValue::Float32(30.0)));
    }
}

#[test]
fn user_types_dispatch_on_their_concrete_type() {
    let dir = tempfile::tempdir().unwrap();
    let location = LogicalLocation::new(dir.path().join("exposure.arch").display().to_string());
    let mut formatters = FormatterRegistry::with_builtin();
    formatters.register::<Exposure>("Exposure", ExposureFormatter::factory);
    let persistence = persistence(PersistenceConfig::default(), formatters);
    let none = PropertySet::new();

    let before = FACTORY_CALLS.load(std::sync::atomic::Ordering::SeqCst);
    let exposure = Exposure {
        id: 704_893,
        filter: "r".into(),
    };
    let boxed: Box<dyn persist_core::Persistable> = Box::new(exposure.clone());
    let mut storages: StorageList = vec![persistence.get_persist_storage("archive-file", &location).unwrap()];
    persistence.persist(boxed.as_ref(), &mut storages, &none).unwrap();

    let mut storages: StorageList = vec![persistence.get_retrieve_storage("archive-file", &location).unwrap()];
    let back = persistence
        .retrieve_as::<Exposure>(&mut storages, &none)
        .unwrap();
    assert_eq!(*back, exposure);
    assert!(FACTORY_CALLS.load(std::sync::atomic::Ordering::SeqCst) >= before + 2);
}

#[test]
fn unregistered_types_are_not_found() {
    let persistence = persistence(PersistenceConfig::default(), FormatterRegistry::with_builtin());
    let none = PropertySet::new();
    let mut storages = StorageList::new();

    let exposure = Exposure {
        id: 1,
        filter: "g".into(),
    };
    let err = persistence.persist(&exposure, &mut storages, &none).unwrap_err();
    assert!(err.is_not_found());

    let dir = tempfile::tempdir().unwrap();
    let location = LogicalLocation::new(dir.path().join("x.arch").display().to_string());
    let mut storages: StorageList = vec![persistence.get_persist_storage("archive-file", &location).unwrap()];
    let err = persistence
        .retrieve("Exposure", &mut storages, &none)
        .err()
        .unwrap();
    assert!(err.is_not_found());
}

#[test]
fn retrieve_needs_at_least_one_storage() {
    let persistence = persistence(PersistenceConfig::default(), FormatterRegistry::with_builtin());
    let err = persistence
        .retrieve(PROPERTY_SET_NAME, &mut StorageList::new(), &PropertySet::new())
        .err()
        .unwrap();
    assert!(matches!(err, PersistError::InvalidArgument(_)));
}

#[test]
fn retrieve_as_rejects_a_mismatched_formatter() {
    let dir = tempfile::tempdir().unwrap();
    let location = LogicalLocation::new(dir.path().join("set.arch").display().to_string());
    let mut formatters = FormatterRegistry::with_builtin();
    formatters.register::<Exposure>("Exposure", MisreadingFormatter::factory);
    let persistence = persistence(PersistenceConfig::default(), formatters);
    let none = PropertySet::new();

    let mut storages: StorageList = vec![persistence.get_persist_storage("archive-file", &location).unwrap()];
    persistence
        .persist(&PropertySet::new().with("id", 1i64), &mut storages, &none)
        .unwrap();

    let mut storages: StorageList = vec![persistence.get_retrieve_storage("archive-file", &location).unwrap()];
    let err = persistence
        .retrieve_as::<Exposure>(&mut storages, &none)
        .err()
        .unwrap();
    assert!(matches!(err, PersistError::InvalidArgument(_)));
}

#[test]
fn unknown_backends_are_rejected() {
    let persistence = persistence(PersistenceConfig::default(), FormatterRegistry::with_builtin());
    let err = persistence
        .get_persist_storage("tape-drive", &LogicalLocation::new("/dev/st0"))
        .err()
        .unwrap();
    assert!(matches!(err, PersistError::InvalidArgument(_)));
}

#[test]
fn builtin_factory_is_registered_under_the_set_name() {
    let formatters = FormatterRegistry::with_builtin();
    let formatter = formatters.lookup_by_name(PROPERTY_SET_NAME, None).unwrap();
    assert!(formatter.as_any().is::<PropertySetFormatter>());
}
