mod common;

use std::fs;

use salesprep::{
    load_raw, load_source, ColumnType, LoadError, SourceKind, TableError, DATE_COLUMN,
    TARGET_COLUMN,
};
use tempfile::tempdir;

#[test]
fn loads_all_six_sources_with_typed_columns() {
    let dir = tempdir().unwrap();
    common::write_fixture(dir.path());

    let raw = load_raw(dir.path()).unwrap();
    assert_eq!(raw.train.len(), (common::DAYS as usize) * 2 + 1);
    assert_eq!(raw.test.len(), 32);
    assert_eq!(raw.stores.len(), 2);

    let train_schema = raw.train.schema();
    let types: Vec<ColumnType> = train_schema.iter().map(|(_, t)| *t).collect();
    assert_eq!(
        types,
        vec![
            ColumnType::Int,
            ColumnType::Date,
            ColumnType::Int,
            ColumnType::Str,
            ColumnType::Float,
            ColumnType::Int
        ]
    );
    assert_eq!(raw.train.dates(DATE_COLUMN).unwrap()[0], common::start_date());
    assert_eq!(
        raw.holidays.require("transferred").unwrap().data.column_type(),
        ColumnType::Bool
    );
    // Whole-number transaction counts are widened to float.
    assert!(raw.transactions.floats("transactions").is_ok());
    // Blank oil prices become nulls.
    assert!(raw.oil.floats("dcoilwtico").unwrap().iter().any(Option::is_none));
}

#[test]
fn every_missing_source_is_reported() {
    let dir = tempdir().unwrap();
    common::write_fixture(dir.path());
    fs::remove_file(dir.path().join("oil.csv")).unwrap();
    fs::remove_file(dir.path().join("stores.csv")).unwrap();

    match load_raw(dir.path()) {
        Err(LoadError::MissingSources { missing, .. }) => {
            assert_eq!(missing, vec!["stores", "oil"]);
        }
        other => panic!("expected MissingSources, got {other:?}"),
    }

    let absent = dir.path().join("does-not-exist");
    match load_raw(&absent) {
        Err(LoadError::MissingSources { missing, .. }) => {
            assert_eq!(
                missing,
                vec![
                    "train",
                    "test",
                    "stores",
                    "oil",
                    "holidays_events",
                    "transactions"
                ]
            );
        }
        other => panic!("expected MissingSources, got {other:?}"),
    }
}

#[test]
fn missing_required_column_names_source_and_column() {
    let dir = tempdir().unwrap();
    common::write_fixture(dir.path());
    fs::write(
        dir.path().join("oil.csv"),
        "date,price\n2016-01-01,30.0\n",
    )
    .unwrap();

    match load_raw(dir.path()) {
        Err(LoadError::Schema(TableError::MissingColumn { table, column })) => {
            assert_eq!(table, "oil");
            assert_eq!(column, "dcoilwtico");
        }
        other => panic!("expected MissingColumn, got {other:?}"),
    }
}

#[test]
fn unparseable_date_is_a_parse_error() {
    let dir = tempdir().unwrap();
    common::write_fixture(dir.path());
    fs::write(
        dir.path().join("transactions.csv"),
        "date,store_nbr,transactions\n2016-01-01,1,10\n01/02/2016,1,12\n",
    )
    .unwrap();

    match load_raw(dir.path()) {
        Err(LoadError::ParseField {
            source_name,
            column,
            row,
            value,
        }) => {
            assert_eq!(source_name, "transactions");
            assert_eq!(column, DATE_COLUMN);
            assert_eq!(row, 1);
            assert_eq!(value, "01/02/2016");
        }
        other => panic!("expected ParseField, got {other:?}"),
    }
}

#[test]
fn string_target_is_a_type_error() {
    let dir = tempdir().unwrap();
    common::write_fixture(dir.path());
    fs::write(
        dir.path().join("train.csv"),
        "date,store_nbr,family,sales\n2016-03-01,1,EGGS,lots\n",
    )
    .unwrap();

    let err = load_raw(dir.path()).unwrap_err();
    assert!(matches!(
        err,
        LoadError::Schema(TableError::ColumnType {
            expected: ColumnType::Float,
            actual: ColumnType::Str,
            ..
        })
    ));
    assert!(err.to_string().contains(TARGET_COLUMN));
}

#[test]
fn upper_case_extension_is_loaded_from_the_found_path() {
    let dir = tempdir().unwrap();
    common::write_fixture(dir.path());
    fs::rename(dir.path().join("train.csv"), dir.path().join("train.CSV")).unwrap();

    let raw = load_raw(dir.path()).unwrap();
    assert_eq!(raw.train.len(), (common::DAYS as usize) * 2 + 1);
    let stores = load_source(dir.path(), SourceKind::Stores).unwrap();
    assert_eq!(stores.len(), 2);
}

#[test]
fn na_tokens_in_numeric_columns_load_as_nulls() {
    let dir = tempdir().unwrap();
    common::write_fixture(dir.path());
    fs::write(
        dir.path().join("oil.csv"),
        "date,dcoilwtico\n2016-01-01,30.0\n2016-01-04,NaN\n2016-01-05,inf\n2016-01-06,NA\n",
    )
    .unwrap();

    let raw = load_raw(dir.path()).unwrap();
    assert_eq!(
        raw.oil.floats("dcoilwtico").unwrap(),
        &[Some(30.0), None, None, None]
    );
}
