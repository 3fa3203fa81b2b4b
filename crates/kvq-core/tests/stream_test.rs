//! Stage-level tests for the range-read pipeline.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use kvq_core::engine::stream::Stream;
use kvq_core::errors::{KvqError, Result};
use kvq_core::facade::memory::MemoryDatabase;
use kvq_core::facade::{Database, Subspace, Transaction};
use kvq_core::keyval::{convert, values, KeyValue, Query, TupElement, Tuple, Value, ValueType, Variable};
use kvq_core::options::{ByteOrder, RangeOpts};
use kvq_core::parser::parse_query;

fn stream() -> Stream {
    Stream::new(CancellationToken::new())
}

fn path(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| (*p).to_string()).collect()
}

fn tuple(input: &str) -> Tuple {
    match parse_query(&format!("/x{input}")).unwrap() {
        Query::Key(key) => key.tuple,
        other => panic!("expected key query, got {other:?}"),
    }
}

/// Feeds a fixed message sequence into a stage input.
fn feed<T: Send + 'static>(msgs: Vec<Result<T>>) -> mpsc::Receiver<Result<T>> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        for msg in msgs {
            if tx.send(msg).await.is_err() {
                return;
            }
        }
    });
    rx
}

async fn collect<T>(mut rx: mpsc::Receiver<Result<T>>) -> (Vec<T>, Option<KvqError>) {
    let mut out = Vec::new();
    while let Some(msg) = rx.recv().await {
        match msg {
            Ok(v) => out.push(v),
            Err(err) => return (out, Some(err)),
        }
    }
    (out, None)
}

/// Creates the given directories and packs one key-value into each.
fn seed(db: &MemoryDatabase, rows: &[(&[&str], &str, Value)]) -> Vec<Subspace> {
    let tr = db.begin().unwrap();
    let mut dirs = Vec::new();
    for (dir_parts, key, value) in rows {
        let dir = tr.create_or_open_directory(&path(dir_parts)).unwrap();
        let elements = convert::to_layer_elements(&tuple(key).0).unwrap();
        let packed_value = values::pack(value, ByteOrder::Big).unwrap();
        tr.set(&dir.pack(&elements), &packed_value).unwrap();
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    tr.commit().unwrap();
    dirs
}

#[tokio::test]
async fn open_directories_missing_path_errors() {
    let db = MemoryDatabase::new();
    let tr = Arc::new(db.begin_read().unwrap());

    let Query::Directory(query) = parse_query("/hello").unwrap() else {
        panic!();
    };
    let (dirs, err) = collect(stream().open_directories(tr, &query)).await;
    assert!(dirs.is_empty());
    assert!(matches!(err, Some(KvqError::Directory(_))));
}

#[tokio::test]
async fn open_directories_single_path() {
    let db = MemoryDatabase::new();
    seed(&db, &[(&["hello"], "{}", Value::Nil)]);
    let tr = Arc::new(db.begin_read().unwrap());

    let Query::Directory(query) = parse_query("/hello").unwrap() else {
        panic!();
    };
    let (dirs, err) = collect(stream().open_directories(tr, &query)).await;
    assert!(err.is_none());
    assert_eq!(dirs.len(), 1);
    assert_eq!(dirs[0].path(), path(&["hello"]));
}

#[tokio::test]
async fn open_directories_expands_variables_in_listing_order() {
    let db = MemoryDatabase::new();
    seed(
        &db,
        &[
            (&["people", "billy", "job", "dancer"], "{}", Value::Nil),
            (&["people", "billy", "job", "tailor"], "{}", Value::Nil),
            (&["people", "jon", "job", "programmer"], "{}", Value::Nil),
            (&["people", "sally", "job", "designer"], "{}", Value::Nil),
        ],
    );
    let tr = Arc::new(db.begin_read().unwrap());

    let Query::Directory(query) = parse_query("/people/<>/job/<>").unwrap() else {
        panic!();
    };
    let (dirs, err) = collect(stream().open_directories(tr, &query)).await;
    assert!(err.is_none());
    let paths: Vec<_> = dirs.iter().map(|d| d.path().to_vec()).collect();
    assert_eq!(
        paths,
        vec![
            path(&["people", "billy", "job", "dancer"]),
            path(&["people", "billy", "job", "tailor"]),
            path(&["people", "jon", "job", "programmer"]),
            path(&["people", "sally", "job", "designer"]),
        ]
    );
}

#[tokio::test]
async fn open_directories_errors_when_variable_has_no_children() {
    let db = MemoryDatabase::new();
    seed(&db, &[(&["people"], "{}", Value::Nil)]);
    let tr = Arc::new(db.begin_read().unwrap());

    let Query::Directory(query) = parse_query("/people/<>").unwrap() else {
        panic!();
    };
    let (dirs, err) = collect(stream().open_directories(tr, &query)).await;
    assert!(dirs.is_empty());
    match err {
        Some(KvqError::Directory(msg)) => assert!(msg.contains("no subdirectories for /people")),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn read_range_narrows_by_concrete_prefix() {
    let db = MemoryDatabase::new();
    let dirs = seed(
        &db,
        &[
            (&["first"], "{123,\"hello\",-50.6}", Value::Nil),
            (&["first"], "{321,\"goodbye\",50.6}", Value::Nil),
            (&["second"], "{-69,{\"world\"}}", Value::Nil),
        ],
    );
    let tr = Arc::new(db.begin_read().unwrap());

    let query = tuple("{123,\"hello\",-50.6}");
    let s = stream();
    let input = feed(dirs.into_iter().map(Ok).collect());
    let out = s.read_range(tr, &query, &RangeOpts::default(), input);
    let (rows, err) = collect(out).await;
    assert!(err.is_none());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0.path(), path(&["first"]));

    let decoded = convert::from_layer_elements(rows[0].0.unpack(&rows[0].1.key).unwrap());
    assert_eq!(decoded, query);
}

#[tokio::test]
async fn read_range_walks_every_directory() {
    let db = MemoryDatabase::new();
    let dirs = seed(
        &db,
        &[
            (&["this", "thing"], "{123,\"song\",\"sing\"}", Value::Nil),
            (&["that", "there"], "{123,13.45,\"sing\"}", Value::Nil),
            (
                &["iam"],
                "{bcefd2ec-4df5-43b6-8c79-81b70b886af9}",
                Value::Nil,
            ),
        ],
    );
    let tr = Arc::new(db.begin_read().unwrap());

    // The whole tuple is a hole, so every row of every directory comes
    // back raw.
    let query = tuple("{<>,~}");
    let s = stream();
    let input = feed(dirs.into_iter().map(Ok).collect());
    let out = s.read_range(tr, &query, &RangeOpts::default(), input);
    let (rows, err) = collect(out).await;
    assert!(err.is_none());
    let paths: Vec<_> = rows.iter().map(|(d, _)| d.path().to_vec()).collect();
    assert_eq!(
        paths,
        vec![
            path(&["this", "thing"]),
            path(&["that", "there"]),
            path(&["iam"]),
        ]
    );
}

#[tokio::test]
async fn read_range_aggregates_limit_across_directories() {
    let db = MemoryDatabase::new();
    let dirs = seed(
        &db,
        &[
            (&["a"], "{1}", Value::Nil),
            (&["a"], "{2}", Value::Nil),
            (&["b"], "{3}", Value::Nil),
            (&["b"], "{4}", Value::Nil),
        ],
    );
    let tr = Arc::new(db.begin_read().unwrap());

    let opts = RangeOpts {
        limit: 3,
        ..RangeOpts::default()
    };
    let s = stream();
    let input = feed(dirs.into_iter().map(Ok).collect());
    let out = s.read_range(tr, &tuple("{<>}"), &opts, input);
    let (rows, err) = collect(out).await;
    assert!(err.is_none());
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn read_range_forwards_upstream_errors() {
    let db = MemoryDatabase::new();
    let tr = Arc::new(db.begin_read().unwrap());

    let s = stream();
    let input = feed(vec![Err(KvqError::Directory("boom".into()))]);
    let mut out = s.read_range(tr, &tuple("{}"), &RangeOpts::default(), input);

    let first = out.recv().await.unwrap();
    assert!(first.is_err());
    // At most the one error, then end of stream.
    assert!(out.recv().await.is_none());
}

#[tokio::test]
async fn filter_keys_compares_against_the_schema() {
    let db = MemoryDatabase::new();
    let dirs = seed(
        &db,
        &[
            (&["this"], "{123,\"song\",\"sing\"}", Value::Nil),
            (&["this"], "{123,13.45,\"sing\"}", Value::Nil),
            (
                &["this"],
                "{bcefd2ec-4df5-43b6-8c79-81b70b886af9}",
                Value::Nil,
            ),
        ],
    );
    let tr = Arc::new(db.begin_read().unwrap());

    let query = tuple("{123,<>,\"sing\"}");
    let s = stream();
    let input = feed(dirs.into_iter().map(Ok).collect());
    let raws = s.read_range(tr, &query, &RangeOpts::default(), input);
    let out = s.filter_keys(&query, true, raws);
    let (rows, err) = collect(out).await;
    assert!(err.is_none());
    // Strings sort before doubles in the tuple encoding.
    assert_eq!(
        rows.iter().map(|kv| kv.key.tuple.clone()).collect::<Vec<_>>(),
        vec![tuple("{123,\"song\",\"sing\"}"), tuple("{123,13.45,\"sing\"}")]
    );
    for kv in &rows {
        assert_eq!(kv.value, Value::Bytes(Vec::new()));
    }
}

#[tokio::test]
async fn filter_keys_strict_mode_errors_on_mismatch() {
    let db = MemoryDatabase::new();
    let dirs = seed(&db, &[(&["this"], "{123,\"song\",\"sing\"}", Value::Nil)]);
    let tr = Arc::new(db.begin_read().unwrap());

    // <int> cannot match the stored string element.
    let query = tuple("{123,<int>,\"sing\"}");
    let s = stream();
    let input = feed(dirs.into_iter().map(Ok).collect());
    let raws = s.read_range(tr, &query, &RangeOpts::default(), input);
    let (rows, err) = collect(s.filter_keys(&query, false, raws)).await;
    assert!(rows.is_empty());
    assert!(matches!(err, Some(KvqError::StrictViolation(_))));
}

fn raw_kv(value: &Value) -> KeyValue {
    KeyValue {
        key: Default::default(),
        value: Value::Bytes(values::pack(value, ByteOrder::Big).unwrap()),
    }
}

#[tokio::test]
async fn unpack_values_concrete_query_selects_matching_bytes() {
    let s = stream();
    let input = feed(vec![
        Ok(raw_kv(&Value::Int(123))),
        Ok(raw_kv(&Value::String("hello world".into()))),
        Ok(KeyValue {
            key: Default::default(),
            value: Value::Bytes(Vec::new()),
        }),
    ]);
    let out = s.unpack_values(&Value::Int(123), &RangeOpts::default(), input);
    let (rows, err) = collect(out).await;
    assert!(err.is_none());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, Value::Int(123));
}

#[tokio::test]
async fn unpack_values_tries_types_in_order() {
    let s = stream();
    let input = feed(vec![
        Ok(raw_kv(&Value::Int(55))),
        Ok(raw_kv(&Value::Float(23.9))),
        Ok(raw_kv(&Value::Tuple(Tuple(vec![
            TupElement::String("there we go".into()),
            TupElement::Nil,
        ])))),
    ]);

    let query = Value::Variable(Variable(vec![
        ValueType::Int,
        ValueType::Tuple,
    ]));
    let out = s.unpack_values(&query, &RangeOpts::default(), input);
    let (rows, err) = collect(out).await;
    assert!(err.is_none());

    // An 8-byte float payload decodes as int first, so the int type wins.
    let float_as_int = values::unpack(
        &values::pack(&Value::Float(23.9), ByteOrder::Big).unwrap(),
        ValueType::Int,
        ByteOrder::Big,
    )
    .unwrap();
    assert_eq!(
        rows.iter().map(|kv| kv.value.clone()).collect::<Vec<_>>(),
        vec![
            Value::Int(55),
            float_as_int,
            Value::Tuple(Tuple(vec![
                TupElement::String("there we go".into()),
                TupElement::Nil,
            ])),
        ]
    );
}

#[tokio::test]
async fn unpack_values_empty_variable_passes_bytes_through() {
    let s = stream();
    let payloads = vec![
        values::pack(&Value::Int(55), ByteOrder::Big).unwrap(),
        values::pack(&Value::Float(23.9), ByteOrder::Big).unwrap(),
    ];
    let input = feed(
        payloads
            .iter()
            .map(|p| {
                Ok(KeyValue {
                    key: Default::default(),
                    value: Value::Bytes(p.clone()),
                })
            })
            .collect(),
    );

    let query = Value::Variable(Variable::default());
    let out = s.unpack_values(&query, &RangeOpts::default(), input);
    let (rows, err) = collect(out).await;
    assert!(err.is_none());
    assert_eq!(
        rows.iter().map(|kv| kv.value.clone()).collect::<Vec<_>>(),
        payloads.into_iter().map(Value::Bytes).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn unpack_values_strict_mode_errors_when_nothing_decodes() {
    let s = stream();
    let input = feed(vec![Ok(KeyValue {
        key: Default::default(),
        value: Value::Bytes(vec![0xff]),
    })]);

    let query = Value::Variable(Variable(vec![ValueType::Int]));
    let opts = RangeOpts {
        filter: false,
        ..RangeOpts::default()
    };
    let (rows, err) = collect(s.unpack_values(&query, &opts, input)).await;
    assert!(rows.is_empty());
    assert!(matches!(err, Some(KvqError::StrictViolation(_))));
}

#[tokio::test]
async fn first_error_cancels_the_shared_token() {
    let token = CancellationToken::new();
    let s = Stream::new(token.clone());

    let input = feed(vec![
        Ok(KeyValue {
            key: Default::default(),
            value: Value::Bytes(Vec::new()),
        }),
        Err(KvqError::Store("backend failure".into())),
    ]);
    let out = s.unpack_values(
        &Value::Variable(Variable::default()),
        &RangeOpts::default(),
        input,
    );
    let (rows, err) = collect(out).await;
    assert_eq!(rows.len(), 1);
    assert!(matches!(err, Some(KvqError::Store(_))));

    token.cancelled().await;
    assert!(token.is_cancelled());
}
