//! Dump, load and copy against scripted servers

use quarry::prelude::*;
use quarry_session::testing::{Reply, Script, ScriptedFactory};
use quarry_session::Value;
use std::sync::Arc;

fn server_info(script: Script, version: &str, uuid: &str) -> Script {
    script.rows(
        r"^SELECT @@version, @@server_uuid",
        &["v", "uuid", "host", "lctn", "map"],
        vec![vec![
            version.into(),
            uuid.into(),
            "db1".into(),
            Value::UInt(0),
            Value::UInt(67108864),
        ]],
    )
}

/// A source with `world`.`city` holding two rows and the view `v_city`
fn source() -> Arc<ScriptedFactory> {
    let script = server_info(Script::new(), "8.0.36", "source-uuid")
        .rows(
            r"FROM information_schema\.SCHEMATA",
            &["n", "c", "o"],
            vec![
                vec!["mysql".into(), "utf8mb4".into(), "utf8mb4_0900_ai_ci".into()],
                vec!["world".into(), "utf8mb4".into(), "utf8mb4_0900_ai_ci".into()],
            ],
        )
        .rows(
            r"FROM information_schema\.TABLES",
            &["s", "n", "t", "e", "c", "o", "r", "a", "d"],
            vec![
                vec![
                    "world".into(),
                    "city".into(),
                    "BASE TABLE".into(),
                    "InnoDB".into(),
                    "utf8mb4_0900_ai_ci".into(),
                    "".into(),
                    Value::UInt(2),
                    Value::UInt(20),
                    Value::UInt(40),
                ],
                vec![
                    "world".into(),
                    "v_city".into(),
                    "VIEW".into(),
                    Value::Null,
                    Value::Null,
                    Value::Null,
                    Value::Null,
                    Value::Null,
                    Value::Null,
                ],
            ],
        )
        .rows(
            r"FROM information_schema\.COLUMNS",
            &["s", "t", "c", "d", "ct", "n", "e"],
            vec![
                vec![
                    "world".into(),
                    "city".into(),
                    "id".into(),
                    "int".into(),
                    "int".into(),
                    "NO".into(),
                    "".into(),
                ],
                vec![
                    "world".into(),
                    "city".into(),
                    "name".into(),
                    "varchar".into(),
                    "varchar(35)".into(),
                    "YES".into(),
                    "".into(),
                ],
                vec![
                    "world".into(),
                    "v_city".into(),
                    "name".into(),
                    "varchar".into(),
                    "varchar(35)".into(),
                    "YES".into(),
                    "".into(),
                ],
            ],
        )
        .rows(
            r"FROM information_schema\.STATISTICS",
            &["s", "t", "i", "nu", "it", "c", "co", "n"],
            vec![vec![
                "world".into(),
                "city".into(),
                "PRIMARY".into(),
                Value::UInt(0),
                "BTREE".into(),
                "id".into(),
                "A".into(),
                "".into(),
            ]],
        )
        .rows(
            r"FROM information_schema\.VIEW_TABLE_USAGE",
            &["vs", "vn", "s", "t"],
            vec![vec!["world".into(), "v_city".into(), "world".into(), "city".into()]],
        )
        .rows(
            r"^SHOW CREATE DATABASE",
            &["Database", "Create Database"],
            vec![vec![
                "world".into(),
                "CREATE DATABASE `world` /*!40100 DEFAULT CHARACTER SET utf8mb4 */".into(),
            ]],
        )
        .rows(
            r"^SHOW CREATE TABLE `world`\.`city`",
            &["Table", "Create Table"],
            vec![vec![
                "city".into(),
                "CREATE TABLE `city` (\n  `id` int NOT NULL,\n  `name` varchar(35) DEFAULT NULL,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"
                    .into(),
            ]],
        )
        .rows(
            r"^SHOW CREATE VIEW",
            &["View", "Create View"],
            vec![vec![
                "v_city".into(),
                "CREATE VIEW `v_city` AS select `city`.`name` AS `name` from `city`".into(),
            ]],
        )
        .rows(
            r"^SELECT SQL_NO_CACHE .* FROM `world`\.`city`",
            &["id", "name"],
            vec![
                vec![Value::from(1i64), Value::from("Amsterdam")],
                vec![Value::from(2i64), Value::from("Berlin")],
            ],
        );
    Arc::new(ScriptedFactory::new(script))
}

fn target() -> Arc<ScriptedFactory> {
    Arc::new(ScriptedFactory::new(server_info(
        Script::new().on(r"^SELECT @@GLOBAL\.local_infile", Reply::value("v", "1")),
        "8.0.40",
        "target-uuid",
    )))
}

fn loaded_rows(factory: &ScriptedFactory) -> Vec<String> {
    let mut rows: Vec<String> = factory
        .payloads()
        .iter()
        .flat_map(|p| {
            String::from_utf8_lossy(&p.data)
                .lines()
                .map(|l| l.to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    rows.sort();
    rows
}

#[tokio::test]
async fn test_dump_to_directory_then_load_and_resume() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("world-dump");
    let location = location.to_str().unwrap();
    let storage = open_location(location, &StorageOptions::default()).unwrap();

    let options = DumpOptions {
        threads: 2,
        ..Default::default()
    };
    let dumped = dump_schemas(
        source(),
        storage.clone(),
        vec!["world".to_string()],
        options,
        Console::capture(),
    )
    .await
    .unwrap();
    assert_eq!(dumped.tables, 1);
    assert_eq!(dumped.views, 1);
    assert_eq!(dumped.rows, 2);
    assert!(storage.exists("@.json").await.unwrap());
    assert!(storage.exists("@.done.json").await.unwrap());
    assert!(storage.exists("world.city@@0.tsv.zst").await.unwrap());

    let first = target();
    let options = LoadOptions {
        threads: 2,
        ..Default::default()
    };
    let loaded = load_dump(first.clone(), storage.clone(), options.clone(), Console::capture())
        .await
        .unwrap();
    assert_eq!(loaded.rows, 2);
    assert_eq!(loaded.chunks, 1);
    assert_eq!(loaded_rows(&first), vec!["1\tAmsterdam", "2\tBerlin"]);
    assert_eq!(first.matching(r"^CREATE TABLE `city`").len(), 1);
    assert!(!first.matching(r"VIEW `v_city`").is_empty());
    assert!(storage
        .exists("load-progress.target-uuid.json")
        .await
        .unwrap());

    // the ledger next to the dump marks everything as loaded
    let again = target();
    let console = Console::capture();
    let summary = load_dump(again.clone(), storage, options, console.clone())
        .await
        .unwrap();
    assert_eq!(summary.chunks, 0);
    assert!(again.payloads().is_empty());
    assert!(console.contains("There was no remaining data left to be loaded."));
}

#[tokio::test]
async fn test_dump_refuses_non_empty_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("unrelated.txt"), b"x").unwrap();
    let storage = open_location(dir.path().to_str().unwrap(), &StorageOptions::default()).unwrap();
    let err = dump_schemas(
        source(),
        storage,
        vec!["world".to_string()],
        DumpOptions::default(),
        Console::capture(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_copy_streams_into_target() {
    let target = target();
    let mut options = CopyOptions::default();
    options.dump.threads = 2;
    options.load.threads = 2;
    let summary = copy_schemas(
        source(),
        target.clone(),
        vec!["world".to_string()],
        options,
        Console::capture(),
    )
    .await
    .unwrap();
    assert_eq!(summary.dump.rows, 2);
    assert_eq!(summary.load.rows, 2);
    assert_eq!(loaded_rows(&target), vec!["1\tAmsterdam", "2\tBerlin"]);
    assert_eq!(target.matching(r"^CREATE TABLE `city`").len(), 1);
}

#[tokio::test]
async fn test_invisible_primary_key_added_on_load() {
    let source = source();
    source.prepend(
        Script::new()
            .rows(
                r"FROM information_schema\.STATISTICS",
                &["s", "t", "i", "nu", "it", "c", "co", "n"],
                Vec::new(),
            )
            .rows(
                r"^SHOW CREATE TABLE `world`\.`city`",
                &["Table", "Create Table"],
                vec![vec![
                    "city".into(),
                    "CREATE TABLE `city` (\n  `id` int NOT NULL,\n  `name` varchar(35) DEFAULT NULL\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"
                        .into(),
                ]],
            ),
    );
    let dir = tempfile::tempdir().unwrap();
    let storage = open_location(dir.path().to_str().unwrap(), &StorageOptions::default()).unwrap();
    let options = DumpOptions {
        compatibility: vec!["create_invisible_pks".to_string()],
        ..Default::default()
    };
    let console = Console::capture();
    dump_schemas(
        source,
        storage.clone(),
        vec!["world".to_string()],
        options,
        console.clone(),
    )
    .await
    .unwrap();
    assert!(console.contains("this will be fixed when the dump is loaded"));

    let target = target();
    let loaded = load_dump(target.clone(), storage, LoadOptions::default(), Console::capture())
        .await
        .unwrap();
    assert_eq!(loaded.rows, 2);
    assert_eq!(loaded_rows(&target), vec!["1\tAmsterdam", "2\tBerlin"]);

    let log = target.sql_log();
    let create = log
        .iter()
        .position(|s| s.starts_with("CREATE TABLE `city`"))
        .unwrap();
    let alter = log
        .iter()
        .position(|s| {
            s == "ALTER TABLE `world`.`city` ADD COLUMN `my_row_id` BIGINT UNSIGNED NOT NULL AUTO_INCREMENT INVISIBLE PRIMARY KEY FIRST"
        })
        .unwrap();
    let first_load = log
        .iter()
        .position(|s| s.starts_with("LOAD DATA LOCAL INFILE"))
        .unwrap();
    assert!(create < alter);
    assert!(alter < first_load);
}
