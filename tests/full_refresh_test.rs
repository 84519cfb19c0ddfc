// ABOUTME: End-to-end refresh tests against a SQLite-backed Oracle stand-in
// ABOUTME: Covers copy, blacklist, views, sequences, retries, sample mode and report

mod support;

use oracle_duckdb_loader::config::RunSettings;
use oracle_duckdb_loader::filters::NameFilter;
use oracle_duckdb_loader::loader::{LoadMode, LoadOrchestrator, RunPhase};
use oracle_duckdb_loader::report::EntityStatus;
use oracle_duckdb_loader::target::TargetDatabase;
use oracle_duckdb_loader::transfer::TransferOutcome;
use oracle_duckdb_loader::LoaderError;
use std::sync::Arc;
use std::time::Duration;
use support::{OracleStandIn, OWNER};

fn settings(mode: LoadMode, blacklist: &str) -> RunSettings {
    let mut settings = RunSettings::new(OWNER, mode);
    settings.threads = 2;
    settings.batch_size = 2;
    settings.retry_backoff = Duration::from_millis(10);
    settings.blacklist = NameFilter::new(blacklist);
    settings
}

fn orchestrator(db: &OracleStandIn, settings: RunSettings) -> (LoadOrchestrator, Arc<TargetDatabase>) {
    let target = Arc::new(TargetDatabase::open_in_memory().unwrap());
    let orchestrator = LoadOrchestrator::new(settings, db.connector(), target.clone());
    (orchestrator, target)
}

fn count(target: &TargetDatabase, sql: &str) -> i64 {
    let conn = target.connect().unwrap();
    conn.query_row(sql, [], |row| row.get::<_, i64>(0)).unwrap()
}

fn text(target: &TargetDatabase, sql: &str) -> Option<String> {
    let conn = target.connect().unwrap();
    conn.query_row(sql, [], |row| row.get::<_, Option<String>>(0))
        .unwrap()
}

#[tokio::test]
async fn test_full_refresh_copies_schema() {
    let db = OracleStandIn::seeded();
    let (orchestrator, target) = orchestrator(&db, settings(LoadMode::Full, "T_*"));

    let summary = orchestrator.run_full_refresh().await.unwrap();

    assert_eq!(summary.phase, RunPhase::Idle);
    assert_eq!(orchestrator.phase(), RunPhase::Idle);
    assert_eq!(summary.discovered.tables, vec!["DEPT", "EMP", "T_SKIP"]);
    assert_eq!(summary.skipped, vec!["T_SKIP"]);
    assert_eq!(summary.copied_tables(), 2);
    assert!(summary.is_clean());

    assert_eq!(count(&target, "SELECT COUNT(*) FROM \"EMP\""), 3);
    assert_eq!(count(&target, "SELECT COUNT(*) FROM \"DEPT\""), 2);
    assert_eq!(
        count(
            &target,
            "SELECT COUNT(*) FROM duckdb_tables() WHERE table_name = 'T_SKIP'"
        ),
        0
    );

    let report = &summary.report;
    assert_eq!(report.table("EMP").unwrap().status, EntityStatus::Match);
    assert_eq!(report.table("DEPT").unwrap().status, EntityStatus::Match);
    assert_eq!(report.table("T_SKIP").unwrap().status, EntityStatus::Skipped);
    assert_eq!(report.view("EMP_VIEW").unwrap().status, EntityStatus::Migrated);
    assert_eq!(report.sequence("ORDERS_SEQ").unwrap().status, EntityStatus::Match);
    assert!(summary.rendered_report.contains("T_SKIP"));
}

#[tokio::test]
async fn test_column_values_survive_conversion() {
    let db = OracleStandIn::seeded();
    let stats = db.stats();
    let (orchestrator, target) = orchestrator(&db, settings(LoadMode::Full, ""));
    orchestrator.run_full_refresh().await.unwrap();

    // Two non-null PHOTO and two non-null NOTES cells
    assert_eq!(stats.lobs_opened(), 4);
    assert_eq!(stats.lobs_freed(), 4);

    assert_eq!(
        text(&target, "SELECT CAST(HIRED AS VARCHAR) FROM \"EMP\" WHERE ID = 1").as_deref(),
        Some("2020-01-15 09:30:00")
    );
    // DATE without a time part lands at midnight
    assert_eq!(
        text(&target, "SELECT CAST(HIRED AS VARCHAR) FROM \"EMP\" WHERE ID = 2").as_deref(),
        Some("2021-06-01 00:00:00")
    );
    assert_eq!(
        text(&target, "SELECT CAST(SALARY AS VARCHAR) FROM \"EMP\" WHERE ID = 1").as_deref(),
        Some("1000.50")
    );
    assert_eq!(text(&target, "SELECT NOTES FROM \"EMP\" WHERE ID = 2"), None);
    assert_eq!(
        text(&target, "SELECT NOTES FROM \"EMP\" WHERE ID = 3").as_deref(),
        Some("third")
    );

    let conn = target.connect().unwrap();
    let photo: Vec<u8> = conn
        .query_row("SELECT PHOTO FROM \"EMP\" WHERE ID = 1", [], |row| row.get(0))
        .unwrap();
    assert_eq!(photo, vec![0x01, 0x02]);
}

#[tokio::test]
async fn test_views_are_translated_and_prefixed() {
    let db = OracleStandIn::seeded();
    let (orchestrator, target) = orchestrator(&db, settings(LoadMode::Full, ""));
    orchestrator.run_full_refresh().await.unwrap();

    assert_eq!(count(&target, "SELECT COUNT(*) FROM \"VW_EMP_VIEW\""), 3);
    assert_eq!(
        text(&target, "SELECT PAY_STATE FROM \"VW_EMP_VIEW\" WHERE NAME = 'CAROL'").as_deref(),
        Some("UNPAID")
    );
    assert_eq!(
        text(&target, "SELECT PAY_STATE FROM \"VW_EMP_VIEW\" WHERE NAME = 'ALICE'").as_deref(),
        Some("PAID")
    );
}

#[tokio::test]
async fn test_broken_view_does_not_stop_the_run() {
    let db = OracleStandIn::seeded();
    db.add_view("EMPTY_VIEW", "  ;\n");
    db.add_view("BAD_VIEW", "SELECT * FROM TEST.NO_SUCH_TABLE");
    let (orchestrator, _target) = orchestrator(&db, settings(LoadMode::Full, ""));

    let summary = orchestrator.run_full_refresh().await.unwrap();

    let failed: Vec<&str> = summary
        .view_failures
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    assert_eq!(failed, vec!["BAD_VIEW", "EMPTY_VIEW"]);
    for view in ["BAD_VIEW", "EMPTY_VIEW"] {
        assert!(
            matches!(
                summary.report.view(view).unwrap().status,
                EntityStatus::Error(Some(_))
            ),
            "{} should be reported as an error",
            view
        );
    }
    assert_eq!(
        summary.report.view("EMP_VIEW").unwrap().status,
        EntityStatus::Migrated
    );
    assert_eq!(summary.copied_tables(), 3);
}

#[tokio::test]
async fn test_view_that_stops_translating_loses_its_old_definition() {
    let db = OracleStandIn::seeded();
    let (orchestrator, target) = orchestrator(&db, settings(LoadMode::Full, ""));
    orchestrator.run_full_refresh().await.unwrap();
    assert_eq!(count(&target, "SELECT COUNT(*) FROM \"VW_EMP_VIEW\""), 3);

    db.set_view_text("EMP_VIEW", "  ;");
    let summary = orchestrator.run_full_refresh().await.unwrap();

    assert_eq!(summary.view_failures.len(), 1);
    assert_eq!(summary.view_failures[0].name, "EMP_VIEW");
    assert_eq!(
        count(
            &target,
            "SELECT COUNT(*) FROM duckdb_views() WHERE view_name = 'VW_EMP_VIEW'"
        ),
        0
    );
    let status = &summary.report.view("EMP_VIEW").unwrap().status;
    assert!(matches!(status, EntityStatus::Error(Some(_))), "got {}", status);
}

#[tokio::test]
async fn test_sequences_follow_source_position() {
    let db = OracleStandIn::seeded();
    db.add_sequence("INVOICE_SEQ", -5, -100);
    let (orchestrator, target) = orchestrator(&db, settings(LoadMode::Full, ""));

    // Second run recreates existing sequences
    orchestrator.run_full_refresh().await.unwrap();
    let summary = orchestrator.run_full_refresh().await.unwrap();

    assert!(summary.sequence_failures.is_empty());
    assert_eq!(
        summary.report.sequence("ORDERS_SEQ").unwrap().status,
        EntityStatus::Match
    );
    assert_eq!(
        summary.report.sequence("INVOICE_SEQ").unwrap().status,
        EntityStatus::Match
    );
    assert_eq!(count(&target, "SELECT nextval('ORDERS_SEQ')"), 1000);
    assert_eq!(count(&target, "SELECT nextval('INVOICE_SEQ')"), -100);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let db = OracleStandIn::seeded();
    db.fail_table("DEPT", 1);
    let (orchestrator, target) = orchestrator(&db, settings(LoadMode::Full, ""));

    let summary = orchestrator.run_full_refresh().await.unwrap();

    match summary.outcome("DEPT").unwrap() {
        TransferOutcome::Copied { rows, attempts, .. } => {
            assert_eq!(*rows, 2);
            assert_eq!(*attempts, 2);
        }
        other => panic!("DEPT should have been copied: {:?}", other),
    }
    assert_eq!(count(&target, "SELECT COUNT(*) FROM \"DEPT\""), 2);
    assert_eq!(summary.report.table("DEPT").unwrap().status, EntityStatus::Match);
}

#[tokio::test]
async fn test_failing_table_is_isolated() {
    let db = OracleStandIn::seeded();
    db.fail_table("DEPT", usize::MAX);
    let mut run = settings(LoadMode::Full, "");
    run.max_retries = 2;
    let (orchestrator, target) = orchestrator(&db, run);

    let summary = orchestrator.run_full_refresh().await.unwrap();

    match summary.outcome("DEPT").unwrap() {
        TransferOutcome::Failed { error, attempts, .. } => {
            assert_eq!(*attempts, 2);
            assert!(error.contains("ORA-03113"), "unexpected error: {}", error);
        }
        other => panic!("DEPT should have failed: {:?}", other),
    }
    assert_eq!(summary.failed_tables(), 1);
    assert!(!summary.is_clean());
    assert_eq!(orchestrator.progress(), (2, 1));

    assert_eq!(count(&target, "SELECT COUNT(*) FROM \"EMP\""), 3);
    assert_eq!(summary.report.table("EMP").unwrap().status, EntityStatus::Match);
    let dept = summary.report.table("DEPT").unwrap();
    match &dept.status {
        EntityStatus::Error(Some(reason)) => assert!(reason.contains("ORA-03113"), "{}", reason),
        other => panic!("DEPT should be reported as an error: {}", other),
    }
    assert!(summary.rendered_report.contains("ERROR: ORA-03113"));
}

#[tokio::test]
async fn test_lost_session_during_report_only_affects_one_row() {
    let db = OracleStandIn::seeded();
    db.lose_session_on_count("DEPT", 1);
    let stats = db.stats();
    let (orchestrator, _target) = orchestrator(&db, settings(LoadMode::Full, ""));

    let summary = orchestrator.run_full_refresh().await.unwrap();

    assert_eq!(summary.copied_tables(), 3);
    let report = &summary.report;
    assert_eq!(report.table("DEPT").unwrap().status, EntityStatus::Error(None));
    assert_eq!(report.table("EMP").unwrap().status, EntityStatus::Match);
    assert_eq!(report.table("T_SKIP").unwrap().status, EntityStatus::Match);
    assert_eq!(stats.open(), 0);
}

#[tokio::test]
async fn test_sample_mode_caps_rows() {
    let db = OracleStandIn::seeded();
    let (orchestrator, target) = orchestrator(&db, settings(LoadMode::sample(2), ""));

    let summary = orchestrator.run_full_refresh().await.unwrap();

    assert_eq!(summary.mode, LoadMode::Sample { row_limit: 2 });
    assert_eq!(count(&target, "SELECT COUNT(*) FROM \"EMP\""), 2);
    assert_eq!(count(&target, "SELECT COUNT(*) FROM \"DEPT\""), 2);
    assert!(matches!(
        summary.outcome("EMP").unwrap(),
        TransferOutcome::Copied { rows: 2, .. }
    ));
    assert_eq!(
        summary.report.table("EMP").unwrap().status.to_string(),
        "-1"
    );
}

#[tokio::test]
async fn test_connections_are_bounded_and_released() {
    let db = OracleStandIn::seeded();
    for i in 0..6 {
        db.add_table(&format!("EXTRA_{}", i), "ID NUMBER(9,0)", "(1), (2), (3)");
    }
    let stats = db.stats();
    let (orchestrator, _target) = orchestrator(&db, settings(LoadMode::Full, ""));

    let summary = orchestrator.run_full_refresh().await.unwrap();

    assert_eq!(summary.copied_tables(), 9);
    assert_eq!(stats.open(), 0);
    assert!(stats.max_open() <= 2, "max open was {}", stats.max_open());
    assert!(stats.total() >= 9);
}

#[tokio::test]
async fn test_unreachable_source_fails_the_run() {
    let db = OracleStandIn::seeded();
    db.refuse_connections(true);
    let (orchestrator, _target) = orchestrator(&db, settings(LoadMode::Full, ""));

    let result = orchestrator.run_full_refresh().await;

    assert!(matches!(result, Err(LoaderError::Source(_))));
    assert_eq!(
        orchestrator.phase(),
        RunPhase::Failed {
            during: Box::new(RunPhase::Discovering)
        }
    );
}

#[tokio::test]
async fn test_catalog_failure_is_discovery_error() {
    let db = OracleStandIn::seeded();
    db.break_catalog();
    let (orchestrator, _target) = orchestrator(&db, settings(LoadMode::Full, ""));

    let result = orchestrator.run_full_refresh().await;

    match result {
        Err(LoaderError::Discovery { schema, .. }) => assert_eq!(schema, OWNER),
        other => panic!("expected discovery error, got {:?}", other.map(|s| s.phase)),
    }
    assert_eq!(db.stats().open(), 0);
}

#[tokio::test]
async fn test_empty_schema_reports_none() {
    let db = OracleStandIn::new();
    let (orchestrator, _target) = orchestrator(&db, settings(LoadMode::Full, ""));

    let summary = orchestrator.run_full_refresh().await.unwrap();

    assert!(summary.discovered.is_empty());
    assert!(summary.outcomes.is_empty());
    assert_eq!(summary.rendered_report.matches("(none)").count(), 3);
}
