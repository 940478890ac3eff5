//! Schema provisioning and obsolete index cleanup through the manager.

mod support;

use support::{config, harness, harness_with, registry, DropRecord, MANAGED_TABLE};
use tenantctl_core::DataModel;

#[tokio::test]
async fn ensure_schema_exists_creates_once() {
    let h = harness(config(4));

    assert!(h.manager.ensure_schema_exists("s1").await.unwrap());
    assert!(!h.manager.ensure_schema_exists("s1").await.unwrap());

    assert_eq!(h.db.lock().unwrap().schema_creates, 1);
}

#[tokio::test]
async fn obsolete_index_is_dropped_then_nothing_left() {
    let h = harness(config(4));
    h.seed_indexes("s1", &["idx1"]);

    let dropped = h.manager.drop_obsolete_indexes("s1").await;
    assert_eq!(dropped, vec!["idx1".to_string()]);

    let dropped = h.manager.drop_obsolete_indexes("s1").await;
    assert!(dropped.is_empty());
    assert_eq!(h.db.lock().unwrap().drops.len(), 1);
}

#[tokio::test]
async fn declared_indexes_are_kept() {
    let h = harness_with(
        registry(),
        DataModel::new()
            .with_tables([MANAGED_TABLE])
            .with_indexes(["idx_orders_status"]),
        config(4),
    );
    h.seed_indexes("s1", &["idx_orders_status", "idx_orders_legacy"]);

    let dropped = h.manager.drop_obsolete_indexes("s1").await;

    assert_eq!(dropped, vec!["idx_orders_legacy".to_string()]);
    assert_eq!(h.index_names("s1"), vec!["idx_orders_status".to_string()]);
}

#[tokio::test]
async fn uncached_schema_uses_admin_connection() {
    let h = harness(config(4));
    h.seed_indexes("db1", &["idx1"]);

    h.manager.drop_obsolete_indexes("db1").await;

    assert_eq!(
        h.db.lock().unwrap().drops,
        vec![DropRecord {
            via: "admin".into(),
            schema: "db1".into(),
            index: "idx1".into(),
        }]
    );
}

#[tokio::test]
async fn cached_schema_uses_tenant_connection() {
    let h = harness(config(4));
    h.manager.get_connection("store-a").await.unwrap();
    h.seed_indexes("db1", &["idx_late"]);

    h.manager.drop_obsolete_indexes("db1").await;

    let db = h.db.lock().unwrap();
    assert_eq!(db.drops.len(), 1);
    assert_eq!(db.drops[0].via, "db1");
}

#[tokio::test]
async fn global_connection_variant_always_uses_admin() {
    let h = harness(config(4));
    h.manager.get_connection("store-a").await.unwrap();
    h.seed_indexes("db1", &["idx_late"]);

    h.manager
        .drop_obsolete_indexes_with_global_connection("db1")
        .await;

    assert_eq!(h.db.lock().unwrap().drops[0].via, "admin");
}

#[tokio::test]
async fn first_connect_drops_obsolete_indexes() {
    let h = harness(config(4));
    h.seed_indexes("db1", &["idx1", "idx2"]);

    h.manager.get_connection("store-a").await.unwrap();

    let db = h.db.lock().unwrap();
    assert!(db.indexes["db1"].is_empty());
    assert!(db.drops.iter().all(|d| d.via == "admin"));
    assert_eq!(db.schema_creates, 0);
}

#[tokio::test]
async fn indexes_on_unmanaged_tables_survive_first_connect() {
    let h = harness(config(4));
    h.seed_table_indexes("db1", "audit_log", &["audit_log_created_idx"]);
    h.seed_indexes("db1", &["idx_orders_legacy"]);

    h.manager.get_connection("store-a").await.unwrap();

    assert_eq!(h.index_names("db1"), vec!["audit_log_created_idx".to_string()]);
    let db = h.db.lock().unwrap();
    assert_eq!(db.drops.len(), 1);
    assert_eq!(db.drops[0].index, "idx_orders_legacy");
}

#[tokio::test]
async fn empty_model_never_drops_indexes() {
    let h = harness_with(registry(), DataModel::new(), config(4));
    h.seed_indexes("db1", &["idx1", "idx2"]);

    h.manager.get_connection("store-a").await.unwrap();
    let dropped = h.manager.drop_obsolete_indexes("db1").await;

    assert!(dropped.is_empty());
    assert_eq!(h.index_names("db1"), vec!["idx1".to_string(), "idx2".to_string()]);
    let db = h.db.lock().unwrap();
    assert!(db.drops.is_empty());
    assert_eq!(db.index_queries, 0);
}

#[tokio::test]
async fn index_query_failure_does_not_block_connection() {
    let h = harness(config(4));
    h.db.lock().unwrap().fail_index_query = true;

    let conn = h.manager.get_connection("store-a").await;

    assert!(conn.is_ok());
    assert!(h.db.lock().unwrap().drops.is_empty());
}

#[tokio::test]
async fn failed_drop_does_not_stop_the_rest() {
    let h = harness(config(4));
    h.seed_indexes("s1", &["idx_locked", "idx_free"]);
    h.db.lock().unwrap().fail_drop.insert("idx_locked".into());

    let dropped = h.manager.drop_obsolete_indexes("s1").await;

    assert_eq!(dropped, vec!["idx_free".to_string()]);
}
