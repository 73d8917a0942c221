// Incremental aggregation: restarts, baselines, replace semantics, expiry, ledger invariant

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use common::{counters_of, report, ts};
use netmon::aggregator::{AggregatorOptions, CumulativeManager, MetricsAggregator};
use netmon::error::AggregationError;
use netmon::models::RestartReason;

fn manager() -> CumulativeManager {
    CumulativeManager::new(AggregatorOptions::default())
}

fn access(m: &CumulativeManager, domain: &str) -> u64 {
    m.domain_metrics(domain).map(|d| d.access_count).unwrap_or(0)
}

fn assert_ledger_consistent(m: &CumulativeManager) {
    let snapshot = m.storage_snapshot();
    assert_eq!(
        counters_of(&snapshot.global_cumulative),
        counters_of(&m.resummed_global()),
        "global must equal the sum of ledger entries"
    );
}

#[test]
fn test_update_replaces_previous_contribution() {
    let m = manager();
    m.process_metrics_at(report("a", 0, 10, &[("x.com", 5)]), ts(10));
    m.process_metrics_at(report("a", 0, 20, &[("x.com", 8)]), ts(20));
    assert_eq!(access(&m, "x.com"), 8);
    let x = m.domain_metrics("x.com").unwrap();
    assert_eq!(x.bytes_sent, 800);
    assert_eq!(x.bytes_received, 8000);
    assert_eq!(x.connection_count, 8);
    assert_ledger_consistent(&m);
}

#[test]
fn test_restart_by_startup_time_keeps_history() {
    let m = manager();
    let first = m.process_metrics_at(report("a", 0, 10, &[("x.com", 10)]), ts(10));
    assert!(!first.is_restart);

    let second = m.process_metrics_at(report("a", 100, 110, &[("x.com", 3)]), ts(110));
    assert!(second.is_restart);
    assert_eq!(second.reason, Some(RestartReason::StartupTimeAdvanced));
    assert_eq!(second.previous_startup, Some(ts(0)));
    assert_eq!(second.current_startup, ts(100));
    assert_eq!(second.restart_count, 1);

    assert_eq!(access(&m, "x.com"), 13);
    assert_eq!(m.domain_metrics("x.com").unwrap().bytes_sent, 1300);

    // Same lifetime keeps growing on top of the baseline.
    let third = m.process_metrics_at(report("a", 100, 120, &[("x.com", 5)]), ts(120));
    assert!(!third.is_restart);
    assert_eq!(access(&m, "x.com"), 15);

    let state = m.agents().into_iter().find(|s| s.agent_id == "a").unwrap();
    assert_eq!(state.restart_count, 1);
    assert_eq!(state.last_startup_time, ts(100));
    assert_eq!(state.last_report_time, ts(120));
    assert_ledger_consistent(&m);
}

#[test]
fn test_baseline_accumulates_across_restarts() {
    let m = manager();
    m.process_metrics_at(report("a", 0, 10, &[("x.com", 10)]), ts(10));
    m.process_metrics_at(report("a", 100, 110, &[("x.com", 3)]), ts(110));
    m.process_metrics_at(report("a", 200, 210, &[("x.com", 4)]), ts(210));
    assert_eq!(access(&m, "x.com"), 17);

    let snapshot = m.storage_snapshot();
    let baseline = &snapshot.restart_baselines["a"]["x.com"];
    assert_eq!(baseline.access_count, 13);
    assert_eq!(snapshot.agent_states["a"].restart_count, 2);
    assert_ledger_consistent(&m);
}

#[test]
fn test_counter_decrease_is_treated_as_restart() {
    let m = manager();
    m.process_metrics_at(report("a", 0, 10, &[("x.com", 10), ("y.com", 2)]), ts(10));
    let detection = m.process_metrics_at(report("a", 0, 20, &[("x.com", 4), ("y.com", 2)]), ts(20));
    assert!(detection.is_restart);
    assert_eq!(detection.reason, Some(RestartReason::CountersDecreased));
    assert_eq!(access(&m, "x.com"), 14);
    assert_eq!(access(&m, "y.com"), 4);
    assert_ledger_consistent(&m);
}

#[test]
fn test_first_report_is_never_a_restart() {
    let m = manager();
    let detection = m.process_metrics_at(report("a", 500, 510, &[("x.com", 1)]), ts(510));
    assert!(!detection.is_restart);
    assert_eq!(detection.restart_count, 0);
    assert!(m.storage_snapshot().restart_baselines.is_empty());
}

#[test]
fn test_multiple_agents_add_up() {
    let m = manager();
    m.process_metrics_at(report("a", 0, 10, &[("x.com", 4)]), ts(10));
    m.process_metrics_at(report("b", 0, 10, &[("x.com", 6), ("y.com", 1)]), ts(10));
    assert_eq!(access(&m, "x.com"), 10);
    assert_eq!(access(&m, "y.com"), 1);

    let cumulative = m.cumulative_metrics_at(ts(20));
    assert_eq!(cumulative.data_sources, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(cumulative.system_stats.active_domains, 2);
    assert_eq!(cumulative.system_stats.total_connections, 11);
    assert_eq!(cumulative.system_stats.total_bytes_sent, 1100);
    assert_eq!(cumulative.system_stats.total_bytes_received, 11000);
    assert_eq!(cumulative.generated_at, ts(20));
    assert_ledger_consistent(&m);
}

#[test]
fn test_restart_of_one_agent_does_not_disturb_others() {
    let m = manager();
    m.process_metrics_at(report("a", 0, 10, &[("x.com", 10)]), ts(10));
    m.process_metrics_at(report("b", 0, 10, &[("x.com", 7)]), ts(10));
    m.process_metrics_at(report("a", 50, 60, &[("x.com", 1)]), ts(60));
    m.process_metrics_at(report("b", 0, 60, &[("x.com", 9)]), ts(60));
    assert_eq!(access(&m, "x.com"), 10 + 1 + 9);
    assert_ledger_consistent(&m);
}

#[test]
fn test_domain_dropped_from_later_report_leaves_global() {
    let m = manager();
    m.process_metrics_at(report("a", 0, 10, &[("x.com", 5), ("y.com", 2)]), ts(10));
    m.process_metrics_at(report("a", 0, 20, &[("x.com", 6)]), ts(20));
    assert_eq!(access(&m, "x.com"), 6);
    assert_eq!(
        m.domain_metrics("y.com"),
        Err(AggregationError::DomainNotFound("y.com".into()))
    );
    assert_ledger_consistent(&m);
}

#[test]
fn test_baseline_domain_survives_restart_without_new_traffic() {
    let m = manager();
    m.process_metrics_at(report("a", 0, 10, &[("x.com", 5), ("y.com", 2)]), ts(10));
    m.process_metrics_at(report("a", 100, 110, &[("x.com", 1)]), ts(110));
    assert_eq!(access(&m, "x.com"), 6);
    assert_eq!(access(&m, "y.com"), 2);
    assert_ledger_consistent(&m);
}

#[test]
fn test_restart_detection_disabled_replaces_counters() {
    let m = CumulativeManager::new(AggregatorOptions {
        enable_restart_detection: false,
        ..Default::default()
    });
    m.process_metrics_at(report("a", 0, 10, &[("x.com", 10)]), ts(10));
    let detection = m.process_metrics_at(report("a", 100, 110, &[("x.com", 3)]), ts(110));
    assert!(!detection.is_restart);
    assert_eq!(access(&m, "x.com"), 3);
    assert_eq!(m.agents()[0].restart_count, 0);
}

#[test]
fn test_baseline_tracking_disabled_still_counts_restarts() {
    let m = CumulativeManager::new(AggregatorOptions {
        enable_baseline_tracking: false,
        ..Default::default()
    });
    m.process_metrics_at(report("a", 0, 10, &[("x.com", 10)]), ts(10));
    let detection = m.process_metrics_at(report("a", 100, 110, &[("x.com", 3)]), ts(110));
    assert!(detection.is_restart);
    assert_eq!(access(&m, "x.com"), 3);
    assert_eq!(m.agents()[0].restart_count, 1);
    assert!(m.storage_snapshot().restart_baselines.is_empty());
    assert_ledger_consistent(&m);
}

#[test]
fn test_sub_maps_are_replaced_not_added() {
    let m = manager();
    let mut first = report("a", 0, 10, &[("x.com", 5)]);
    let x = first.delta_stats.get_mut("x.com").unwrap();
    x.protocol_stats = BTreeMap::from([("tcp".to_string(), 5)]);
    x.port_stats = BTreeMap::from([(443, 5)]);
    m.process_metrics_at(first, ts(10));

    let mut second = report("a", 0, 20, &[("x.com", 6)]);
    let x = second.delta_stats.get_mut("x.com").unwrap();
    x.protocol_stats = BTreeMap::from([("tcp".to_string(), 5), ("udp".to_string(), 1)]);
    x.port_stats = BTreeMap::from([(53, 1)]);
    m.process_metrics_at(second, ts(20));

    let global = m.domain_metrics("x.com").unwrap();
    assert_eq!(
        global.protocol_stats,
        BTreeMap::from([("tcp".to_string(), 5), ("udp".to_string(), 1)])
    );
    assert_eq!(global.port_stats, BTreeMap::from([(53, 1)]));
    assert_ledger_consistent(&m);
}

#[test]
fn test_last_access_time_is_latest_seen() {
    let m = manager();
    m.process_metrics_at(report("a", 0, 10, &[("x.com", 1)]), ts(10));
    m.process_metrics_at(report("b", 0, 50, &[("x.com", 1)]), ts(50));
    m.process_metrics_at(report("a", 0, 30, &[("x.com", 2)]), ts(30));
    assert_eq!(m.domain_metrics("x.com").unwrap().last_access_time, ts(50));
}

#[test]
fn test_zero_activity_domain_is_not_listed() {
    let m = manager();
    m.process_metrics_at(report("a", 0, 10, &[("idle.com", 0)]), ts(10));
    assert!(m.domain_metrics("idle.com").is_err());
    assert!(m.cumulative_metrics_at(ts(10)).domain_stats.is_empty());
}

#[test]
fn test_ledger_invariant_over_mixed_sequence() {
    let m = manager();
    let steps: &[(&str, i64, i64, &[(&str, u64)])] = &[
        ("a", 0, 10, &[("x.com", 3), ("y.com", 1)]),
        ("b", 0, 12, &[("x.com", 2)]),
        ("a", 0, 20, &[("x.com", 7), ("y.com", 1), ("z.com", 4)]),
        ("b", 30, 35, &[("x.com", 1), ("z.com", 1)]),
        ("a", 0, 40, &[("x.com", 2)]),
        ("c", 0, 41, &[("y.com", 9)]),
        ("b", 30, 50, &[("x.com", 5)]),
        ("a", 60, 61, &[]),
    ];
    for (agent, startup, at, domains) in steps {
        m.process_metrics_at(report(agent, *startup, *at, domains), ts(*at));
        assert_ledger_consistent(&m);
    }
    // a: baseline {x:9, y:1, z:4} after two restarts, nothing reported since.
    // b: baseline {x:2} plus latest {x:5}; its z traffic belonged to a dropped report.
    assert_eq!(access(&m, "x.com"), 9 + 2 + 5);
    assert_eq!(access(&m, "z.com"), 4);
    assert_eq!(access(&m, "y.com"), 1 + 9);
}

#[test]
fn test_cleanup_expires_silent_agents() {
    let m = manager();
    m.process_metrics_at(report("a", 0, 0, &[("x.com", 4), ("only-a.com", 3)]), ts(0));
    m.process_metrics_at(report("b", 0, 400, &[("x.com", 6)]), ts(400));

    let removed = m.cleanup_expired_data_at(Duration::from_secs(600), ts(700));
    assert_eq!(removed, vec!["a".to_string()]);
    assert_eq!(access(&m, "x.com"), 6);
    assert!(m.domain_metrics("only-a.com").is_err());

    let snapshot = m.storage_snapshot();
    assert!(!snapshot.raw_metrics.contains_key("a"));
    assert!(!snapshot.agent_states.contains_key("a"));
    assert!(!snapshot.contributions.contains_key("a"));
    assert_eq!(snapshot.last_updated, Some(ts(700)));
    assert_ledger_consistent(&m);
}

#[test]
fn test_cleanup_removes_restart_baselines() {
    let m = manager();
    m.process_metrics_at(report("a", 0, 0, &[("x.com", 10)]), ts(0));
    m.process_metrics_at(report("a", 5, 6, &[("x.com", 1)]), ts(6));
    assert_eq!(access(&m, "x.com"), 11);

    let removed = m.cleanup_expired_data_at(Duration::from_secs(60), ts(1000));
    assert_eq!(removed, vec!["a".to_string()]);
    let snapshot = m.storage_snapshot();
    assert!(snapshot.restart_baselines.is_empty());
    assert!(snapshot.global_cumulative.is_empty());
}

#[test]
fn test_cleanup_keeps_recent_agents() {
    let m = manager();
    m.process_metrics_at(report("a", 0, 0, &[("x.com", 4)]), ts(0));
    assert!(m.cleanup_expired_data_at(Duration::from_secs(600), ts(300)).is_empty());
    assert_eq!(access(&m, "x.com"), 4);
}

#[test]
fn test_heartbeat_extends_liveness() {
    let m = manager();
    m.process_metrics_at(report("a", 0, 0, &[("x.com", 4)]), ts(0));
    assert!(m.record_heartbeat_at("a", ts(500)));
    assert!(!m.record_heartbeat_at("ghost", ts(500)));

    assert!(m.cleanup_expired_data_at(Duration::from_secs(600), ts(700)).is_empty());
    assert_eq!(m.agents()[0].last_heartbeat, ts(500));
    assert_eq!(m.agents().len(), 1);
}

#[test]
fn test_data_sources_follow_agent_timeout() {
    let m = manager();
    m.process_metrics_at(report("a", 0, 0, &[("x.com", 4)]), ts(0));
    m.process_metrics_at(report("b", 0, 200, &[("x.com", 1)]), ts(200));

    let cumulative = m.cumulative_metrics_at(ts(301));
    assert_eq!(cumulative.data_sources, vec!["b".to_string()]);
    // Silent agents still count until cleanup removes them.
    assert_eq!(cumulative.domain_stats["x.com"].access_count, 5);

    let stats = m.stats_at(ts(301));
    assert_eq!(stats.agents, 2);
    assert_eq!(stats.active_agents, 1);
    assert_eq!(stats.domains, 1);
}

#[test]
fn test_unknown_domain_is_not_found() {
    let m = manager();
    assert_eq!(
        m.domain_metrics("nope.example"),
        Err(AggregationError::DomainNotFound("nope.example".into()))
    );
}

#[test]
fn test_storage_snapshot_serializes() {
    let m = manager();
    m.process_metrics_at(report("a", 0, 10, &[("x.com", 1)]), ts(10));
    let value = serde_json::to_value(m.storage_snapshot()).unwrap();
    assert!(value["raw_metrics"]["a"].is_object());
    assert_eq!(value["global_cumulative"]["x.com"]["access_count"], 1);
    assert_eq!(value["contributions"]["a"]["x.com"]["access_count"], 1);
}
