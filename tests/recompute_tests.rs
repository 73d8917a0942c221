// Full-recompute strategy: same external contract, active agents only, cached view

mod common;

use std::time::Duration;

use common::{report, ts};
use netmon::aggregator::{AggregatorOptions, MetricsAggregator, RecomputingAggregator, build};
use netmon::config::{AggregationConfig, AggregationStrategy};

fn aggregator() -> RecomputingAggregator {
    RecomputingAggregator::new(AggregatorOptions::default(), Duration::from_secs(30))
}

#[test]
fn test_recompute_replace_and_restart_semantics() {
    let agg = aggregator();
    agg.process_metrics_at(report("a", 0, 10, &[("x.com", 5)]), ts(10));
    agg.process_metrics_at(report("a", 0, 20, &[("x.com", 8)]), ts(20));
    assert_eq!(agg.cumulative_metrics_at(ts(20)).domain_stats["x.com"].access_count, 8);

    let detection = agg.process_metrics_at(report("a", 100, 110, &[("x.com", 3)]), ts(110));
    assert!(detection.is_restart);
    assert_eq!(agg.cumulative_metrics_at(ts(110)).domain_stats["x.com"].access_count, 11);
}

#[test]
fn test_recompute_sums_agents() {
    let agg = aggregator();
    agg.process_metrics(report("a", 0, 10, &[("x.com", 4)]));
    agg.process_metrics(report("b", 0, 10, &[("x.com", 6)]));
    let cumulative = agg.cumulative_metrics();
    assert_eq!(cumulative.domain_stats["x.com"].access_count, 10);
    assert_eq!(cumulative.data_sources, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(agg.domain_metrics("x.com").unwrap().access_count, 10);
}

#[test]
fn test_recompute_cache_invalidated_by_process() {
    let agg = aggregator();
    agg.process_metrics_at(report("a", 0, 10, &[("x.com", 1)]), ts(10));
    assert_eq!(agg.cumulative_metrics_at(ts(10)).domain_stats["x.com"].access_count, 1);
    agg.process_metrics_at(report("a", 0, 11, &[("x.com", 2)]), ts(11));
    assert_eq!(agg.cumulative_metrics_at(ts(11)).domain_stats["x.com"].access_count, 2);
}

#[test]
fn test_recompute_cleanup_and_not_found() {
    let agg = aggregator();
    agg.process_metrics_at(report("a", 0, 0, &[("a-only.com", 1)]), ts(0));
    agg.process_metrics_at(report("b", 0, 500, &[("b-only.com", 1)]), ts(500));

    let removed = agg.cleanup_expired_data_at(Duration::from_secs(600), ts(700));
    assert_eq!(removed, vec!["a".to_string()]);
    let cumulative = agg.cumulative_metrics_at(ts(700));
    assert!(!cumulative.domain_stats.contains_key("a-only.com"));
    assert_eq!(cumulative.domain_stats["b-only.com"].access_count, 1);
    assert_eq!(agg.agents().len(), 1);
    assert_eq!(agg.stats_at(ts(700)).agents, 1);
}

#[test]
fn test_build_selects_strategy() {
    let config = AggregationConfig {
        strategy: AggregationStrategy::Recompute,
        ..Default::default()
    };
    let agg = build(&config);
    agg.process_metrics(report("a", 0, 10, &[("x.com", 2)]));
    assert_eq!(agg.domain_metrics("x.com").unwrap().access_count, 2);

    let agg = build(&AggregationConfig::default());
    agg.process_metrics(report("a", 0, 10, &[("x.com", 3)]));
    assert_eq!(agg.domain_metrics("x.com").unwrap().access_count, 3);
}

#[test]
fn test_recompute_cached_view_follows_liveness_at_query_time() {
    let agg = aggregator();
    agg.process_metrics_at(report("a", 0, 0, &[("x.com", 4)]), ts(0));
    agg.process_metrics_at(report("b", 0, 250, &[("x.com", 6)]), ts(250));

    let both = agg.cumulative_metrics_at(ts(260));
    assert_eq!(both.domain_stats["x.com"].access_count, 10);
    assert_eq!(both.data_sources, vec!["a".to_string(), "b".to_string()]);

    // "a" is past the 300s timeout here; the view cached at ts(260) must not be reused.
    let only_b = agg.cumulative_metrics_at(ts(400));
    assert_eq!(only_b.data_sources, vec!["b".to_string()]);
    assert_eq!(only_b.domain_stats["x.com"].access_count, 6);
    assert_eq!(only_b.system_stats.total_connections, 6);

    assert_eq!(agg.cumulative_metrics_at(ts(260)).domain_stats["x.com"].access_count, 10);
    assert_eq!(agg.stats_at(ts(400)).active_agents, 1);
}
