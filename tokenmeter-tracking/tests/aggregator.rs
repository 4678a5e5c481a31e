use tokenmeter_tracking::{
    generate_session_id, ModelIdentity, OwnerContext, UsageAggregator, UsageSample,
    UsageTotals, DEFAULT_MAX_HISTORY,
};

fn aggregator() -> UsageAggregator {
    UsageAggregator::new(OwnerContext::new("wf", "node"))
}

#[test]
fn record_creates_session_on_first_use() {
    let aggregator = aggregator();
    assert!(aggregator.get_session("s").is_none());

    let session = aggregator.record_usage("s", UsageSample::new(5, 7));
    assert_eq!(session.session_id, "s");
    assert_eq!(session.owner, OwnerContext::new("wf", "node"));
    assert_eq!(session.metadata.sample_count, 1);
    assert_eq!(session.history.len(), 1);
    assert_eq!(
        session.totals,
        UsageTotals {
            input_tokens: 5,
            output_tokens: 7,
            total_tokens: 12
        }
    );
    assert_eq!(aggregator.get_session("s"), Some(session));
}

#[test]
fn totals_default_to_sum_and_respect_explicit_total() {
    let aggregator = aggregator();
    aggregator.record_usage("s", UsageSample::new(10, 20));
    let session = aggregator.record_usage("s", UsageSample::new(1, 1).with_total(5));

    assert_eq!(session.totals.total_tokens, 35);
    assert_eq!(session.totals.input_tokens, 11);
    assert_eq!(session.totals.output_tokens, 21);
}

#[test]
fn history_is_bounded_but_totals_are_not() {
    let aggregator = UsageAggregator::with_max_history(OwnerContext::new("wf", "node"), 3);
    let mut last = None;
    for i in 0..5u64 {
        last = Some(aggregator.record_usage("s", UsageSample::new(i, 1)));
    }
    let session = last.unwrap();

    let retained: Vec<u64> = session.history.iter().map(|s| s.input_tokens).collect();
    assert_eq!(retained, vec![2, 3, 4]);
    assert_eq!(session.metadata.sample_count, 5);
    assert_eq!(session.totals.input_tokens, 10);
    assert_eq!(session.totals.output_tokens, 5);
    assert_eq!(session.totals.total_tokens, 15);
}

#[test]
fn default_bound_keeps_last_hundred_samples() {
    let aggregator = aggregator();
    for i in 0..(DEFAULT_MAX_HISTORY as u64 + 7) {
        aggregator.record_usage("s", UsageSample::new(i, 0));
    }
    let session = aggregator.get_session("s").unwrap();

    assert_eq!(session.history.len(), DEFAULT_MAX_HISTORY);
    assert_eq!(session.history.front().unwrap().input_tokens, 7);
    assert_eq!(
        session.history.back().unwrap().input_tokens,
        DEFAULT_MAX_HISTORY as u64 + 6
    );
}

#[test]
fn clear_session_reports_whether_it_existed() {
    let aggregator = aggregator();
    assert!(!aggregator.clear_session("missing"));

    aggregator.record_usage("s", UsageSample::new(1, 1));
    assert!(aggregator.clear_session("s"));
    assert!(aggregator.get_session("s").is_none());
    assert!(!aggregator.clear_session("s"));
}

#[test]
fn summary_folds_over_live_sessions() {
    let aggregator = aggregator();
    aggregator.record_usage("a", UsageSample::new(10, 5));
    aggregator.record_usage("a", UsageSample::new(1, 1));
    aggregator.record_usage("b", UsageSample::new(100, 50));

    let summary = aggregator.summary();
    assert_eq!(summary.total_sessions, 2);
    assert_eq!(summary.total_input_tokens, 111);
    assert_eq!(summary.total_output_tokens, 56);
    assert_eq!(summary.total_tokens, 167);

    aggregator.clear_session("b");
    assert_eq!(aggregator.summary().total_tokens, 17);
}

#[test]
fn report_averages_over_sample_count() {
    let aggregator = aggregator();
    aggregator.record_usage("S", UsageSample::new(50, 10));
    aggregator.record_usage("S", UsageSample::failed(&ModelIdentity::unknown()));

    let report = aggregator.report("S").unwrap();
    assert_eq!(report.summary.execution_count, 2);
    assert_eq!(report.session.totals.total_tokens, 60);
    assert_eq!(report.summary.avg_input_tokens, 25.0);
    assert_eq!(report.summary.avg_output_tokens, 5.0);
    assert_eq!(report.summary.avg_total_tokens, 30.0);
    assert!(report.summary.total_duration_ms >= 0);
}

#[test]
fn report_for_missing_session_is_none() {
    assert!(aggregator().report("nope").is_none());
}

#[test]
fn export_and_import_round_trip_sessions() {
    let source = aggregator();
    source.record_usage("a", UsageSample::new(3, 4));
    source.record_usage("b", UsageSample::new(1, 2));

    assert_eq!(source.export_sessions(Some("a")).len(), 1);
    assert!(source.export_sessions(Some("zzz")).is_empty());

    let target = aggregator();
    target.import_sessions(source.export_sessions(None));
    assert_eq!(target.session_count(), 2);
    assert_eq!(target.get_session("a"), source.get_session("a"));

    target.clear_all();
    assert_eq!(target.session_count(), 0);
}

#[test]
fn session_ids_embed_owner_and_execution() {
    let id = generate_session_id("wf-1", "Tracker", Some("exec-9"));
    assert!(id.starts_with("wf-1-Tracker-"));
    assert!(id.ends_with("-exec-9"));

    let plain = aggregator().generate_session_id(None);
    assert!(plain.starts_with("wf-node-"));
    assert_ne!(plain, aggregator().generate_session_id(None));
}

#[test]
fn failed_sample_is_zero_but_counted() {
    let identity = ModelIdentity::unknown();
    let sample = UsageSample::failed(&identity);
    assert_eq!(sample.input_tokens, 0);
    assert_eq!(sample.total_tokens, 0);
    assert_eq!(sample.provider.as_deref(), Some("unknown"));
    assert_eq!(sample.model_name.as_deref(), Some("unknown"));

    let aggregator = aggregator();
    let session = aggregator.record_usage("s", sample);
    assert_eq!(session.metadata.sample_count, 1);
    assert_eq!(session.totals, UsageTotals::default());
}

#[test]
fn totals_saturate_at_the_numeric_limit() {
    let aggregator = aggregator();
    aggregator.record_usage("S", UsageSample::new(u64::MAX - 1, 0));
    let session = aggregator.record_usage("S", UsageSample::new(5, 0));

    assert_eq!(session.metadata.sample_count, 2);
    assert_eq!(session.totals.input_tokens, u64::MAX);
    assert_eq!(session.totals.total_tokens, u64::MAX);

    aggregator.record_usage("T", UsageSample::new(10, 0));
    let summary = aggregator.summary();
    assert_eq!(summary.total_sessions, 2);
    assert_eq!(summary.total_input_tokens, u64::MAX);
}

#[test]
fn merge_folds_totals() {
    let mut totals = UsageTotals::default();
    totals.merge(&UsageTotals {
        input_tokens: 3,
        output_tokens: 4,
        total_tokens: 7,
    });
    totals.add(&UsageSample::new(1, 1));
    assert_eq!(
        totals,
        UsageTotals {
            input_tokens: 4,
            output_tokens: 5,
            total_tokens: 9
        }
    );
}
