mod common;

use chunktrace::analysis::{analyze, analyze_hotspots, process, ProcessOptions};
use chunktrace::{DictionaryMetadataProvider, OverflowPolicy, SessionOptions};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn test_options_load_from_json() -> anyhow::Result<()> {
    let _lock = common::exclusive();

    let options: SessionOptions = serde_json::from_str(
        r#"{
            "chunk_capacity": 2048,
            "max_total_events": 500,
            "overflow_policy": "drop_oldest",
            "sample_every_n_by_id": { "7": 3 }
        }"#,
    )?;
    assert_eq!(options.chunk_capacity, 2_048);
    assert_eq!(options.max_total_events, 500);
    assert_eq!(options.overflow_policy, OverflowPolicy::DropOldest);
    assert_eq!(options.sample_every_n_by_id.get(&7), Some(&3));
    assert_eq!(options.max_total_chunks, 0);

    chunktrace::start(options)?;
    for _ in 0..9 {
        chunktrace::instant(7);
    }
    let session = chunktrace::stop()?;
    assert_eq!(session.event_count(), 3);
    assert_eq!(session.options().max_total_events, 500);
    Ok(())
}

#[test]
fn test_category_allow_list_filters_capture() -> anyhow::Result<()> {
    let _lock = common::exclusive();

    let metadata = DictionaryMetadataProvider::new()
        .with(1, "read_block", Some("io"))
        .with(2, "hash_block", Some("cpu"))
        .with(3, "flush", Some("io"));

    chunktrace::start(
        SessionOptions::default().with_metadata(Arc::new(metadata)).with_enabled_categories(["io"]),
    )?;
    for id in 1..=4 {
        chunktrace::instant(id);
    }
    let session = chunktrace::stop()?;

    let ids: Vec<i32> = session.events().map(|e| e.id).collect();
    assert_eq!(ids, vec![1, 3]);
    Ok(())
}

#[test]
fn test_captured_scopes_build_call_tree() -> anyhow::Result<()> {
    let _lock = common::exclusive();

    let metadata = DictionaryMetadataProvider::new()
        .with(1, "handle_request", None)
        .with(2, "query", None);
    chunktrace::start(SessionOptions::default().with_metadata(Arc::new(metadata)))?;
    for _ in 0..3 {
        let _request = chunktrace::scope(1);
        {
            let _query = chunktrace::scope(2);
            thread::sleep(Duration::from_millis(2));
        }
        thread::sleep(Duration::from_millis(1));
    }
    let session = chunktrace::stop()?;

    let trace = process(&session, &ProcessOptions::default());
    assert!(trace.anomalies.is_clean());
    assert_eq!(trace.threads.len(), 1);

    let request = trace.threads[0].root.child(1).expect("request node");
    assert_eq!(request.name, "handle_request");
    assert_eq!(request.count, 3);
    let query = request.child(2).expect("query node");
    assert_eq!(query.count, 3);
    assert!(query.inclusive_ms >= 6.0);
    assert!(request.inclusive_ms >= query.inclusive_ms + 3.0);
    assert!((request.exclusive_ms - (request.inclusive_ms - query.inclusive_ms)).abs() < 1e-6);

    let hotspots = analyze_hotspots(&session);
    assert_eq!(hotspots.iter().map(|h| h.id).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(hotspots[1].name, "query");

    let stats = analyze(&session, false);
    assert_eq!(stats.by_total_time[0].id, 1);
    assert_eq!(stats.by_total_time[0].count, 3);
    assert!(stats.by_total_time[1].min_ms >= 2.0);
    Ok(())
}

#[test]
fn test_mismatched_end_reaches_callback() -> anyhow::Result<()> {
    let _lock = common::exclusive();

    let mismatches = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&mismatches);

    chunktrace::start(SessionOptions::default().on_mismatched_end(move |info| {
        sink.lock().expect("mismatch log poisoned").push(info);
    }))?;
    let outer = chunktrace::scope(1);
    let inner = chunktrace::scope(2);
    // Out-of-order drops produce an End for 1 while 2 is innermost.
    drop(outer);
    drop(inner);
    let session = chunktrace::stop()?;

    let lenient = process(&session, &ProcessOptions::default());
    assert_eq!(lenient.anomalies.mismatched_end, 1);

    let strict = process(&session, &ProcessOptions::default().strict());
    assert_eq!(strict.anomalies.mismatched_end, 1);

    let seen = mismatches.lock().expect("mismatch log poisoned");
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|m| m.expected_id == 2 && m.actual_id == 1));
    Ok(())
}

#[test]
fn test_processed_trace_serializes() -> anyhow::Result<()> {
    let _lock = common::exclusive();

    chunktrace::start(SessionOptions::default())?;
    {
        let _scope = chunktrace::scope(5);
    }
    let session = chunktrace::stop()?;

    let trace = process(&session, &ProcessOptions::default().merged());
    let json = serde_json::to_value(&trace)?;
    assert_eq!(json["hotspots"][0]["id"], 5);
    assert_eq!(json["was_overflow"], false);
    Ok(())
}
