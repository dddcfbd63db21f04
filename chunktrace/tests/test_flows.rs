mod common;

use chunktrace::analysis::analyze_flows;
use chunktrace::{FlowHandle, SessionOptions, TraceEventKind};
use std::thread;
use std::time::Duration;

#[test]
fn test_flow_hops_threads_through_channel() -> anyhow::Result<()> {
    let _lock = common::exclusive();

    chunktrace::start(SessionOptions::default())?;
    let (to_parser, parser_rx) = crossbeam_channel::bounded::<FlowHandle>(1);
    let (to_sink, sink_rx) = crossbeam_channel::bounded::<FlowHandle>(1);

    let parser = thread::spawn(move || {
        let handle = parser_rx.recv().expect("request never arrived");
        handle.step();
        thread::sleep(Duration::from_millis(2));
        to_sink.send(handle).expect("sink hung up");
        chunktrace::current_thread_id()
    });
    let sink = thread::spawn(move || {
        let handle = sink_rx.recv().expect("parsed request never arrived");
        handle.end();
        chunktrace::current_thread_id()
    });

    let origin = chunktrace::current_thread_id();
    to_parser.send(chunktrace::flow_start_new_handle(11))?;
    let parser_id = parser.join().expect("parser panicked");
    let sink_id = sink.join().expect("sink panicked");
    let session = chunktrace::stop()?;

    let flows = analyze_flows(&session, None);
    assert_eq!(flows.len(), 1);

    let flow = &flows[0];
    assert_eq!(flow.id, 11);
    assert_eq!(flow.steps.len(), 2);
    assert_eq!(flow.steps[0].kind, TraceEventKind::FlowStart);
    assert_eq!(flow.steps[1].kind, TraceEventKind::FlowStep);
    assert_eq!(flow.threads(), vec![origin, parser_id]);
    assert!(flow.total_duration_ms >= 2.0);

    let end = session
        .events()
        .find(|e| e.kind == TraceEventKind::FlowEnd)
        .expect("flow end recorded");
    assert_eq!(end.thread_id, sink_id);
    Ok(())
}

#[test]
fn test_flow_crosses_await_points() -> anyhow::Result<()> {
    let _lock = common::exclusive();

    let runtime =
        tokio::runtime::Builder::new_multi_thread().worker_threads(2).enable_all().build()?;

    chunktrace::start(SessionOptions::default())?;
    let flow_ids = runtime.block_on(async {
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let handle = chunktrace::flow(21).into_handle();
            tasks.push(tokio::spawn(async move {
                handle.step();
                tokio::time::sleep(Duration::from_millis(1)).await;
                handle.end();
                handle.flow_id()
            }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.expect("task panicked"));
        }
        ids
    });
    let session = chunktrace::stop()?;

    let flows = analyze_flows(&session, None);
    assert_eq!(flows.len(), 4);

    let mut seen: Vec<i64> = flows.iter().map(|f| f.flow_id).collect();
    seen.sort_unstable();
    let mut expected = flow_ids;
    expected.sort_unstable();
    assert_eq!(seen, expected);
    assert!(flows.iter().all(|f| f.total_duration_ms >= 1.0));

    let top = analyze_flows(&session, Some(1));
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].flow_id, flows[0].flow_id);
    Ok(())
}

#[test]
fn test_external_trace_ids_map_to_stable_flow_ids() -> anyhow::Result<()> {
    let _lock = common::exclusive();

    let trace_id = "4bf92f3577b34da6a3ce929d0e0e4736";
    let flow_id = chunktrace::flow_id_from_trace_id(trace_id);
    assert_eq!(flow_id, chunktrace::flow_id_from_trace_id(trace_id));
    assert!(flow_id > 0);

    chunktrace::start(SessionOptions::default())?;
    chunktrace::flow_start(1, flow_id);
    thread::spawn(move || chunktrace::flow_end(1, flow_id)).join().expect("flow end panicked");
    chunktrace::flow_start(2, chunktrace::NO_FLOW);
    let session = chunktrace::stop()?;

    assert_eq!(session.event_count(), 2);
    let flows = analyze_flows(&session, None);
    assert_eq!(flows.iter().map(|f| f.flow_id).collect::<Vec<_>>(), vec![flow_id]);
    Ok(())
}
