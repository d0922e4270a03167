//! Handle lifecycle over whole runs: every handle is released exactly once,
//! in reverse creation order, after the queue has been flushed and finished,
//! and never while a queued command still uses it.

use cl_demos::{
    backend::{
        mock::{Event, HandleKind},
        MockBackend,
    },
    config::VecAddConfig,
    hello::run_hello_source,
    vecadd::run_vecadd,
    Error,
};

const HELLO_SRC: &str = include_str!("../main.cl");

fn created(journal: &[Event]) -> Vec<(HandleKind, u64)> {
    journal
        .iter()
        .filter_map(|ev| match *ev {
            Event::Created(kind, id) => Some((kind, id)),
            _ => None,
        })
        .collect()
}

fn released(journal: &[Event]) -> Vec<(HandleKind, u64)> {
    journal
        .iter()
        .filter_map(|ev| match *ev {
            Event::Released(kind, id) => Some((kind, id)),
            _ => None,
        })
        .collect()
}

fn assert_clean_teardown(mock: &MockBackend) {
    let journal = mock.journal();
    let mut expected = created(&journal);
    expected.reverse();
    assert_eq!(released(&journal), expected);
    assert_eq!(mock.live_handles(), 0);
    assert_eq!(mock.pending_commands(), 0);
    assert!(mock.violations().is_empty(), "{:?}", mock.violations());
}

fn position(journal: &[Event], pred: impl Fn(&Event) -> bool) -> usize {
    journal.iter().position(pred).expect("event not found")
}

#[test]
fn vecadd_release_order() {
    let mock = MockBackend::new();
    run_vecadd(&mock, &VecAddConfig::default()).unwrap();
    assert_clean_teardown(&mock);

    let kinds: Vec<_> = released(&mock.journal()).into_iter().map(|(k, _)| k).collect();
    use HandleKind::*;
    assert_eq!(kinds, [Kernel, Program, Mem, Mem, Mem, Queue, Context]);
}

#[test]
fn hello_release_order() {
    let mock = MockBackend::new();
    run_hello_source(&mock, HELLO_SRC, 128).unwrap();
    assert_clean_teardown(&mock);

    let kinds: Vec<_> = released(&mock.journal()).into_iter().map(|(k, _)| k).collect();
    use HandleKind::*;
    assert_eq!(kinds, [Kernel, Program, Mem, Queue, Context]);
}

#[test]
fn flush_and_finish_precede_release() {
    let mock = MockBackend::new();
    run_vecadd(&mock, &VecAddConfig { elements: 64 }).unwrap();
    let journal = mock.journal();
    let read = position(&journal, |ev| *ev == Event::Call("clEnqueueReadBuffer"));
    let launch = position(&journal, |ev| *ev == Event::Call("clEnqueueNDRangeKernel"));
    let flush = position(&journal, |ev| *ev == Event::Call("clFlush"));
    let finish = position(&journal, |ev| *ev == Event::Call("clFinish"));
    let first_release = position(&journal, |ev| matches!(ev, Event::Released(..)));
    assert!(launch < read);
    assert!(read < flush);
    assert!(flush < finish);
    assert!(finish < first_release);
}

#[test]
fn failures_still_release_everything() {
    const OPS: &[&str] = &[
        "clCreateContext",
        "clCreateCommandQueue",
        "clCreateBuffer",
        "clCreateProgramWithSource",
        "clBuildProgram",
        "clCreateKernel",
        "clSetKernelArg",
        "clEnqueueWriteBuffer",
        "clEnqueueNDRangeKernel",
        "clEnqueueReadBuffer",
        "clFlush",
        "clFinish",
    ];
    for &failing in OPS {
        let mock = MockBackend::new().failing_on(failing);
        match run_vecadd(&mock, &VecAddConfig { elements: 32 }) {
            Err(Error::Api { op, .. }) => assert_eq!(op, failing),
            other => panic!("{}: unexpected {:?}", failing, other),
        }
        assert_clean_teardown(&mock);
    }
}

#[test]
fn failed_launch_drains_pending_writes_before_release() {
    let mock = MockBackend::new().failing_on("clEnqueueNDRangeKernel");
    assert!(run_vecadd(&mock, &VecAddConfig { elements: 8 }).is_err());
    let journal = mock.journal();
    let launch = position(&journal, |ev| *ev == Event::Call("clEnqueueNDRangeKernel"));
    let finish = position(&journal, |ev| *ev == Event::Call("clFinish"));
    let first_release = position(&journal, |ev| matches!(ev, Event::Released(..)));
    assert!(launch < finish && finish < first_release);
    assert_clean_teardown(&mock);
}
