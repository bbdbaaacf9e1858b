//! Integration tests for the registry, driven deterministically: a manual
//! clock, a hand-polled registry, and an inline dispatcher so deliveries
//! land synchronously inside `poll`.

use std::sync::{Arc, Mutex};

use serde_json::json;
use tickloop_core::{
    Clock, DoneHandler, Event, EventSink, InlineDispatcher, ManualClock, MemorySink, TickHandler,
    TimerRegistry, TimerSpec,
};

fn manual_registry() -> (TimerRegistry, Arc<ManualClock>, Arc<MemorySink>) {
    let clock = Arc::new(ManualClock::new());
    let sink = Arc::new(MemorySink::new());
    let registry = TimerRegistry::builder(Arc::new(InlineDispatcher))
        .clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .sink(Arc::clone(&sink) as Arc<dyn EventSink>)
        .manual()
        .build()
        .unwrap();
    (registry, clock, sink)
}

/// Tick handler appending `tick:<runs>` to a shared log.
fn log_ticks(log: &Arc<Mutex<Vec<String>>>) -> TickHandler {
    let log = Arc::clone(log);
    Box::new(move |_id, runs, _param| log.lock().unwrap().push(format!("tick:{runs}")))
}

/// Completion handler appending `done` to a shared log.
fn log_done(log: &Arc<Mutex<Vec<String>>>) -> DoneHandler {
    let log = Arc::clone(log);
    Box::new(move |_id, _param| log.lock().unwrap().push("done".into()))
}

fn entries(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[test]
fn batched_exhaustion_completes_in_one_pass() {
    let (registry, clock, _) = manual_registry();
    let log = Arc::new(Mutex::new(Vec::new()));
    registry
        .schedule(
            "t1",
            TimerSpec::every(100).times(3),
            Some(log_ticks(&log)),
            Some(log_done(&log)),
        )
        .unwrap();

    clock.advance(350);
    registry.poll();

    assert_eq!(entries(&log), vec!["tick:3", "done"]);
    assert!(!registry.contains("t1"));
}

#[test]
fn forever_timer_ticks_without_completing() {
    let (registry, clock, _) = manual_registry();
    let log = Arc::new(Mutex::new(Vec::new()));
    registry
        .schedule(
            "beat",
            TimerSpec::every(50),
            Some(log_ticks(&log)),
            Some(log_done(&log)),
        )
        .unwrap();

    for _ in 0..5 {
        clock.advance(100);
        registry.poll();
    }

    assert_eq!(entries(&log), vec!["tick:2"; 5]);
    assert!(registry.contains("beat"));
}

#[test]
fn paused_timer_skips_elapsed_time() {
    let (registry, clock, _) = manual_registry();
    let log = Arc::new(Mutex::new(Vec::new()));
    registry
        .schedule("t2", TimerSpec::every(100), Some(log_ticks(&log)), None)
        .unwrap();

    assert!(registry.pause("t2"));
    clock.advance(1000);
    registry.poll();
    assert!(entries(&log).is_empty());

    assert!(registry.resume("t2"));
    clock.advance(100);
    registry.poll();
    assert_eq!(entries(&log), vec!["tick:1"]);
}

#[test]
fn cancel_is_idempotent_and_fires_once() {
    let (registry, _, _) = manual_registry();
    let log = Arc::new(Mutex::new(Vec::new()));
    registry
        .schedule("x", TimerSpec::every(100), None, Some(log_done(&log)))
        .unwrap();

    assert!(registry.cancel("x", true));
    assert!(!registry.cancel("x", true));
    assert_eq!(entries(&log), vec!["done"]);
}

#[test]
fn cancel_without_flag_suppresses_completion() {
    let (registry, _, _) = manual_registry();
    let log = Arc::new(Mutex::new(Vec::new()));
    registry
        .schedule("x", TimerSpec::every(100), None, Some(log_done(&log)))
        .unwrap();

    assert!(registry.cancel("x", false));
    assert!(entries(&log).is_empty());
}

#[test]
fn rescheduling_an_id_supersedes_the_live_timer() {
    let (registry, clock, sink) = manual_registry();
    let first_done = Arc::new(Mutex::new(Vec::new()));
    let second_ticks = Arc::new(Mutex::new(Vec::new()));

    registry
        .schedule(
            "dup",
            TimerSpec::every(100).times(10),
            None,
            Some(log_done(&first_done)),
        )
        .unwrap();
    clock.advance(70);

    registry
        .schedule("dup", TimerSpec::every(100), Some(log_ticks(&second_ticks)), None)
        .unwrap();

    // The implicit stop fired the first timer's completion exactly once.
    assert_eq!(entries(&first_done), vec!["done"]);
    assert!(sink
        .snapshot()
        .iter()
        .any(|e| matches!(e, Event::TimerReplaced { id, .. } if id == "dup")));
    assert_eq!(registry.len(), 1);

    // The replacement's window starts fresh; the first 70ms do not count.
    clock.advance(100);
    registry.poll();
    assert_eq!(entries(&second_ticks), vec!["tick:1"]);
}

#[test]
fn priming_tick_is_outside_the_budget() {
    let (registry, clock, _) = manual_registry();
    let log = Arc::new(Mutex::new(Vec::new()));
    registry
        .schedule(
            "primed",
            TimerSpec::every(100).times(2).fire_immediately(),
            Some(log_ticks(&log)),
            Some(log_done(&log)),
        )
        .unwrap();

    // Priming delivery happens at registration.
    assert_eq!(entries(&log), vec!["tick:1"]);

    clock.advance(100);
    registry.poll();
    clock.advance(100);
    registry.poll();

    assert_eq!(entries(&log), vec!["tick:1", "tick:1", "tick:1", "done"]);
    assert!(!registry.contains("primed"));
}

#[test]
fn panicking_callback_does_not_stall_other_timers() {
    let (registry, clock, sink) = manual_registry();
    let log = Arc::new(Mutex::new(Vec::new()));

    let bad: TickHandler = Box::new(|_id, _runs, _param| panic!("misbehaving callback"));
    registry
        .schedule("bad", TimerSpec::every(100), Some(bad), None)
        .unwrap();
    registry
        .schedule("good", TimerSpec::every(100), Some(log_ticks(&log)), None)
        .unwrap();

    clock.advance(100);
    registry.poll();
    clock.advance(100);
    registry.poll();

    assert_eq!(entries(&log), vec!["tick:1", "tick:1"]);
    assert!(registry.contains("bad"));
    let panics = sink
        .snapshot()
        .iter()
        .filter(|e| matches!(e, Event::CallbackPanicked { id, .. } if id == "bad"))
        .count();
    assert_eq!(panics, 2);
}

#[test]
fn backward_clock_restarts_the_window_and_reports() {
    let (registry, clock, sink) = manual_registry();
    let log = Arc::new(Mutex::new(Vec::new()));

    clock.set(500);
    registry
        .schedule("t", TimerSpec::every(100), Some(log_ticks(&log)), None)
        .unwrap();

    clock.set(300);
    registry.poll();
    assert!(entries(&log).is_empty());
    assert!(sink
        .snapshot()
        .iter()
        .any(|e| matches!(e, Event::ClockRegressed { id, .. } if id == "t")));

    // The window restarted at 300.
    clock.set(400);
    registry.poll();
    assert_eq!(entries(&log), vec!["tick:1"]);
}

#[test]
fn cancel_all_drains_every_timer() {
    let (registry, _, sink) = manual_registry();
    let log = Arc::new(Mutex::new(Vec::new()));
    for id in ["a", "b", "c"] {
        registry
            .schedule(id, TimerSpec::every(100), None, Some(log_done(&log)))
            .unwrap();
    }

    assert_eq!(registry.cancel_all(true), 3);
    assert!(registry.is_empty());
    assert_eq!(entries(&log), vec!["done"; 3]);
    assert!(sink
        .snapshot()
        .iter()
        .any(|e| matches!(e, Event::RegistryDrained { cancelled: 3, .. })));
}

#[test]
fn run_once_fires_completion_after_the_delay() {
    let (registry, clock, _) = manual_registry();
    let log = Arc::new(Mutex::new(Vec::new()));
    registry.run_once("later", 200, log_done(&log)).unwrap();

    clock.advance(199);
    registry.poll();
    assert!(entries(&log).is_empty());

    clock.advance(1);
    registry.poll();
    assert_eq!(entries(&log), vec!["done"]);
    assert!(!registry.contains("later"));
}

#[test]
fn run_loop_keeps_ticking() {
    let (registry, clock, _) = manual_registry();
    let log = Arc::new(Mutex::new(Vec::new()));
    registry.run_loop("pulse", 50, log_ticks(&log)).unwrap();

    for _ in 0..3 {
        clock.advance(50);
        registry.poll();
    }
    assert_eq!(entries(&log), vec!["tick:1"; 3]);
    assert!(registry.contains("pulse"));
}

#[test]
fn set_interval_takes_effect_on_the_next_pass() {
    let (registry, clock, _) = manual_registry();
    let log = Arc::new(Mutex::new(Vec::new()));
    registry
        .schedule("slow", TimerSpec::every(10_000), Some(log_ticks(&log)), None)
        .unwrap();

    registry.set_interval("slow", 100).unwrap();
    clock.advance(100);
    registry.poll();
    assert_eq!(entries(&log), vec!["tick:1"]);
}

#[test]
fn param_carries_state_between_ticks_and_completion() {
    let (registry, clock, _) = manual_registry();
    let observed = Arc::new(Mutex::new(Vec::new()));

    let tick_observed = Arc::clone(&observed);
    let on_tick: TickHandler = Box::new(move |_id, _runs, param| {
        let on = param["on"].as_bool().unwrap();
        tick_observed.lock().unwrap().push(format!("tick on={on}"));
        param["on"] = json!(!on);
    });
    let done_observed = Arc::clone(&observed);
    let on_done: DoneHandler = Box::new(move |_id, param| {
        let on = param["on"].as_bool().unwrap();
        done_observed.lock().unwrap().push(format!("done on={on}"));
    });

    registry
        .schedule(
            "toggle",
            TimerSpec::every(100).times(2).with_param(json!({ "on": false })),
            Some(on_tick),
            Some(on_done),
        )
        .unwrap();

    clock.advance(100);
    registry.poll();
    clock.advance(100);
    registry.poll();

    assert_eq!(
        *observed.lock().unwrap(),
        vec!["tick on=false", "tick on=true", "done on=false"]
    );
}

#[test]
fn lifecycle_events_are_published_in_order() {
    let (registry, clock, sink) = manual_registry();
    registry
        .schedule("evt", TimerSpec::every(100).times(1), None, None)
        .unwrap();
    clock.advance(100);
    registry.poll();

    let events = sink.snapshot();
    let scheduled = events
        .iter()
        .position(|e| matches!(e, Event::TimerScheduled { id, .. } if id == "evt"));
    let exhausted = events
        .iter()
        .position(|e| matches!(e, Event::TimerExhausted { id, ticks: 1, .. } if id == "evt"));
    assert!(scheduled.is_some());
    assert!(exhausted.is_some());
    assert!(scheduled < exhausted);
}

#[test]
fn independent_registries_do_not_interfere() {
    let (first, first_clock, _) = manual_registry();
    let (second, _, _) = manual_registry();
    let log = Arc::new(Mutex::new(Vec::new()));

    first
        .schedule("shared-id", TimerSpec::every(100), Some(log_ticks(&log)), None)
        .unwrap();
    second
        .schedule("shared-id", TimerSpec::every(100), None, None)
        .unwrap();

    first_clock.advance(100);
    first.poll();
    second.poll();

    assert_eq!(entries(&log), vec!["tick:1"]);
    assert!(first.contains("shared-id"));
    assert!(second.contains("shared-id"));
}
