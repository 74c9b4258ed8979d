//! Scheduler behavior through the public API with mock correctors.

use quill_batch::BatchScheduler;
use quill_core::{QuillError, SchedulerConfig};
use quill_test_utils::fixtures::fast_scheduler_config;
use quill_test_utils::{CallbackRecorder, FailingCorrector, StaticCorrector};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

/// Config that never dispatches on its own until `stop`.
fn held_config() -> SchedulerConfig {
    SchedulerConfig {
        min_batch_items: 1_000,
        max_delay: Duration::from_secs(600),
        idle_wait: Duration::from_secs(600),
        ..fast_scheduler_config()
    }
}

#[tokio::test]
async fn test_higher_priority_dispatched_first() {
    let corrector = Arc::new(StaticCorrector::new());
    let scheduler = BatchScheduler::start(
        SchedulerConfig {
            batch_size: 1,
            ..held_config()
        },
        corrector.clone(),
    );
    let order = Arc::new(Mutex::new(Vec::new()));

    for (word, priority) in [("one", 1), ("three", 3), ("two", 2)] {
        let order = Arc::clone(&order);
        scheduler
            .submit(word, word, move |text, _| order.lock().unwrap().push(text), priority)
            .unwrap();
    }
    scheduler.stop().await;

    assert_eq!(*order.lock().unwrap(), vec!["three", "two", "one"]);
    assert_eq!(scheduler.stats().batches_processed, 3);
}

#[tokio::test]
async fn test_delivers_corrections_in_background() {
    let corrector = Arc::new(
        StaticCorrector::new()
            .with_correction("qe", "que")
            .with_correction("kiero", "quiero"),
    );
    let scheduler = BatchScheduler::start(fast_scheduler_config(), corrector);
    let recorder = CallbackRecorder::new();

    scheduler.submit("qe", "creo qe esto", recorder.callback("qe"), 2).unwrap();
    scheduler.submit("kiero", "kiero ir", recorder.callback("kiero"), 1).unwrap();

    assert!(recorder.wait_for(2, WAIT).await);
    assert_eq!(recorder.get("qe"), Some(("que".to_string(), true)));
    assert_eq!(recorder.get("kiero"), Some(("quiero".to_string(), true)));
    scheduler.stop().await;
}

#[tokio::test]
async fn test_group_uses_combined_context() {
    let corrector = Arc::new(StaticCorrector::new());
    let scheduler = BatchScheduler::start(held_config(), corrector.clone());

    scheduler.submit("qe", "creo qe esto es", |_, _| {}, 1).unwrap();
    scheduler.submit("bien", "creo qe esto va bien", |_, _| {}, 1).unwrap();
    scheduler.stop().await;

    let calls = corrector.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls
        .iter()
        .all(|(_, context)| context == "creo qe esto es creo qe esto va bien"));
}

#[tokio::test]
async fn test_failed_group_gets_identity_others_unaffected() {
    let scheduler = BatchScheduler::start(
        held_config(),
        Arc::new(
            FailingCorrector::failing_on(&["roto"])
                .with_correction("vecino", "VECINO")
                .with_correction("sano", "SANO"),
        ),
    );
    let recorder = CallbackRecorder::new();

    scheduler.submit("roto", "grupo uno aqui", recorder.callback("roto"), 1).unwrap();
    scheduler.submit("vecino", "grupo uno aqui", recorder.callback("vecino"), 1).unwrap();
    scheduler.submit("sano", "otro grupo distinto", recorder.callback("sano"), 1).unwrap();
    scheduler.stop().await;

    assert_eq!(recorder.len(), 3);
    assert_eq!(recorder.get("roto"), Some(("roto".to_string(), false)));
    // Same group as the failure: its correction is discarded
    assert_eq!(recorder.get("vecino"), Some(("vecino".to_string(), false)));
    // Separate group still gets the corrector's answer
    assert_eq!(recorder.get("sano"), Some(("SANO".to_string(), true)));
    assert_eq!(scheduler.stats().group_failures, 1);
}

#[tokio::test]
async fn test_every_group_failing_still_delivers_identity() {
    let scheduler = BatchScheduler::start(held_config(), Arc::new(FailingCorrector::always()));
    let recorder = CallbackRecorder::new();

    scheduler.submit("qe", "primer grupo", recorder.callback("qe"), 1).unwrap();
    scheduler.submit("kiero", "segundo grupo", recorder.callback("kiero"), 1).unwrap();
    scheduler.submit("voi", "tercer grupo", recorder.callback("voi"), 1).unwrap();
    scheduler.stop().await;

    assert_eq!(recorder.len(), 3);
    for word in ["qe", "kiero", "voi"] {
        assert_eq!(recorder.get(word), Some((word.to_string(), false)));
    }
    let stats = scheduler.stats();
    assert_eq!(stats.group_failures, 3);
    assert_eq!(stats.tasks_delivered, 3);
}

#[tokio::test]
async fn test_panicking_corrector_is_isolated() {
    let scheduler = BatchScheduler::start(
        fast_scheduler_config(),
        Arc::new(FailingCorrector::panicking_on(&["boom"])),
    );
    let recorder = CallbackRecorder::new();

    scheduler.submit("boom", "uno dos tres", recorder.callback("boom"), 1).unwrap();
    scheduler.submit("calma", "cuatro cinco seis", recorder.callback("calma"), 1).unwrap();

    assert!(recorder.wait_for(2, WAIT).await);
    assert_eq!(recorder.get("boom"), Some(("boom".to_string(), false)));
    assert_eq!(recorder.get("calma"), Some(("calma".to_string(), false)));
    assert!(scheduler.is_running());

    scheduler.submit("luego", "siete", recorder.callback("luego"), 1).unwrap();
    assert!(recorder.wait_for(3, WAIT).await);
    scheduler.stop().await;
}

#[tokio::test]
async fn test_panicking_callback_does_not_stop_worker() {
    let scheduler = BatchScheduler::start(fast_scheduler_config(), Arc::new(StaticCorrector::new()));
    let recorder = CallbackRecorder::new();

    scheduler
        .submit("a", "ctx", |_, _| panic!("callback failure"), 1)
        .unwrap();
    scheduler.submit("b", "ctx", recorder.callback("b"), 1).unwrap();

    assert!(recorder.wait_for(1, WAIT).await);
    assert!(scheduler.is_running());
    scheduler.stop().await;
}

#[tokio::test]
async fn test_cancelled_task_gets_original_word() {
    let corrector = Arc::new(StaticCorrector::new().with_correction("qe", "que"));
    let scheduler = BatchScheduler::start(held_config(), corrector.clone());
    let recorder = CallbackRecorder::new();

    let handle = scheduler.submit("qe", "creo qe", recorder.callback("qe"), 1).unwrap();
    handle.cancel();
    scheduler.stop().await;

    assert_eq!(recorder.get("qe"), Some(("qe".to_string(), false)));
    assert!(corrector.calls().is_empty());
}

#[tokio::test]
async fn test_submit_after_stop_is_rejected() {
    let scheduler = BatchScheduler::start(fast_scheduler_config(), Arc::new(StaticCorrector::new()));
    scheduler.stop().await;

    let called = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&called);
    let result = scheduler.submit("tarde", "ctx", move |_, _| *flag.lock().unwrap() = true, 1);

    assert!(matches!(result, Err(QuillError::ShutdownInProgress)));
    assert!(!scheduler.is_running());
    assert!(!*called.lock().unwrap());
}

#[tokio::test]
async fn test_stop_flushes_pending_tasks() {
    let scheduler = BatchScheduler::start(held_config(), Arc::new(StaticCorrector::new()));
    let recorder = CallbackRecorder::new();

    for i in 0..25 {
        scheduler
            .submit(format!("w{i}"), "ctx", recorder.callback(format!("w{i}")), 1)
            .unwrap();
    }
    assert_eq!(scheduler.stats().pending_tasks, 25);

    scheduler.stop().await;

    let stats = scheduler.stats();
    assert_eq!(recorder.len(), 25);
    assert_eq!(stats.pending_tasks, 0);
    assert_eq!(stats.tasks_delivered, 25);
    assert_eq!(stats.batches_processed, 3);
}

#[tokio::test]
async fn test_concurrent_stop_waits_for_flush() {
    let corrector = Arc::new(StaticCorrector::new().with_delay(Duration::from_millis(20)));
    let scheduler = BatchScheduler::start(
        SchedulerConfig {
            batch_size: 1,
            ..held_config()
        },
        corrector,
    );
    let order = Arc::new(Mutex::new(Vec::new()));

    for (word, priority) in [("uno", 1), ("cinco", 5), ("tres", 3), ("dos", 2), ("cuatro", 4)] {
        let order = Arc::clone(&order);
        scheduler
            .submit(word, word, move |text, _| order.lock().unwrap().push(text), priority)
            .unwrap();
    }

    let (_, delivered_when_second_returned) = tokio::join!(scheduler.stop(), async {
        scheduler.stop().await;
        order.lock().unwrap().len()
    });

    assert_eq!(delivered_when_second_returned, 5);
    assert_eq!(
        *order.lock().unwrap(),
        vec!["cinco", "cuatro", "tres", "dos", "uno"]
    );
    assert_eq!(scheduler.stats().batches_processed, 5);
}

#[tokio::test]
async fn test_dropped_scheduler_still_delivers() {
    let recorder = CallbackRecorder::new();
    {
        let scheduler = BatchScheduler::start(held_config(), Arc::new(StaticCorrector::new()));
        scheduler.submit("a", "ctx", recorder.callback("a"), 1).unwrap();
    }
    assert!(recorder.wait_for(1, WAIT).await);
}

#[tokio::test]
async fn test_priority_is_clamped() {
    let scheduler = BatchScheduler::start(held_config(), Arc::new(StaticCorrector::new()));
    let order = Arc::new(Mutex::new(Vec::new()));

    for (word, priority) in [("low", 0u8), ("high", 200u8), ("max", 5u8)] {
        let order = Arc::clone(&order);
        scheduler
            .submit(word, "ctx", move |text, _| order.lock().unwrap().push(text), priority)
            .unwrap();
    }
    scheduler.stop().await;

    // "high" clamps to 5 and ties with "max"; submission order breaks the tie
    assert_eq!(*order.lock().unwrap(), vec!["high", "max", "low"]);
}

mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use quill_batch::{Batch, CorrectionTask};
    use quill_core::ContextGrouping;
    use quill_test_utils::generators::{arb_context, arb_submissions, arb_word};
    use std::time::Instant;

    fn tasks_in(words: &[String], context: &str) -> Vec<CorrectionTask> {
        words
            .iter()
            .enumerate()
            .map(|(seq, word)| {
                CorrectionTask::new(
                    word.clone(),
                    context.to_string(),
                    1,
                    seq as u64,
                    Instant::now(),
                    Box::new(|_, _| {}),
                )
            })
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_every_task_delivered_exactly_once(submissions in arb_submissions(40)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let scheduler = BatchScheduler::start(
                    fast_scheduler_config(),
                    Arc::new(StaticCorrector::new()),
                );
                let recorder = CallbackRecorder::new();
                for (i, (priority, word)) in submissions.iter().enumerate() {
                    scheduler
                        .submit(word.clone(), "ctx", recorder.callback(i.to_string()), *priority)
                        .unwrap();
                }
                scheduler.stop().await;

                let mut tags: Vec<usize> = recorder
                    .deliveries()
                    .iter()
                    .map(|d| d.tag.parse().unwrap())
                    .collect();
                tags.sort_unstable();
                assert_eq!(tags, (0..submissions.len()).collect::<Vec<_>>());
            });
        }

        #[test]
        fn prop_shared_context_forms_one_group(
            context in arb_context(),
            words in prop::collection::vec(arb_word(), 1..12),
        ) {
            for grouping in [ContextGrouping::default(), ContextGrouping::Exact] {
                let batch = Batch::new(1, tasks_in(&words, &context));
                let groups = batch.into_groups(&grouping);
                prop_assert_eq!(groups.len(), 1);
                prop_assert_eq!(groups[0].combined_context(), context.clone());
                prop_assert_eq!(groups[0].tasks.len(), words.len());
            }

            let groups = Batch::new(2, tasks_in(&words, &context))
                .into_groups(&ContextGrouping::PerTask);
            prop_assert_eq!(groups.len(), words.len());
        }
    }
}
