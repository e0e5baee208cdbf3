//! Timer scheduling and resource ceilings through the full pipeline.

use std::time::{Duration, Instant};

use jsrun_sandbox::{ExecutionOutcome, SandboxConfig, SandboxExecutor, MIN_HEAP_SIZE};

fn executor() -> SandboxExecutor {
    SandboxExecutor::new(SandboxConfig::default())
}

fn success(output: &str) -> ExecutionOutcome {
    ExecutionOutcome::Success {
        output: output.into(),
    }
}

// --- Timers ---

#[tokio::test]
async fn timeouts_fire_after_synchronous_code_in_due_order() {
    let outcome = executor()
        .execute(
            "setTimeout(() => console.log('late'), 30);\n\
             setTimeout(() => console.log('early'), 5);\n\
             setTimeout(() => console.log('zero'));\n\
             console.log('sync');",
        )
        .await;
    assert_eq!(outcome, success("sync\nzero\nearly\nlate"));
}

#[tokio::test]
async fn equal_delays_fire_in_registration_order() {
    let outcome = executor()
        .execute("for (const n of [1, 2, 3]) { setTimeout(() => console.log(n), 10); }")
        .await;
    assert_eq!(outcome, success("1\n2\n3"));
}

#[tokio::test]
async fn extra_arguments_are_passed_to_the_callback() {
    let outcome = executor()
        .execute("setTimeout((a, b) => console.log(a + b), 0, 40, 2);")
        .await;
    assert_eq!(outcome, success("42"));
}

#[tokio::test]
async fn cleared_timeout_never_fires() {
    let outcome = executor()
        .execute(
            "const id = setTimeout(() => console.log('nope'), 5);\n\
             clearTimeout(id);\n\
             console.log('done');",
        )
        .await;
    assert_eq!(outcome, success("done"));
}

#[tokio::test]
async fn interval_repeats_until_cleared() {
    let outcome = executor()
        .execute(
            "let n = 0;\n\
             const id = setInterval(() => {\n\
               n++;\n\
               console.log(n);\n\
               if (n === 3) clearInterval(id);\n\
             }, 1);",
        )
        .await;
    assert_eq!(outcome, success("1\n2\n3"));
}

#[tokio::test]
async fn nested_timers_are_drained() {
    let outcome = executor()
        .execute("setTimeout(() => { console.log('outer'); setTimeout(() => console.log('inner'), 1); }, 1);")
        .await;
    assert_eq!(outcome, success("outer\ninner"));
}

#[tokio::test]
async fn throwing_timer_callback_is_a_runtime_failure() {
    let outcome = executor()
        .execute("console.log('before');\nsetTimeout(() => { throw new Error('late failure'); }, 0);")
        .await;
    assert_eq!(
        outcome,
        ExecutionOutcome::RuntimeFailure {
            message: "late failure".into(),
            line: None,
        }
    );
}

#[tokio::test]
async fn non_function_timer_callback_is_rejected() {
    let outcome = executor().execute("setTimeout('console.log(1)', 0);").await;
    assert_eq!(
        outcome,
        ExecutionOutcome::RuntimeFailure {
            message: "The \"callback\" argument must be of type function".into(),
            line: None,
        }
    );
}

// --- Resource limits ---

#[tokio::test]
async fn infinite_loop_times_out_without_a_line() {
    let exec = SandboxExecutor::new(SandboxConfig::new(128, 200));
    let start = Instant::now();
    let outcome = exec.execute("console.log('spinning');\nwhile (true) {}").await;
    assert_eq!(
        outcome,
        ExecutionOutcome::RuntimeFailure {
            message: "Script execution timed out after 200ms".into(),
            line: None,
        }
    );
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn never_cleared_interval_times_out() {
    let exec = SandboxExecutor::new(SandboxConfig::new(128, 200));
    let outcome = exec.execute("setInterval(() => {}, 10);").await;
    assert_eq!(
        outcome,
        ExecutionOutcome::RuntimeFailure {
            message: "Script execution timed out after 200ms".into(),
            line: None,
        }
    );
}

#[tokio::test]
async fn timer_due_past_the_deadline_times_out() {
    let exec = SandboxExecutor::new(SandboxConfig::new(128, 100));
    let start = Instant::now();
    let outcome = exec
        .execute("setTimeout(() => console.log('too late'), 60000);")
        .await;
    assert!(
        matches!(outcome, ExecutionOutcome::RuntimeFailure { line: None, ref message } if message.contains("timed out")),
        "got: {outcome:?}"
    );
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn memory_hog_hits_the_heap_ceiling() {
    let exec = SandboxExecutor::new(SandboxConfig::new(16, 30_000));
    let outcome = exec
        .execute("const hog = [];\nwhile (true) { hog.push(new Array(100000).fill('x')); }")
        .await;
    assert_eq!(
        outcome,
        ExecutionOutcome::InternalFailure {
            message: "memory limit of 16 MiB exceeded".into()
        }
    );
}

#[tokio::test]
async fn heap_ceiling_below_the_floor_still_boots() {
    let exec = SandboxExecutor::new(SandboxConfig {
        max_heap_size: 1024,
        ..SandboxConfig::default()
    });
    let outcome = exec.execute("console.log('tiny');").await;
    assert_eq!(outcome, success("tiny"));
    assert_eq!(SandboxConfig::new(1, 1000).max_heap_size, MIN_HEAP_SIZE);
}

#[tokio::test]
async fn executor_recovers_after_a_terminated_run() {
    let exec = SandboxExecutor::new(SandboxConfig::new(128, 150));
    let outcome = exec.execute("while (true) {}").await;
    assert!(!outcome.is_success());

    let outcome = exec.execute("console.log('still alive');").await;
    assert_eq!(outcome, success("still alive"));
    assert_eq!(exec.isolates_created(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_executions_are_isolated() {
    let exec = std::sync::Arc::new(executor());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let exec = exec.clone();
            tokio::spawn(async move {
                exec.execute(&format!("globalThis.n = {i};\nconsole.log(n);"))
                    .await
            })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), success(&i.to_string()));
    }
}
