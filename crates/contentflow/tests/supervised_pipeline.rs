//! Step workers running concurrently under the supervisor.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use common::{ConfigBuilder, TestHarness};
use contentflow::db::{process_repo, ProcessStatus};
use contentflow::handler::{StepContext, StepError, StepHandler};
use contentflow::{QueueDispatchLoop, Supervisor, ThreadLauncher};

fn supervise(harness: &TestHarness) -> Supervisor {
    let app = harness.app.clone();
    let registry = harness.registry.clone();
    let launcher = Arc::new(ThreadLauncher::new(move |step, _args, token| {
        let dispatcher = QueueDispatchLoop::from_registry(step, app.clone(), &registry)?;
        dispatcher.run(&token)?;
        Ok(())
    }));

    let mut supervisor = Supervisor::new(harness.app.config.supervisor.poll_interval());
    for step in &harness.app.config.process_steps {
        supervisor.add_worker(step, launcher.clone(), Vec::new());
    }
    supervisor.start().unwrap();
    supervisor
}

fn wait_for_status(harness: &TestHarness, process_id: &str, status: ProcessStatus) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        let record = process_repo::find_by_id(&harness.app.db, process_id).unwrap();
        if record.map(|r| r.status()) == Some(status.clone()) {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("process {} never reached {}", process_id, status);
}

#[test]
fn test_supervised_workers_complete_documents() {
    let harness = TestHarness::with_config(ConfigBuilder::new().process_timeout_secs(30).build());
    let mut supervisor = supervise(&harness);

    let ids: Vec<String> = (0..3)
        .map(|i| harness.submit(&format!("invoice-{}.pdf", i), b"%PDF"))
        .collect();
    for id in &ids {
        wait_for_status(&harness, id, ProcessStatus::Completed);
    }

    let exits = supervisor.shutdown();
    assert_eq!(exits.len(), 4);
    assert!(exits.iter().all(|e| !e.status.is_crash()));
    assert!(supervisor.workers().iter().all(|w| w.restarts == 0));

    for id in &ids {
        assert!(harness.state(id).pipeline_status.completed);
    }
}

/// Panics on its first call, then stores nothing and succeeds.
struct PanicsOnce {
    tripped: Arc<AtomicBool>,
}

impl StepHandler for PanicsOnce {
    fn execute(&self, _ctx: &mut StepContext<'_>) -> Result<Value, StepError> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            panic!("handler bug");
        }
        Ok(serde_json::json!({ "result": "success" }))
    }
}

#[test]
fn test_crashed_worker_is_replaced_and_message_redelivered() {
    let mut harness = TestHarness::with_config(
        ConfigBuilder::new()
            .steps(&["transform", "save"])
            .process_timeout_secs(0)
            .build(),
    );
    let tripped = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&tripped);
    harness.registry.register("transform", move |_| {
        Ok(Box::new(PanicsOnce {
            tripped: Arc::clone(&flag),
        }))
    });

    let process_id = harness.submit("memo.txt", b"memo");
    let mut supervisor = supervise(&harness);

    wait_for_status(&harness, &process_id, ProcessStatus::Completed);

    let transform = supervisor
        .workers()
        .into_iter()
        .find(|w| w.name == "transform")
        .unwrap();
    assert_eq!(transform.restarts, 1);
    assert!(transform.running);

    supervisor.shutdown();
}
