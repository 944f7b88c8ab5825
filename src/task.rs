//! C4 — the task runtime. `MonitorTask::run` loops forever: reset `task_results`, execute the
//! plan, hand the iteration's result to the collector, sleep for the scheduler's next duration,
//! repeat. Grounded directly in `task.py`'s `MonitorTask.run` for the loop shape; construction
//! follows the teacher's builder-style idiom.

use crate::compiler::CompiledTask;
use crate::plan::{self, TaskContext};
use crate::schedule::TaskSchedule;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use typed_builder::TypedBuilder;

/// One running task: a stable id, its compiled plan, its schedule, and the context the plan is
/// interpreted against. Constructed once per [`CompiledTask`] and driven forever by [`run`].
#[derive(TypedBuilder)]
pub struct MonitorTask {
    task_id: String,
    plan: crate::plan::Plan,
    schedule: Arc<dyn TaskSchedule>,
    context: TaskContext,
    cancellation: CancellationToken,
}

impl MonitorTask {
    pub fn from_compiled(compiled: CompiledTask, context: TaskContext, cancellation: CancellationToken) -> Self {
        Self::builder()
            .task_id(compiled.task_id)
            .plan(compiled.plan)
            .schedule(compiled.schedule)
            .context(context)
            .cancellation(cancellation)
            .build()
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Runs the task's loop until cancellation. Never returns an error: every failure mode is
    /// caught, logged with the task id, and treated as "skip this iteration" rather than
    /// terminating the task — except a scheduler failure, which ends the task (compile-time
    /// validation should make this unreachable).
    pub async fn run(mut self) {
        loop {
            self.context.reset_iteration();

            if let Err(err) = plan::run(&self.plan, &mut self.context).await {
                error!(task_id = %self.task_id, error = %err, "probe iteration failed");
            } else if let Some(collector) = self.context.collector.clone() {
                let cmd_label = last_cmd_label(&self.context.task_results);
                if let Err(err) = collector
                    .collect(&self.context.identity, &cmd_label, &self.context.result)
                    .await
                {
                    error!(task_id = %self.task_id, error = %err, "collector failed");
                }
            }

            let sleep_for = match self.schedule.next_after(&chrono::Local::now()) {
                Ok(d) => d,
                Err(err) => {
                    error!(task_id = %self.task_id, error = %err, "scheduler exhausted, stopping task");
                    return;
                }
            };

            if self.cancellation.is_cancelled() {
                warn!(task_id = %self.task_id, "cancelled before sleep, stopping task");
                return;
            }

            let duration = sleep_for.to_std().unwrap_or(std::time::Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = self.cancellation.cancelled() => {
                    warn!(task_id = %self.task_id, "cancelled during sleep, stopping task");
                    return;
                }
            }
        }
    }
}

fn last_cmd_label(task_results: &[crate::value::Value]) -> String {
    use crate::value::Value;
    match task_results.last() {
        Some(Value::Seq(pair)) => match pair.first() {
            Some(Value::Seq(invocation)) => match invocation.first() {
                Some(Value::Str(cmd)) => cmd.clone(),
                _ => String::new(),
            },
            _ => String::new(),
        },
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Collector;
    use crate::errors::{CollectorError, ProbeError};
    use crate::registry::{InMemoryFunctionRegistry, Probe};
    use crate::schedule::IntervalSchedule;
    use crate::value::Value;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProbe(Arc<AtomicUsize>);
    #[async_trait]
    impl Probe for CountingProbe {
        async fn call(&self, _args: &[String]) -> Result<Value, ProbeError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Int(1))
        }
    }

    struct RecordingCollector(Arc<AtomicUsize>);
    #[async_trait]
    impl Collector for RecordingCollector {
        async fn collect(&self, _host: &str, _cmd: &str, _result: &Value) -> Result<(), CollectorError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn task_runs_and_stops_on_cancellation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let collected = Arc::new(AtomicUsize::new(0));
        let registry = InMemoryFunctionRegistry::new();
        registry.register("test.ping", Arc::new(CountingProbe(calls.clone())));

        let compiled = CompiledTask {
            task_id: "t1".to_owned(),
            plan: vec![crate::plan::PlanStep::Probe {
                cmd: "test.ping".to_owned(),
                args: vec![],
            }],
            schedule: Arc::new(IntervalSchedule::from_secs_f64(0.0).unwrap()),
        };
        let ctx = TaskContext::new(
            Arc::new(registry),
            "node1",
            Some(Arc::new(RecordingCollector(collected.clone()))),
        );
        let token = CancellationToken::new();
        let task = MonitorTask::from_compiled(compiled, ctx, token.clone());

        let handle = tokio::spawn(task.run());
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        token.cancel();
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;

        assert!(calls.load(Ordering::SeqCst) > 0);
        assert!(collected.load(Ordering::SeqCst) > 0);
    }
}
