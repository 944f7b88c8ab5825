//! The compiled plan tree and its interpreter. A [`Plan`] replaces the generated-and-`exec`uted
//! source the source lowered each task to (§9's design note): it is a small tagged-variant tree
//! walked directly, so compile errors are precise and there is no runtime code generation.

use crate::errors::ProbeError;
use crate::expr::{self, Expr};
use crate::reference::TemplatePart;
use crate::value::Value;
use crate::{collector::Collector, registry::FunctionRegistry};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One node of a compiled plan. A whole entry's control flow is a `Vec<PlanStep>` — a block,
/// executed top to bottom.
#[derive(Debug, Clone)]
pub enum PlanStep {
    /// A probe invocation: `cmd` plus its argument templates, each rendered against the current
    /// context before the call.
    Probe {
        cmd: String,
        args: Vec<Vec<TemplatePart>>,
    },
    /// `foreach <var>:` over a sequence or set.
    ForeachSeq {
        var: String,
        iteree: Expr,
        body: Vec<PlanStep>,
    },
    /// `foreach <key>, <val>:` over a mapping, iterated in sorted-key order.
    ForeachMap {
        key: String,
        val: String,
        iteree: Expr,
        body: Vec<PlanStep>,
    },
    /// `if <cond>: ... elif <cond>: ... else: ...`. Branches are tried in order; at most one
    /// body runs per visit.
    If {
        branches: Vec<(Expr, Vec<PlanStep>)>,
        else_body: Option<Vec<PlanStep>>,
    },
}

/// The full compiled form of one catalog entry's control flow.
pub type Plan = Vec<PlanStep>;

/// The per-task mutable environment the interpreter runs a [`Plan`] against. Outer fields
/// (registry, identity, collector) are fixed at construction; `result`/`task_results` and the
/// `foreach` variable stack change across and within iterations.
pub struct TaskContext {
    pub registry: Arc<dyn FunctionRegistry>,
    pub identity: String,
    pub collector: Option<Arc<dyn Collector>>,
    pub result: Value,
    pub task_results: Vec<Value>,
    vars: Vec<(String, Value)>,
}

impl TaskContext {
    pub fn new(
        registry: Arc<dyn FunctionRegistry>,
        identity: impl Into<String>,
        collector: Option<Arc<dyn Collector>>,
    ) -> Self {
        Self {
            registry,
            identity: identity.into(),
            collector,
            result: Value::None,
            task_results: Vec::new(),
            vars: Vec::new(),
        }
    }

    /// Resets per-iteration state. Called by the task runtime before every execution of the
    /// plan, never by the interpreter itself.
    pub fn reset_iteration(&mut self) {
        self.task_results.clear();
        self.result = Value::None;
    }

    fn push_var(&mut self, name: String, value: Value) {
        self.vars.push((name, value));
    }

    fn pop_var(&mut self) {
        self.vars.pop();
    }

    fn get_var(&self, name: &str) -> Option<&Value> {
        self.vars.iter().rev().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

impl expr::Env for TaskContext {
    fn get(&self, name: &str) -> Option<Value> {
        match name {
            "result" => Some(self.result.clone()),
            "task_results" => Some(Value::Seq(self.task_results.clone())),
            _ => self.get_var(name).cloned(),
        }
    }
}

/// Executes a full plan block against `ctx`. Entry point used by the task runtime.
pub async fn run(plan: &Plan, ctx: &mut TaskContext) -> Result<(), ProbeError> {
    run_block(plan, ctx).await
}

fn run_block<'a>(steps: &'a [PlanStep], ctx: &'a mut TaskContext) -> BoxFuture<'a, Result<(), ProbeError>> {
    Box::pin(async move {
        for step in steps {
            run_step(step, ctx).await?;
        }
        Ok(())
    })
}

fn run_step<'a>(step: &'a PlanStep, ctx: &'a mut TaskContext) -> BoxFuture<'a, Result<(), ProbeError>> {
    Box::pin(async move {
        match step {
            PlanStep::Probe { cmd, args } => run_probe(cmd, args, ctx).await,
            PlanStep::ForeachSeq { var, iteree, body } => {
                let iter_value = expr::eval(iteree, &*ctx)?;
                let items = iter_value.iter_sorted().ok_or_else(|| {
                    ProbeError::Failed(
                        "foreach".to_owned(),
                        format!("`{iteree}` is not a sequence or set (got {})", iter_value.kind()),
                    )
                })?;
                for item in items {
                    ctx.push_var(var.clone(), item);
                    let res = run_block(body, ctx).await;
                    ctx.pop_var();
                    res?;
                }
                Ok(())
            }
            PlanStep::ForeachMap { key, val, iteree, body } => {
                let iter_value = expr::eval(iteree, &*ctx)?;
                let Value::Map(map) = iter_value else {
                    return Err(ProbeError::Failed(
                        "foreach".to_owned(),
                        format!("`{iteree}` is not a mapping (got {})", iter_value.kind()),
                    ));
                };
                for (k, v) in map {
                    ctx.push_var(key.clone(), Value::Str(k));
                    ctx.push_var(val.clone(), v);
                    let res = run_block(body, ctx).await;
                    ctx.pop_var();
                    ctx.pop_var();
                    res?;
                }
                Ok(())
            }
            PlanStep::If { branches, else_body } => {
                for (cond, body) in branches {
                    if expr::eval(cond, &*ctx)?.as_bool() {
                        return run_block(body, ctx).await;
                    }
                }
                if let Some(body) = else_body {
                    return run_block(body, ctx).await;
                }
                Ok(())
            }
        }
    })
}

async fn run_probe(cmd: &str, args: &[Vec<TemplatePart>], ctx: &mut TaskContext) -> Result<(), ProbeError> {
    let mut rendered = Vec::with_capacity(args.len());
    for template in args {
        rendered.push(crate::reference::render(template, &*ctx)?);
    }
    let value = ctx.registry.call(cmd, &rendered).await?;

    let invocation = Value::Seq(
        std::iter::once(Value::str(cmd.to_owned()))
            .chain(rendered.into_iter().map(Value::Str))
            .collect(),
    );
    ctx.task_results.push(Value::Seq(vec![invocation, value.clone()]));
    ctx.result = value;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryFunctionRegistry;
    use async_trait::async_trait;

    struct Echo;
    #[async_trait]
    impl crate::registry::Probe for Echo {
        async fn call(&self, args: &[String]) -> Result<Value, ProbeError> {
            Ok(Value::str(args.join(",")))
        }
    }

    struct ReturnsStats;
    #[async_trait]
    impl crate::registry::Probe for ReturnsStats {
        async fn call(&self, _args: &[String]) -> Result<Value, ProbeError> {
            let mut m = std::collections::BTreeMap::new();
            m.insert("available".to_owned(), Value::Int(95));
            m.insert("total".to_owned(), Value::Int(100));
            Ok(Value::Map(m))
        }
    }

    fn ctx_with(registry: InMemoryFunctionRegistry) -> TaskContext {
        TaskContext::new(Arc::new(registry), "test-node", None)
    }

    #[tokio::test]
    async fn probe_sets_result_and_appends_task_results() {
        let registry = InMemoryFunctionRegistry::new();
        registry.register("test.echo", Arc::new(Echo));
        let mut ctx = ctx_with(registry);
        let plan = vec![PlanStep::Probe {
            cmd: "test.echo".to_owned(),
            args: vec![crate::reference::expand_string("hi").unwrap()],
        }];
        run(&plan, &mut ctx).await.unwrap();
        assert_eq!(ctx.result, Value::str("hi"));
        assert_eq!(ctx.task_results.len(), 1);
    }

    #[tokio::test]
    async fn foreach_map_iterates_in_sorted_key_order() {
        let registry = InMemoryFunctionRegistry::new();
        registry.register("test.echo", Arc::new(Echo));
        let mut ctx = ctx_with(registry);
        let mut seen = Vec::new();
        // Build by hand: `foreach k, v:` over result = {"b": 2, "a": 1}, then append v via probe.
        let mut m = std::collections::BTreeMap::new();
        m.insert("b".to_owned(), Value::Int(2));
        m.insert("a".to_owned(), Value::Int(1));
        ctx.result = Value::Map(m);
        let plan = vec![PlanStep::ForeachMap {
            key: "k".to_owned(),
            val: "v".to_owned(),
            iteree: Expr::Var("result".to_owned()),
            body: vec![PlanStep::Probe {
                cmd: "test.echo".to_owned(),
                args: vec![crate::reference::expand_string("$k=$v").unwrap()],
            }],
        }];
        run(&plan, &mut ctx).await.unwrap();
        // task_results holds one entry per iteration, in order, each [[cmd, arg], result]
        for tr in &ctx.task_results {
            if let Value::Seq(pair) = tr {
                if let Value::Str(s) = &pair[1] {
                    seen.push(s.clone());
                }
            }
        }
        assert_eq!(seen, vec!["a=1".to_owned(), "b=2".to_owned()]);
    }

    #[tokio::test]
    async fn conditional_gating_scenario() {
        let registry = InMemoryFunctionRegistry::new();
        registry.register("probe.stats", Arc::new(ReturnsStats));
        registry.register("test.echo", Arc::new(Echo));
        let mut ctx = ctx_with(registry);

        let cond = crate::reference::expand_expr("result.available * 100 / result.total > 90").unwrap();
        let plan = vec![
            PlanStep::Probe {
                cmd: "probe.stats".to_owned(),
                args: vec![],
            },
            PlanStep::If {
                branches: vec![(cond, vec![PlanStep::Probe {
                    cmd: "test.echo".to_owned(),
                    args: vec![crate::reference::expand_string("gated").unwrap()],
                }])],
                else_body: None,
            },
        ];
        run(&plan, &mut ctx).await.unwrap();
        assert_eq!(ctx.result, Value::str("gated"));
        assert_eq!(ctx.task_results.len(), 2);
    }

    #[tokio::test]
    async fn foreach_over_non_iterable_result_errors() {
        let registry = InMemoryFunctionRegistry::new();
        let mut ctx = ctx_with(registry);
        ctx.result = Value::Int(3);
        let plan = vec![PlanStep::ForeachSeq {
            var: "x".to_owned(),
            iteree: Expr::Var("result".to_owned()),
            body: vec![],
        }];
        assert!(run(&plan, &mut ctx).await.is_err());
    }
}
