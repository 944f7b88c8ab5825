//! C3 — the task compiler. Lowers one [`CatalogDocument`] into a list of [`CompiledTask`]s,
//! using C2 ([`crate::reference`]) on every text field and C1 ([`crate::schedule`]) for the
//! timing clause. Grounded on `parsers/yaml.py`'s `_expand_task`/`_expand_foreach`/
//! `_expand_conditional` for the control-flow semantics; the shell-like `run:` lexer and the
//! builder-style `CompiledTask` construction follow the teacher's idiom.

use crate::errors::CatalogError;
use crate::expr::Expr;
use crate::plan::{Plan, PlanStep};
use crate::reference;
use crate::registry::FunctionRegistry;
use crate::schedule::{CronSchedule, IntervalSchedule, TaskSchedule};
use serde::Deserialize;
use serde_yaml::{Mapping, Value as Yaml};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// The top-level parsed catalog document. Unrecognized top-level keys are ignored.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CatalogDocument {
    #[serde(default)]
    pub monitor: Vec<Yaml>,
}

/// An immutable, compiled task: a stable id, its executable plan, and its schedule.
pub struct CompiledTask {
    pub task_id: String,
    pub plan: Plan,
    pub schedule: Arc<dyn TaskSchedule>,
}

const RESERVED_KEYS: &[&str] = &["id", "run", "every", "at"];

fn get<'a>(mapping: &'a Mapping, key: &str) -> Option<&'a Yaml> {
    mapping.get(&Yaml::String(key.to_owned()))
}

fn as_f64_loose(value: &Yaml) -> Option<f64> {
    match value {
        Yaml::Number(n) => n.as_f64(),
        Yaml::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn cron_field_to_string(value: &Yaml) -> Option<String> {
    match value {
        Yaml::String(s) => Some(s.clone()),
        Yaml::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Compiles a whole catalog document. Returns compiled tasks plus, for every entry that failed to
/// compile, its index and the error — satisfying `|compiled| + |skipped| = |entries|`.
pub fn compile_catalog(
    doc: &CatalogDocument,
    registry: &dyn FunctionRegistry,
    default_interval_secs: f64,
) -> (Vec<CompiledTask>, Vec<(usize, CatalogError)>) {
    let mut compiled = Vec::new();
    let mut skipped = Vec::new();
    let mut seen_ids: BTreeMap<String, u32> = BTreeMap::new();

    for (idx, raw) in doc.monitor.iter().enumerate() {
        match compile_entry(idx, raw, registry, default_interval_secs, &mut seen_ids) {
            Ok(task) => compiled.push(task),
            Err(err) => {
                warn!(entry = idx, error = %err, "skipping catalog entry");
                skipped.push((idx, err));
            }
        }
    }
    (compiled, skipped)
}

fn compile_entry(
    idx: usize,
    raw: &Yaml,
    registry: &dyn FunctionRegistry,
    default_interval_secs: f64,
    seen_ids: &mut BTreeMap<String, u32>,
) -> Result<CompiledTask, CatalogError> {
    let mapping = raw.as_mapping().ok_or_else(|| {
        CatalogError::MalformedCommand(format!("#{}", idx + 1), "entry is not a mapping".to_owned())
    })?;

    let raw_id = match get(mapping, "id") {
        Some(Yaml::String(s)) => s.clone(),
        Some(Yaml::Number(n)) => n.to_string(),
        Some(_) => {
            return Err(CatalogError::MalformedCommand(
                format!("#{}", idx + 1),
                "`id` must be a string".to_owned(),
            ));
        }
        None => format!("monitor-{}", idx + 1),
    };

    let count = seen_ids.entry(raw_id.clone()).or_insert(0);
    *count += 1;
    let task_id = if *count > 1 {
        let suffixed = format!("{raw_id}#{count}");
        warn!(original_id = %raw_id, assigned_id = %suffixed, "duplicate task id, disambiguating");
        suffixed
    } else {
        raw_id.clone()
    };

    let run_line = match get(mapping, "run") {
        Some(Yaml::String(s)) => s,
        _ => return Err(CatalogError::MissingRun(idx)),
    };
    let probe = compile_probe_line(run_line, registry, &task_id)?;

    let schedule: Arc<dyn TaskSchedule> = if let Some(every) = get(mapping, "every") {
        Arc::new(parse_every(every, &task_id)?)
    } else if let Some(at) = get(mapping, "at") {
        let fields = cron_fields(at, &task_id)?;
        Arc::new(CronSchedule::from_fields(&fields)?)
    } else {
        Arc::new(
            IntervalSchedule::from_secs_f64(default_interval_secs)
                .map_err(|e| CatalogError::MalformedTiming(task_id.clone(), e.to_string()))?,
        )
    };

    let control_pairs: Vec<(String, Yaml)> = mapping
        .iter()
        .filter_map(|(k, v)| {
            let key = k.as_str()?;
            if RESERVED_KEYS.contains(&key) {
                None
            } else {
                Some((key.to_owned(), v.clone()))
            }
        })
        .collect();

    let raw_statements: Vec<RawStatement> = control_pairs
        .into_iter()
        .map(|(key, value)| RawStatement::Control(key, value))
        .collect();
    let tail = compile_statements(raw_statements, registry, &task_id)?;

    let mut plan: Plan = vec![probe];
    plan.extend(tail);

    Ok(CompiledTask {
        task_id,
        plan,
        schedule,
    })
}

fn parse_every(value: &Yaml, entry_id: &str) -> Result<IntervalSchedule, CatalogError> {
    let mapping = value.as_mapping().ok_or_else(|| {
        CatalogError::MalformedTiming(entry_id.to_owned(), "`every` must be a mapping".to_owned())
    })?;
    let mut seconds = 0.0;
    for (field, unit) in [("day", 86400.0), ("hour", 3600.0), ("minute", 60.0), ("second", 1.0)] {
        if let Some(v) = get(mapping, field) {
            let n = as_f64_loose(v).ok_or_else(|| {
                CatalogError::MalformedTiming(entry_id.to_owned(), format!("`every.{field}` is not numeric"))
            })?;
            seconds += n * unit;
        }
    }
    IntervalSchedule::from_secs_f64(seconds)
        .map_err(|e| CatalogError::MalformedTiming(entry_id.to_owned(), e.to_string()))
}

fn cron_fields(value: &Yaml, entry_id: &str) -> Result<BTreeMap<String, String>, CatalogError> {
    let mapping = value.as_mapping().ok_or_else(|| {
        CatalogError::MalformedTiming(entry_id.to_owned(), "`at` must be a mapping".to_owned())
    })?;
    let mut out = BTreeMap::new();
    for (k, v) in mapping.iter() {
        let key = k.as_str().ok_or_else(|| {
            CatalogError::MalformedTiming(entry_id.to_owned(), "`at` field name must be a string".to_owned())
        })?;
        let val = cron_field_to_string(v).ok_or_else(|| {
            CatalogError::MalformedTiming(entry_id.to_owned(), format!("`at.{key}` is not a scalar"))
        })?;
        out.insert(key.to_owned(), val);
    }
    Ok(out)
}

/// Shell-like lexer for `run:` lines: single- and double-quoted spans preserve interior spaces
/// (and are unquoted in the output); `\$ref}` text inside a span is left untouched for C2 to
/// expand later.
fn lex_command(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                    in_token = true;
                } else if c.is_whitespace() {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                } else {
                    current.push(c);
                    in_token = true;
                }
            }
        }
    }
    if quote.is_some() {
        return Err(format!("unterminated quote in `{line}`"));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn compile_probe_line(line: &str, registry: &dyn FunctionRegistry, entry_id: &str) -> Result<PlanStep, CatalogError> {
    let tokens = lex_command(line).map_err(|e| CatalogError::MalformedCommand(entry_id.to_owned(), e))?;
    let (cmd, raw_args) = tokens
        .split_first()
        .ok_or_else(|| CatalogError::MalformedCommand(entry_id.to_owned(), "empty command line".to_owned()))?;

    if !registry.contains(cmd) {
        return Err(CatalogError::UnknownCommand(entry_id.to_owned(), cmd.clone()));
    }

    let args = raw_args
        .iter()
        .map(|raw| reference::expand_string(raw).map_err(|e| CatalogError::Expr(entry_id.to_owned(), e)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PlanStep::Probe {
        cmd: cmd.clone(),
        args,
    })
}

enum RawStatement {
    Probe(String),
    Control(String, Yaml),
}

enum ControlKind {
    ForeachSeq(String),
    ForeachMap(String, String),
    If(Expr),
    Elif(Expr),
    Else,
}

fn parse_control_key(key: &str, entry_id: &str) -> Result<ControlKind, CatalogError> {
    let trimmed = key.trim();
    if let Some(rest) = trimmed.strip_prefix("foreach ") {
        let idents: Vec<&str> = rest.split(',').map(str::trim).collect();
        return match idents.as_slice() {
            [v] => {
                let var = reference::normalize_ident(v)
                    .map_err(|e| CatalogError::Expr(entry_id.to_owned(), e))?;
                Ok(ControlKind::ForeachSeq(var))
            }
            [k, v] => {
                let key = reference::normalize_ident(k)
                    .map_err(|e| CatalogError::Expr(entry_id.to_owned(), e))?;
                let val = reference::normalize_ident(v)
                    .map_err(|e| CatalogError::Expr(entry_id.to_owned(), e))?;
                Ok(ControlKind::ForeachMap(key, val))
            }
            _ => Err(CatalogError::MalformedControlClause(
                entry_id.to_owned(),
                key.to_owned(),
                "`foreach` takes one or two identifiers".to_owned(),
            )),
        };
    }
    if let Some(rest) = trimmed.strip_prefix("if ") {
        let expr = reference::expand_expr(rest).map_err(|e| CatalogError::Expr(entry_id.to_owned(), e))?;
        return Ok(ControlKind::If(expr));
    }
    if let Some(rest) = trimmed.strip_prefix("elif ") {
        let expr = reference::expand_expr(rest).map_err(|e| CatalogError::Expr(entry_id.to_owned(), e))?;
        return Ok(ControlKind::Elif(expr));
    }
    if trimmed == "else" {
        return Ok(ControlKind::Else);
    }
    Err(CatalogError::MalformedControlClause(
        entry_id.to_owned(),
        key.to_owned(),
        "not a recognized control clause".to_owned(),
    ))
}

fn compile_statement_list(value: &Yaml, registry: &dyn FunctionRegistry, entry_id: &str) -> Result<Vec<PlanStep>, CatalogError> {
    let items = value.as_sequence().ok_or_else(|| {
        CatalogError::MalformedControlClause(entry_id.to_owned(), "body".to_owned(), "expected a list of statements".to_owned())
    })?;

    let mut raw = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Yaml::String(s) => raw.push(RawStatement::Probe(s.clone())),
            Yaml::Mapping(m) => {
                let mut entries = m.iter();
                let (Some((k, v)), None) = (entries.next(), entries.next()) else {
                    return Err(CatalogError::MalformedControlClause(
                        entry_id.to_owned(),
                        "statement".to_owned(),
                        "control-clause mappings must have exactly one key".to_owned(),
                    ));
                };
                let key = k.as_str().ok_or_else(|| {
                    CatalogError::MalformedControlClause(entry_id.to_owned(), "statement".to_owned(), "key must be a string".to_owned())
                })?;
                raw.push(RawStatement::Control(key.to_owned(), v.clone()));
            }
            _ => {
                return Err(CatalogError::MalformedControlClause(
                    entry_id.to_owned(),
                    "statement".to_owned(),
                    "statement must be a command string or a single-key mapping".to_owned(),
                ));
            }
        }
    }
    compile_statements(raw, registry, entry_id)
}

fn compile_statements(raw: Vec<RawStatement>, registry: &dyn FunctionRegistry, entry_id: &str) -> Result<Vec<PlanStep>, CatalogError> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < raw.len() {
        match &raw[i] {
            RawStatement::Probe(line) => {
                out.push(compile_probe_line(line, registry, entry_id)?);
                i += 1;
            }
            RawStatement::Control(key, value) => {
                match parse_control_key(key, entry_id)? {
                    ControlKind::ForeachSeq(var) => {
                        let body = compile_statement_list(value, registry, entry_id)?;
                        out.push(PlanStep::ForeachSeq {
                            var,
                            iteree: Expr::Var("result".to_owned()),
                            body,
                        });
                        i += 1;
                    }
                    ControlKind::ForeachMap(key_var, val_var) => {
                        let body = compile_statement_list(value, registry, entry_id)?;
                        out.push(PlanStep::ForeachMap {
                            key: key_var,
                            val: val_var,
                            iteree: Expr::Var("result".to_owned()),
                            body,
                        });
                        i += 1;
                    }
                    ControlKind::If(cond) => {
                        let mut branches = vec![(cond, compile_statement_list(value, registry, entry_id)?)];
                        let mut else_body = None;
                        i += 1;
                        while i < raw.len() {
                            let RawStatement::Control(next_key, next_value) = &raw[i] else {
                                break;
                            };
                            match parse_control_key(next_key, entry_id)? {
                                ControlKind::Elif(cond2) => {
                                    branches.push((cond2, compile_statement_list(next_value, registry, entry_id)?));
                                    i += 1;
                                }
                                ControlKind::Else => {
                                    else_body = Some(compile_statement_list(next_value, registry, entry_id)?);
                                    i += 1;
                                    break;
                                }
                                _ => break,
                            }
                        }
                        out.push(PlanStep::If { branches, else_body });
                    }
                    ControlKind::Elif(_) | ControlKind::Else => {
                        return Err(CatalogError::MalformedControlClause(
                            entry_id.to_owned(),
                            key.clone(),
                            "`elif`/`else` without a preceding `if`".to_owned(),
                        ));
                    }
                }
            }
        }
    }
    Ok(out)
}
