// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-script parsing over the raw HCL body.
//!
//! The parser walks `hcl::Body` by hand instead of deserializing: the
//! inspector contract is that only literal attribute values (strings,
//! numbers, booleans) count, and anything computed is warned about and
//! dropped rather than failing the whole script.

use crate::directive::ScheduleDirective;
use crate::script::{EntrypointDef, Script, ScriptError};
use hcl::expr::{Expression, Heredoc, HeredocStripMode, TemplateExpr};
use hcl::structure::{Block, Body};
use indexmap::IndexMap;
use lathe_core::QueueName;
use std::path::Path;
use tracing::warn;

const ENTRYPOINT_BLOCK: &str = "entrypoint";
const SCHEDULE_BLOCK: &str = "schedule";

/// Parse a script document.
pub fn parse_script(content: &str, path: &Path) -> Result<Script, ScriptError> {
    let body: Body = hcl::parse(content)?;

    let mut entrypoints = IndexMap::new();
    for block in body.blocks() {
        if block.identifier() != ENTRYPOINT_BLOCK {
            warn!(
                script = %path.display(),
                block = block.identifier(),
                "ignoring unknown top-level block"
            );
            continue;
        }
        let Some(name) = block.labels().first().map(|l| l.as_str().to_string()) else {
            return Err(ScriptError::UnnamedEntrypoint {
                script: path.to_path_buf(),
            });
        };
        let def = parse_entrypoint(&name, block, path)?;
        entrypoints.insert(name, def);
    }

    if entrypoints.is_empty() {
        return Err(ScriptError::NoEntrypoints {
            script: path.to_path_buf(),
        });
    }

    Ok(Script {
        path: path.to_path_buf(),
        entrypoints,
    })
}

fn parse_entrypoint(name: &str, block: &Block, path: &Path) -> Result<EntrypointDef, ScriptError> {
    let mut doc = None;
    let mut run = None;
    let mut schedule = None;

    for attr in block.body().attributes() {
        match attr.key() {
            "doc" => doc = literal_str(attr.expr()),
            "run" => run = literal_str(attr.expr()),
            other => warn!(
                script = %path.display(),
                entrypoint = name,
                attribute = other,
                "ignoring unknown entrypoint attribute"
            ),
        }
    }

    for inner in block.body().blocks() {
        if inner.identifier() == SCHEDULE_BLOCK {
            schedule = Some(parse_schedule(name, inner, path));
        }
    }

    let run = run.ok_or_else(|| ScriptError::MissingRun {
        script: path.to_path_buf(),
        entrypoint: name.to_string(),
    })?;

    Ok(EntrypointDef {
        name: name.to_string(),
        doc,
        schedule,
        run,
    })
}

fn parse_schedule(entrypoint: &str, block: &Block, path: &Path) -> ScheduleDirective {
    let mut directive = ScheduleDirective::default();
    for attr in block.body().attributes() {
        let expr = attr.expr();
        match attr.key() {
            "queue" => match literal_str(expr).map(|s| s.parse::<QueueName>()) {
                Some(Ok(queue)) => directive.queue = Some(queue),
                Some(Err(e)) => warn!(
                    script = %path.display(),
                    entrypoint,
                    error = %e,
                    "ignoring invalid schedule queue"
                ),
                None => warn_non_literal(path, entrypoint, "queue"),
            },
            "wait" => match literal_bool(expr) {
                Some(wait) => directive.wait = wait,
                None => warn_non_literal(path, entrypoint, "wait"),
            },
            "timeout" => match literal_u64(expr) {
                Some(timeout) => directive.timeout = Some(timeout),
                None => warn_non_literal(path, entrypoint, "timeout"),
            },
            other => warn!(
                script = %path.display(),
                entrypoint,
                attribute = other,
                "ignoring unknown schedule attribute"
            ),
        }
    }
    directive
}

fn warn_non_literal(path: &Path, entrypoint: &str, attribute: &str) {
    warn!(
        script = %path.display(),
        entrypoint,
        attribute,
        "ignoring non-literal schedule attribute"
    );
}

/// Literal string value of an expression: plain strings and
/// interpolation-free templates (heredocs included) qualify.
fn literal_str(expr: &Expression) -> Option<String> {
    match expr {
        Expression::String(s) => Some(s.clone()),
        Expression::TemplateExpr(template) => match template.as_ref() {
            TemplateExpr::QuotedString(s) => Some(s.clone()),
            TemplateExpr::Heredoc(heredoc) => Some(heredoc_text(heredoc)),
        },
        _ => None,
    }
}

fn literal_bool(expr: &Expression) -> Option<bool> {
    match expr {
        Expression::Bool(b) => Some(*b),
        _ => None,
    }
}

fn literal_u64(expr: &Expression) -> Option<u64> {
    match expr {
        Expression::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// Heredoc body with `<<-` indent stripping applied.
fn heredoc_text(heredoc: &Heredoc) -> String {
    match heredoc.strip {
        HeredocStripMode::None => heredoc.template.clone(),
        HeredocStripMode::Indent => strip_indent(&heredoc.template),
    }
}

/// Remove the longest common leading whitespace from every non-empty line.
fn strip_indent(template: &str) -> String {
    let indent = template
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    let mut out = String::with_capacity(template.len());
    for line in template.split_inclusive('\n') {
        if line.trim().is_empty() {
            out.push_str(line.trim_start_matches(|c| c == ' ' || c == '\t'));
        } else {
            out.push_str(&line[indent.min(line.len())..]);
        }
    }
    out
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
