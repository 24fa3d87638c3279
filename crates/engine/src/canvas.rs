// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composition primitives: chain, group, chord.
//!
//! All three shapes compose the same `Execute` task. A chain rides along
//! in its own envelope as a list of planned links; a group is N siblings
//! sharing a group id; a chord is a group plus a `ChordUnlock` poller on
//! the `control` queue that releases the fan-in body only after every
//! child succeeded.

use crate::broker::{Broker, Envelope, TaskKind};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use lathe_core::{GroupId, IdGen, ProgramContext, QueueName, TaskId, TaskMeta, UuidIdGen};
use lathe_storage::ResultBackend;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// One planned task of a composition: which entrypoint to run, where,
/// and with what overrides relative to the parent context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueName>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u64>,
}

fn default_entrypoint() -> String {
    "main".to_string()
}

impl Signature {
    /// Derive the child's context from the parent's.
    pub fn materialize(
        &self,
        parent: &ProgramContext,
        task_id: TaskId,
        now: DateTime<Utc>,
    ) -> ProgramContext {
        let mut pc = parent.clone_for_dispatch(now);
        pc.task_id = task_id;
        pc.entrypoint = self.entrypoint.clone();
        if self.queue.is_some() {
            pc.queue = self.queue;
        }
        if let Some(raw) = self.raw {
            pc.raw = raw;
        }
        if let Some(compute_only) = self.compute_only {
            pc.compute_only = compute_only;
        }
        if let Some(time_limit) = self.time_limit {
            pc.time_limit = Some(time_limit);
        }
        if !self.params.is_null() {
            pc.params = self.params.clone();
        }
        pc
    }
}

/// A chain link waiting its turn inside an `Execute` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedLink {
    pub id: TaskId,
    pub signature: Signature,
}

/// The workflow shapes a script can return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum WorkflowSpec {
    Chain { links: Vec<Signature> },
    Group { tasks: Vec<Signature> },
    Chord { group: Vec<Signature>, body: Signature },
}

impl WorkflowSpec {
    /// Extract a workflow from a script's return value, when the value is
    /// an object of shape `{"workflow": {...}}`.
    pub fn from_return(value: &Value) -> Option<Result<WorkflowSpec, serde_json::Error>> {
        value
            .get("workflow")
            .map(|spec| serde_json::from_value(spec.clone()))
    }
}

/// Where a workflow's aggregate result comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleKind {
    /// Last link of a chain.
    Chain { last: TaskId },
    /// All members of a group, in order.
    Group { members: Vec<TaskId> },
    /// The fan-in body of a chord.
    Chord { body: TaskId },
}

/// Dispatched workflow: every descendant id plus the aggregation rule.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowHandle {
    /// Every descendant task launched, in dispatch order (chord body
    /// last).
    pub ids: Vec<TaskId>,
    pub kind: HandleKind,
}

impl WorkflowHandle {
    /// Aggregate the workflow's final value from terminal metas.
    pub fn aggregate(&self, backend: &dyn ResultBackend) -> Result<Value, EngineError> {
        let result_of = |id: &TaskId| -> Result<Value, EngineError> {
            Ok(backend
                .get(id)?
                .and_then(|meta| meta.result.result)
                .unwrap_or(Value::Null))
        };
        match &self.kind {
            HandleKind::Chain { last } => result_of(last),
            HandleKind::Chord { body } => result_of(body),
            HandleKind::Group { members } => Ok(Value::Array(
                members
                    .iter()
                    .map(|id| result_of(id))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
        }
    }
}

/// Launch a workflow on behalf of `parent`: pre-register PENDING metas
/// for every descendant, record them as children of the parent, and
/// enqueue whatever runs first.
pub fn dispatch_workflow(
    broker: &Broker,
    backend: &Arc<dyn ResultBackend>,
    parent: &ProgramContext,
    spec: WorkflowSpec,
    now: DateTime<Utc>,
) -> Result<WorkflowHandle, EngineError> {
    let id_gen = UuidIdGen;
    let handle = match spec {
        WorkflowSpec::Chain { links } => {
            if links.is_empty() {
                return Err(EngineError::Internal("empty chain".to_string()));
            }
            let planned: Vec<PlannedLink> = links
                .into_iter()
                .map(|signature| PlannedLink {
                    id: TaskId::new(id_gen.next()),
                    signature,
                })
                .collect();

            // Each link's meta points at its predecessor.
            let mut prev = parent.task_id.clone();
            for link in &planned {
                let mut meta = TaskMeta::with_status(link.id.clone(), lathe_core::JobStatus::Pending);
                meta.parent_id = Some(prev.clone());
                backend.put(meta)?;
                prev = link.id.clone();
            }

            let first = &planned[0];
            let pc = first.signature.materialize(parent, first.id.clone(), now);
            let queue = pc.routed_queue();
            let time_limit = pc.time_limit;
            broker.enqueue(Envelope {
                id: first.id.clone(),
                kind: TaskKind::Execute {
                    params: first.signature.params.clone(),
                    pc,
                    chain: planned[1..].to_vec(),
                },
                queue,
                eta: None,
                retries: 0,
                time_limit,
            })?;

            let ids: Vec<TaskId> = planned.iter().map(|l| l.id.clone()).collect();
            let last = ids[ids.len() - 1].clone();
            WorkflowHandle {
                ids,
                kind: HandleKind::Chain { last },
            }
        }

        WorkflowSpec::Group { tasks } => {
            let (ids, _) = dispatch_group(broker, backend, parent, &tasks, now, &id_gen)?;
            WorkflowHandle {
                ids: ids.clone(),
                kind: HandleKind::Group { members: ids },
            }
        }

        WorkflowSpec::Chord { group, body } => {
            let (member_ids, _) = dispatch_group(broker, backend, parent, &group, now, &id_gen)?;

            let body_id = TaskId::new(id_gen.next());
            let mut body_meta =
                TaskMeta::with_status(body_id.clone(), lathe_core::JobStatus::Pending);
            body_meta.parent_id = Some(parent.task_id.clone());
            backend.put(body_meta)?;

            // The unlock poller lives on `control` so it can never starve
            // the compute pools it is watching.
            broker.enqueue(Envelope::new(
                TaskId::new(id_gen.next()),
                TaskKind::ChordUnlock {
                    group: member_ids.clone(),
                    body_id: body_id.clone(),
                    body,
                    pc: parent.clone_for_dispatch(now),
                },
                QueueName::Control,
            ))?;

            let mut ids = member_ids;
            ids.push(body_id.clone());
            WorkflowHandle {
                ids,
                kind: HandleKind::Chord { body: body_id },
            }
        }
    };

    backend.add_children(&parent.task_id, &handle.ids)?;
    info!(
        parent = %parent.task_id,
        descendants = handle.ids.len(),
        "workflow dispatched"
    );
    Ok(handle)
}

fn dispatch_group(
    broker: &Broker,
    backend: &Arc<dyn ResultBackend>,
    parent: &ProgramContext,
    tasks: &[Signature],
    now: DateTime<Utc>,
    id_gen: &UuidIdGen,
) -> Result<(Vec<TaskId>, GroupId), EngineError> {
    if tasks.is_empty() {
        return Err(EngineError::Internal("empty group".to_string()));
    }
    let group_id = GroupId::new(id_gen.next());
    let mut ids = Vec::with_capacity(tasks.len());
    for signature in tasks {
        let task_id = TaskId::new(id_gen.next());
        let mut meta = TaskMeta::with_status(task_id.clone(), lathe_core::JobStatus::Pending);
        meta.parent_id = Some(parent.task_id.clone());
        meta.group_id = Some(group_id.clone());
        backend.put(meta)?;

        let pc = signature.materialize(parent, task_id.clone(), now);
        let queue = pc.routed_queue();
        let time_limit = pc.time_limit;
        broker.enqueue(Envelope {
            id: task_id.clone(),
            kind: TaskKind::Execute {
                params: signature.params.clone(),
                pc,
                chain: Vec::new(),
            },
            queue,
            eta: None,
            retries: 0,
            time_limit,
        })?;
        ids.push(task_id);
    }
    Ok((ids, group_id))
}

#[cfg(test)]
#[path = "canvas_tests.rs"]
mod tests;
