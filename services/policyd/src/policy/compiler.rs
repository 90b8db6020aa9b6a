//! Bounded producer/consumer that turns per-role resource sets into policy
//! lines.
//!
//! # Concurrency model
//! The caller's stream is the producer and runs on the calling task; `workers`
//! tasks drain a bounded channel of depth `queue_depth`. Each worker formats
//! into a private buffer, and the join stage merges buffers into one sorted,
//! deduplicated set. A full queue applies backpressure to the producer.
//!
//! A line with a field the policy file cannot carry is left out and counted in
//! [`CompiledPolicy::rejected`]. A worker that panics fails the whole compile.
use super::PolicyError;
use futures::{Stream, StreamExt};
use gatehouse_authz::{MenuResource, PolicyLine};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

/// One producer item: everything a single role is granted.
#[derive(Debug, Clone)]
pub struct RoleResources {
    pub role_id: String,
    pub resources: Vec<MenuResource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledPolicy {
    /// Sorted and unique.
    pub lines: Vec<PolicyLine>,
    /// Roles that reached a worker, including roles with no resources.
    pub roles: usize,
    /// Resources received across all roles, before deduplication.
    pub resources: usize,
    /// Lines left out because a field was not storable.
    pub rejected: usize,
}

impl CompiledPolicy {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Newline-terminated policy file contents.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.lines.len() * 48);
        for line in &self.lines {
            out.push_str(&line.to_string());
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PolicyCompiler {
    workers: usize,
    queue_depth: usize,
}

impl PolicyCompiler {
    /// Zero values are raised to one.
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        Self {
            workers: workers.max(1),
            queue_depth: queue_depth.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }

    pub async fn compile<S>(&self, items: S) -> Result<CompiledPolicy, PolicyError>
    where
        S: Stream<Item = RoleResources>,
    {
        self.compile_with(items, PolicyLine::for_resource).await
    }

    async fn compile_with<S>(&self, items: S, line_for: LineFn) -> Result<CompiledPolicy, PolicyError>
    where
        S: Stream<Item = RoleResources>,
    {
        let (tx, rx) = mpsc::channel::<RoleResources>(self.queue_depth);
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = JoinSet::new();
        for _ in 0..self.workers {
            let rx = Arc::clone(&rx);
            workers.spawn(async move {
                let mut local = WorkerOutput::default();
                loop {
                    // The guard is dropped before formatting so other workers
                    // can receive while this one works.
                    let next = rx.lock().await.recv().await;
                    let Some(item) = next else { break };
                    local.roles += 1;
                    local.resources += item.resources.len();
                    for resource in &item.resources {
                        let line = line_for(&item.role_id, resource);
                        if let Some(field) = line.unstorable_field() {
                            local.rejected += 1;
                            tracing::warn!(
                                role_id = %item.role_id,
                                resource_id = %resource.id,
                                field,
                                "resource cannot be written as a policy line; omitted"
                            );
                            continue;
                        }
                        local.lines.push(line);
                    }
                }
                local
            });
        }

        let mut items = std::pin::pin!(items);
        while let Some(item) = items.next().await {
            if tx.send(item).await.is_err() {
                // Every worker is gone; the join below reports why.
                break;
            }
        }
        drop(tx);

        let mut merged = BTreeSet::new();
        let mut compiled = CompiledPolicy::default();
        while let Some(joined) = workers.join_next().await {
            let output = joined.map_err(|err| PolicyError::Worker(err.to_string()))?;
            compiled.roles += output.roles;
            compiled.resources += output.resources;
            compiled.rejected += output.rejected;
            merged.extend(output.lines);
        }
        compiled.lines = merged.into_iter().collect();
        Ok(compiled)
    }
}

type LineFn = fn(&str, &MenuResource) -> PolicyLine;

#[derive(Default)]
struct WorkerOutput {
    lines: Vec<PolicyLine>,
    roles: usize,
    resources: usize,
    rejected: usize,
}
