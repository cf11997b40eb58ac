#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use verdict_core::{ResourceObserver, ResourceSnapshot, Result, VerdictError};

/// Serves a fixed sequence of snapshots (the last one repeats), optionally
/// taking `latency` per fetch.
pub struct ScriptedObserver {
    script: Mutex<VecDeque<Option<ResourceSnapshot>>>,
    calls: AtomicU32,
    latency: Duration,
}

impl ScriptedObserver {
    /// `None` entries make that fetch fail with an observer error.
    pub fn new(script: Vec<Option<ResourceSnapshot>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn next(&self) -> Result<ResourceSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let entry = {
            let mut q = self.script.lock().unwrap();
            if q.len() > 1 {
                q.pop_front().unwrap()
            } else {
                q.front().cloned().unwrap()
            }
        };
        entry.ok_or_else(|| VerdictError::observer("scripted", "backend unavailable"))
    }
}

#[async_trait]
impl ResourceObserver for ScriptedObserver {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn list(&self, _collection: &str) -> Result<ResourceSnapshot> {
        self.next().await
    }

    async fn inspect(&self, _collection: &str, _id: &str) -> Result<ResourceSnapshot> {
        self.next().await
    }
}

pub fn records(values: Vec<serde_json::Value>) -> ResourceSnapshot {
    ResourceSnapshot::Records(values)
}
