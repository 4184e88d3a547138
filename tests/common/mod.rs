//! Shared fakes for the integration tests: a browser handle, a factory that
//! counts sessions, a handful of commands and a polling helper.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;
use prometheus_browser_pool::config::PoolSettings;
use prometheus_browser_pool::core::{BrowserCommand, BrowserFactory, Dependencies, FactoryError};
use prometheus_browser_pool::util::init_tracing;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

// ============================================================================
// BROWSER + FACTORY
// ============================================================================

/// Stand-in for a remote browser session.
#[derive(Debug)]
pub struct FakeBrowser {
    pub serial: usize,
}

#[derive(Debug, Default)]
pub struct FakeFactory {
    created: AtomicUsize,
    released: Mutex<Vec<usize>>,
    fail_create: AtomicBool,
    fail_probe: AtomicBool,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> Vec<usize> {
        self.released.lock().clone()
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_probe(&self, fail: bool) {
        self.fail_probe.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrowserFactory<FakeBrowser> for FakeFactory {
    async fn create(&self) -> Result<FakeBrowser, FactoryError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(FactoryError::Create("grid unavailable".into()));
        }
        let serial = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(FakeBrowser { serial })
    }

    async fn release(&self, browser: FakeBrowser) -> Result<(), FactoryError> {
        self.released.lock().push(browser.serial);
        Ok(())
    }

    async fn probe(&self, _browser: &FakeBrowser) -> anyhow::Result<()> {
        if self.fail_probe.load(Ordering::SeqCst) {
            bail!("session unresponsive");
        }
        Ok(())
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

/// Appends its label to a shared log.
pub struct Record {
    pub label: String,
    pub log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl BrowserCommand<FakeBrowser> for Record {
    async fn execute(
        &self,
        _browser: &FakeBrowser,
        _cancel: &CancellationToken,
        _deps: &Dependencies,
        _run_number: u32,
    ) -> anyhow::Result<()> {
        self.log.lock().push(self.label.clone());
        Ok(())
    }
}

/// Fails every attempt, counting them.
pub struct AlwaysFail {
    pub attempts: Arc<AtomicU32>,
}

#[async_trait]
impl BrowserCommand<FakeBrowser> for AlwaysFail {
    async fn execute(
        &self,
        _browser: &FakeBrowser,
        _cancel: &CancellationToken,
        _deps: &Dependencies,
        _run_number: u32,
    ) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        bail!("element not found")
    }
}

/// Panics on every attempt.
pub struct Panicky;

#[async_trait]
impl BrowserCommand<FakeBrowser> for Panicky {
    async fn execute(
        &self,
        _browser: &FakeBrowser,
        _cancel: &CancellationToken,
        _deps: &Dependencies,
        _run_number: u32,
    ) -> anyhow::Result<()> {
        panic!("driver crashed");
    }
}

/// Sleeps, flagging any overlap with another job on the same session.
pub struct Exclusive {
    pub hold: Duration,
    pub in_flight: Arc<Mutex<HashSet<usize>>>,
    pub overlaps: Arc<AtomicUsize>,
    pub done: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserCommand<FakeBrowser> for Exclusive {
    async fn execute(
        &self,
        browser: &FakeBrowser,
        _cancel: &CancellationToken,
        _deps: &Dependencies,
        _run_number: u32,
    ) -> anyhow::Result<()> {
        if !self.in_flight.lock().insert(browser.serial) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(self.hold).await;
        self.in_flight.lock().remove(&browser.serial);
        self.done.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Blocks until released through `gate`.
pub struct Gated {
    pub gate: CancellationToken,
    pub started: Arc<AtomicBool>,
}

#[async_trait]
impl BrowserCommand<FakeBrowser> for Gated {
    async fn execute(
        &self,
        _browser: &FakeBrowser,
        _cancel: &CancellationToken,
        _deps: &Dependencies,
        _run_number: u32,
    ) -> anyhow::Result<()> {
        self.started.store(true, Ordering::SeqCst);
        self.gate.cancelled().await;
        Ok(())
    }
}

/// Serializable command used with the JSONL provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub url: String,
}

#[async_trait]
impl BrowserCommand<FakeBrowser> for Visit {
    async fn execute(
        &self,
        _browser: &FakeBrowser,
        _cancel: &CancellationToken,
        _deps: &Dependencies,
        _run_number: u32,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn kind(&self) -> &str {
        "visit"
    }

    fn payload(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self).ok()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Settings with short loop intervals so tests settle quickly. Also installs
/// the log subscriber; set `RUST_LOG` to see pool output.
pub fn fast_settings() -> PoolSettings {
    init_tracing();
    PoolSettings::new()
        .with_dispatch_poll_interval(Duration::from_millis(10))
        .with_control_tick_interval(Duration::from_millis(10))
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_until<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
