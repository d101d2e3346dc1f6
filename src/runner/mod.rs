//! Ordered execution of requirements against one connection.

pub mod report;
pub mod steps;

use std::future::Future;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::actor::Actor;
use crate::connection::{CallerContext, Connection};
use crate::core::Result;

pub use report::{Report, RequirementReport, TestResult};
pub use steps::Steps;

/// A named conformance check. The runner registers its types, waits for
/// the schema to sync, then verifies.
#[async_trait]
pub trait Requirement: Send + Sync {
    fn name(&self) -> &'static str;

    fn register(&self, connection: &Connection) -> Result<()>;

    async fn verify(&self, actor: &Actor) -> Vec<TestResult>;
}

pub struct Runner {
    connection: Connection,
    requirements: Vec<Box<dyn Requirement>>,
    only: Vec<String>,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(connection: Connection, requirements: Vec<Box<dyn Requirement>>) -> Self {
        Self {
            connection,
            requirements,
            only: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Runs only the named requirements, still in declaration order.
    pub fn only(mut self, names: Vec<String>) -> Self {
        self.only = names;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.requirements.iter().map(|r| r.name()).collect()
    }

    /// Names passed to [`Runner::only`] that match no requirement.
    pub fn unknown_filters(&self) -> Vec<String> {
        let names = self.names();
        self.only
            .iter()
            .filter(|n| !names.contains(&n.as_str()))
            .cloned()
            .collect()
    }

    fn selected(&self, requirement: &dyn Requirement) -> bool {
        self.only.is_empty() || self.only.iter().any(|n| n == requirement.name())
    }

    pub async fn run(&self) -> Report {
        let mut report = Report::default();
        for requirement in &self.requirements {
            if !self.selected(requirement.as_ref()) {
                continue;
            }
            if self.cancel.is_cancelled() {
                info!("run cancelled");
                break;
            }
            report.push(self.run_one(requirement.as_ref()).await);
        }
        report
    }

    /// Runs until done or until `interrupt` resolves, then closes the
    /// connection either way. Returns `None` when interrupted.
    pub async fn run_until<F>(&self, interrupt: F) -> Option<Report>
    where
        F: Future<Output = ()>,
    {
        let outcome = tokio::select! {
            biased;
            _ = interrupt => {
                warn!("interrupted, cancelling the run");
                self.cancel.cancel();
                None
            }
            report = self.run() => Some(report),
        };
        if let Err(err) = self.connection.close().await {
            warn!("closing connection: {}", err);
        }
        outcome
    }

    async fn run_one(&self, requirement: &dyn Requirement) -> RequirementReport {
        let name = requirement.name();
        info!(requirement = name, "starting");
        let started = Instant::now();

        let results = match self.prepare(requirement).await {
            Ok(()) => {
                let caller = CallerContext::new(name)
                    .user_id("storecheck")
                    .user_agent(concat!("storecheck/", env!("CARGO_PKG_VERSION")));
                let actor = self
                    .connection
                    .actor(caller)
                    .with_cancellation(self.cancel.child_token());
                requirement.verify(&actor).await
            }
            Err(err) => {
                error!(requirement = name, "schema setup failed: {}", err);
                vec![TestResult::fail("schema", err.to_string())]
            }
        };

        let report = RequirementReport {
            name: name.to_string(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            results,
        };
        info!(
            requirement = name,
            steps = report.results.len(),
            failed = report.failed(),
            elapsed_ms = report.elapsed_ms,
            "finished"
        );
        report
    }

    async fn prepare(&self, requirement: &dyn Requirement) -> Result<()> {
        requirement.register(&self.connection)?;
        self.connection.sync_schema().wait().await?;
        Ok(())
    }
}
