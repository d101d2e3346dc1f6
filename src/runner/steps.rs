use std::future::Future;

use tracing::warn;

use super::TestResult;

/// Collects the named results of one requirement's verification.
pub struct Steps {
    requirement: &'static str,
    results: Vec<TestResult>,
}

impl Steps {
    pub fn new(requirement: &'static str) -> Self {
        Self {
            requirement,
            results: Vec::new(),
        }
    }

    /// Records `outcome` under `name`, returning the value on success so a
    /// later phase can build on it.
    pub fn record<T>(&mut self, name: &str, outcome: anyhow::Result<T>) -> Option<T> {
        match outcome {
            Ok(value) => {
                self.results.push(TestResult::pass(name));
                Some(value)
            }
            Err(err) => {
                warn!(requirement = self.requirement, step = name, "step failed: {:#}", err);
                self.results.push(TestResult::fail(name, format!("{:#}", err)));
                None
            }
        }
    }

    pub async fn step<T, F>(&mut self, name: &str, fut: F) -> Option<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let outcome = fut.await;
        self.record(name, outcome)
    }

    /// Marks a step that could not run because an earlier phase failed.
    pub fn skip(&mut self, name: &str, because: &str) {
        self.results
            .push(TestResult::fail(name, format!("skipped: {} failed", because)));
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.passed).count()
    }

    pub fn finish(self) -> Vec<TestResult> {
        self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_step_records_outcomes() {
        let mut steps = Steps::new("demo");
        let id = steps.step("create", async { Ok::<_, anyhow::Error>(7) }).await;
        assert_eq!(id, Some(7));
        let missing: Option<()> = steps.step("read", async { anyhow::bail!("not found") }).await;
        assert!(missing.is_none());
        steps.skip("update", "read");

        let results = steps.finish();
        assert_eq!(results.len(), 3);
        assert!(results[0].passed);
        assert_eq!(results[1].error.as_deref(), Some("not found"));
        assert!(!results[2].passed);
    }
}
