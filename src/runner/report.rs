use std::fmt::Write as _;

use serde::Serialize;

/// Outcome of one named verification step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub error: Option<String>,
}

impl TestResult {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            error: None,
        }
    }

    pub fn fail(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            error: Some(msg.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RequirementReport {
    pub name: String,
    pub elapsed_ms: u64,
    pub results: Vec<TestResult>,
}

impl RequirementReport {
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.passed).count()
    }
}

/// Aggregate of a run. `failed_names` holds `requirement/step` for every
/// failed step in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub total: usize,
    pub failed: usize,
    pub failed_names: Vec<String>,
    pub requirements: Vec<RequirementReport>,
}

impl Report {
    pub fn push(&mut self, requirement: RequirementReport) {
        self.total += requirement.results.len();
        for result in requirement.results.iter().filter(|r| !r.passed) {
            self.failed += 1;
            self.failed_names.push(format!("{}/{}", requirement.name, result.name));
        }
        self.requirements.push(requirement);
    }

    pub fn passed(&self) -> bool {
        self.failed == 0
    }

    pub fn requirement(&self, name: &str) -> Option<&RequirementReport> {
        self.requirements.iter().find(|r| r.name == name)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for requirement in &self.requirements {
            let status = if requirement.failed() == 0 { "ok" } else { "FAIL" };
            let _ = writeln!(
                out,
                "{:<28} {:>4}  {} steps, {} ms",
                requirement.name,
                status,
                requirement.results.len(),
                requirement.elapsed_ms
            );
            for result in requirement.results.iter().filter(|r| !r.passed) {
                let _ = writeln!(
                    out,
                    "    - {}: {}",
                    result.name,
                    result.error.as_deref().unwrap_or("failed")
                );
            }
        }
        let _ = writeln!(out, "\nTotal: {} steps, {} failed", self.total, self.failed);
        out
    }
}
