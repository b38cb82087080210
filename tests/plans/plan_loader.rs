use anyhow::{Context, Result};
use harness::infra::{StepAction, TestPlan, TestScenario, TestStep};
use harness::mocks::MockBehavior;
use harness::reliability::RetryConfig;
use harness::Role;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Timeouts above this are accepted but flagged
const LONG_TIMEOUT_MS: u64 = 30 * 60 * 1000;

/// Loads and validates test plans stored as YAML files in one directory.
pub struct PlanLoader {
    plans_dir: PathBuf,
}

/// Counts over every plan in the directory
#[derive(Debug, Clone, Default)]
pub struct PlanStats {
    pub total_plans: usize,
    pub total_scenarios: usize,
    pub total_steps: usize,
    pub parallel_plans: usize,
    pub by_role: BTreeMap<Role, usize>,
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

impl PlanLoader {
    pub fn new<P: AsRef<Path>>(plans_dir: P) -> Self {
        Self {
            plans_dir: plans_dir.as_ref().to_path_buf(),
        }
    }

    pub fn plans_dir(&self) -> &Path {
        &self.plans_dir
    }

    /// Loads one plan. Relative paths that do not exist as given are
    /// looked up in the plans directory.
    pub fn load_plan_from_file<P: AsRef<Path>>(&self, file: P) -> Result<TestPlan> {
        let file = file.as_ref();
        let path = if file.is_absolute() || file.exists() {
            file.to_path_buf()
        } else {
            self.plans_dir.join(file)
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
        let plan: TestPlan = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse plan file: {}", path.display()))?;

        info!(
            plan = %plan.id,
            scenarios = plan.scenarios.len(),
            path = %path.display(),
            "📁 Loaded test plan"
        );
        Ok(plan)
    }

    /// Every parseable plan in the directory, sorted by file name. Files
    /// that fail to parse are logged and skipped.
    pub fn load_all_plans(&self) -> Result<Vec<(PathBuf, TestPlan)>> {
        if !self.plans_dir.exists() {
            anyhow::bail!(
                "Plans directory does not exist: {}",
                self.plans_dir.display()
            );
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&self.plans_dir)
            .with_context(|| format!("Failed to list {}", self.plans_dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_yaml(path))
            .collect();
        files.sort();

        let mut plans = Vec::with_capacity(files.len());
        for path in files {
            match self.load_plan_from_file(&path) {
                Ok(plan) => plans.push((path, plan)),
                Err(e) => warn!(path = %path.display(), error = %format!("{e:#}"), "❌ Skipping plan file"),
            }
        }

        info!(plans = plans.len(), "📊 Plans loaded");
        Ok(plans)
    }

    pub fn plan_stats(&self) -> Result<PlanStats> {
        let plans = self.load_all_plans()?;
        let mut stats = PlanStats {
            total_plans: plans.len(),
            ..PlanStats::default()
        };

        for (_, plan) in &plans {
            if plan.parallel {
                stats.parallel_plans += 1;
            }
            stats.total_scenarios += plan.scenarios.len();
            for scenario in &plan.scenarios {
                stats.total_steps += scenario.steps.len();
                for role in &scenario.auth_requirements {
                    *stats.by_role.entry(*role).or_insert(0) += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Rejects plans the orchestrator cannot run meaningfully.
    pub fn validate_plan(&self, plan: &TestPlan) -> Result<()> {
        if plan.id.trim().is_empty() {
            anyhow::bail!("Plan has empty ID");
        }
        if plan.scenarios.is_empty() {
            anyhow::bail!("Plan '{}' has no scenarios", plan.id);
        }
        if plan.timeout_ms == 0 {
            anyhow::bail!("Plan '{}' has zero timeout", plan.id);
        }
        if plan.timeout_ms > LONG_TIMEOUT_MS {
            warn!(plan = %plan.id, timeout_ms = plan.timeout_ms, "⚠️ Plan has a very long timeout");
        }

        let mut ids = HashSet::new();
        for scenario in &plan.scenarios {
            if scenario.id.trim().is_empty() {
                anyhow::bail!("Plan '{}' has a scenario with empty ID", plan.id);
            }
            if !ids.insert(scenario.id.as_str()) {
                anyhow::bail!("Duplicate scenario ID in plan '{}': {}", plan.id, scenario.id);
            }
            if scenario.steps.is_empty() {
                anyhow::bail!("Scenario '{}' has no steps", scenario.id);
            }
            for step in &scenario.steps {
                if step.timeout_ms == Some(0) {
                    anyhow::bail!(
                        "Step '{}' in scenario '{}' has zero timeout",
                        step.name,
                        scenario.id
                    );
                }
            }
        }

        info!(plan = %plan.id, scenarios = plan.scenarios.len(), "✅ Plan validated");
        Ok(())
    }

    /// A small plan against the default local stack, used by `sample`.
    pub fn sample_plan(&self) -> TestPlan {
        TestPlan {
            id: "smoke".to_string(),
            name: "Local stack smoke test".to_string(),
            description: "Checks the api and a mocked payment provider".to_string(),
            parallel: false,
            timeout_ms: 60_000,
            retry_policy: RetryConfig::default(),
            scenarios: vec![
                TestScenario {
                    id: "api-health".to_string(),
                    name: "Api answers its health check".to_string(),
                    required_services: vec!["api".to_string()],
                    mock_behaviors: vec![],
                    auth_requirements: vec![Role::User],
                    steps: vec![TestStep {
                        name: "api is up".to_string(),
                        action: StepAction::CheckHealth {
                            service_id: "api".to_string(),
                        },
                        timeout_ms: None,
                    }],
                },
                TestScenario {
                    id: "payment-declined".to_string(),
                    name: "Payment provider declines the card".to_string(),
                    required_services: vec!["mockserver".to_string()],
                    mock_behaviors: vec![MockBehavior::new("payments", "POST", "/v1/charges", 402)
                        .with_body(json!({"error": "card_declined"}))],
                    auth_requirements: vec![],
                    steps: vec![TestStep {
                        name: "charge is declined".to_string(),
                        action: StepAction::Http {
                            method: "POST".to_string(),
                            url: format!("{}/v1/charges", harness::config::DEFAULT_MOCK_SERVER_URL),
                            headers: BTreeMap::new(),
                            body: Some(json!({"amount": 1000})),
                            expect_status: Some(402),
                            role: None,
                        },
                        timeout_ms: Some(5_000),
                    }],
                },
            ],
        }
    }

    /// Writes the sample plan into the plans directory unless the file
    /// already exists. Returns the path and whether it was written.
    pub fn write_sample_plan(&self, file_name: &str) -> Result<(PathBuf, bool)> {
        fs::create_dir_all(&self.plans_dir)
            .with_context(|| format!("Failed to create {}", self.plans_dir.display()))?;
        let path = self.plans_dir.join(file_name);
        if path.exists() {
            return Ok((path, false));
        }
        let yaml = serde_yaml::to_string(&self.sample_plan())?;
        fs::write(&path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok((path, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;
    use tempfile::tempdir;

    fn scenario(id: &str) -> TestScenario {
        TestScenario {
            id: id.to_string(),
            name: id.to_string(),
            required_services: vec![],
            mock_behaviors: vec![],
            auth_requirements: vec![],
            steps: vec![TestStep {
                name: "pause".to_string(),
                action: StepAction::Wait { ms: 1 },
                timeout_ms: None,
            }],
        }
    }

    #[test]
    fn test_sample_plan_is_valid() {
        let loader = PlanLoader::new("./plans");
        assert!(loader.validate_plan(&loader.sample_plan()).is_ok());
    }

    #[test]
    fn test_bundled_sample_file_parses() {
        let loader = PlanLoader::new(concat!(env!("CARGO_MANIFEST_DIR"), "/plans"));
        let plan = loader.load_plan_from_file("sample_plan.yaml").unwrap();

        assert_eq!(plan.id, "smoke");
        assert_eq!(plan.scenarios.len(), 2);
        assert_eq!(plan.scenarios[1].mock_behaviors[0].key(), "POST:/v1/charges");
        assert!(loader.validate_plan(&plan).is_ok());
    }

    #[test]
    fn test_duplicate_scenario_ids_are_rejected() {
        let loader = PlanLoader::new("./plans");
        let mut plan = loader.sample_plan();
        plan.scenarios = vec![scenario("login"), scenario("login")];

        let err = loader.validate_plan(&plan).unwrap_err();
        assert!(err.to_string().contains("Duplicate scenario ID"));
    }

    #[test]
    fn test_empty_steps_and_zero_timeout_are_rejected() {
        let loader = PlanLoader::new("./plans");

        let mut no_steps = loader.sample_plan();
        no_steps.scenarios[0].steps.clear();
        assert!(loader.validate_plan(&no_steps).is_err());

        let mut no_timeout = loader.sample_plan();
        no_timeout.timeout_ms = 0;
        assert!(loader.validate_plan(&no_timeout).is_err());
    }

    #[test]
    fn test_load_all_skips_broken_files() {
        let dir = tempdir().unwrap();
        let loader = PlanLoader::new(dir.path());
        loader.write_sample_plan("a.yaml").unwrap();
        write(dir.path().join("b.yaml"), "id: [unterminated").unwrap();
        write(dir.path().join("notes.txt"), "not a plan").unwrap();

        let plans = loader.load_all_plans().unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].1.id, "smoke");

        let stats = loader.plan_stats().unwrap();
        assert_eq!(stats.total_scenarios, 2);
        assert_eq!(stats.total_steps, 2);
        assert_eq!(stats.by_role[&Role::User], 1);
    }

    #[test]
    fn test_sample_is_not_overwritten() {
        let dir = tempdir().unwrap();
        let loader = PlanLoader::new(dir.path());

        let (path, written) = loader.write_sample_plan("sample.yaml").unwrap();
        assert!(written);
        let (_, again) = loader.write_sample_plan("sample.yaml").unwrap();
        assert!(!again);
        assert!(path.exists());
    }
}
