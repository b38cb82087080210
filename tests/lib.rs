//! Command-line runner for the test harness.
//!
//! Plans are YAML files describing scenarios, the services they need, mock
//! behaviors and the roles they authenticate as:
//!
//! ```no_run
//! use harness::{HarnessConfig, TestInfrastructureManager};
//! use harness_runner::PlanLoader;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let loader = PlanLoader::new("./tests/plans");
//! let plan = loader.load_plan_from_file("sample_plan.yaml")?;
//! loader.validate_plan(&plan)?;
//!
//! let manager = TestInfrastructureManager::new(HarnessConfig::default());
//! manager.start_services(None).await?;
//! let results = manager.orchestrate_test_execution(&plan).await?;
//! manager.handle_test_failures(&plan, &results.failures()).await;
//! manager.stop_services().await;
//! # Ok(())
//! # }
//! ```

pub mod plans {
    pub mod plan_loader;
}

pub use plans::plan_loader::{PlanLoader, PlanStats};
