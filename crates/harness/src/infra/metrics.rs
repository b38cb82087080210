use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use sysinfo::{Pid, System};

use super::plan::{ScenarioResult, StepStatus, TestPlan};

/// Process footprint at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_bytes: u64,
    pub cpu_percent: f32,
    pub system_memory_used_bytes: u64,
    pub system_memory_total_bytes: u64,
}

impl ResourceUsage {
    pub fn sample() -> Self {
        let mut system = System::new_all();
        system.refresh_all();

        let (memory_bytes, cpu_percent) = system
            .process(Pid::from_u32(std::process::id()))
            .map(|p| (p.memory(), p.cpu_usage()))
            .unwrap_or_default();

        Self {
            memory_bytes,
            cpu_percent,
            system_memory_used_bytes: system.used_memory(),
            system_memory_total_bytes: system.total_memory(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestMetrics {
    pub total_scenarios: usize,
    pub passed_scenarios: usize,
    pub failed_scenarios: usize,
    /// Steps that ran; skipped steps are not counted
    pub total_steps: usize,
    pub average_step_duration_ms: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    /// Share of scenarios requiring each service
    pub service_utilization: BTreeMap<String, f64>,
    pub resource_usage: ResourceUsage,
}

impl TestMetrics {
    pub fn compute(plan: &TestPlan, results: &[ScenarioResult], resource_usage: ResourceUsage) -> Self {
        let executed: Vec<_> = results
            .iter()
            .flat_map(|r| r.steps.iter())
            .filter(|s| s.status != StepStatus::Skipped)
            .collect();
        let total_steps = executed.len();
        let passed_steps = executed
            .iter()
            .filter(|s| s.status == StepStatus::Passed)
            .count();
        let total_duration: u64 = executed.iter().map(|s| s.duration_ms).sum();

        let ratio = |n: usize, d: usize| if d == 0 { 0.0 } else { n as f64 / d as f64 };

        let mut service_utilization = BTreeMap::new();
        for scenario in &plan.scenarios {
            for service in &scenario.required_services {
                *service_utilization.entry(service.clone()).or_insert(0.0) += 1.0;
            }
        }
        let scenario_count = plan.scenarios.len().max(1) as f64;
        for share in service_utilization.values_mut() {
            *share /= scenario_count;
        }

        let passed_scenarios = results.iter().filter(|r| r.passed()).count();
        Self {
            total_scenarios: results.len(),
            passed_scenarios,
            failed_scenarios: results.len() - passed_scenarios,
            total_steps,
            average_step_duration_ms: ratio(total_duration as usize, total_steps),
            success_rate: ratio(passed_steps, total_steps),
            error_rate: ratio(total_steps - passed_steps, total_steps),
            service_utilization,
            resource_usage,
        }
    }
}
