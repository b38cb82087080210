use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::health::ServiceDefinition;

/// Starts and stops the processes behind service definitions.
#[async_trait]
pub trait ServiceController: Send + Sync {
    async fn start(&self, service: &ServiceDefinition) -> HarnessResult<()>;
    async fn stop(&self, service: &ServiceDefinition) -> HarnessResult<()>;
}

/// Spawns `start_command` and kills the child on stop. Services without a
/// command are assumed to be managed outside the harness.
#[derive(Default)]
pub struct CommandServiceController {
    children: Mutex<HashMap<String, Child>>,
}

impl CommandServiceController {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServiceController for CommandServiceController {
    async fn start(&self, service: &ServiceDefinition) -> HarnessResult<()> {
        let Some((program, args)) = service
            .start_command
            .as_deref()
            .and_then(|cmd| cmd.split_first())
        else {
            debug!(service_id = %service.id, "no start command, service is externally managed");
            return Ok(());
        };

        let mut children = self.children.lock().await;
        if let Some(child) = children.get_mut(&service.id) {
            if matches!(child.try_wait(), Ok(None)) {
                debug!(service_id = %service.id, "already running");
                return Ok(());
            }
        }

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HarnessError::ServiceStart {
                service_id: service.id.clone(),
                reason: format!("failed to spawn {program}: {e}"),
            })?;

        info!(service_id = %service.id, pid = ?child.id(), "🚀 Spawned service process");
        children.insert(service.id.clone(), child);
        Ok(())
    }

    async fn stop(&self, service: &ServiceDefinition) -> HarnessResult<()> {
        let Some(mut child) = self.children.lock().await.remove(&service.id) else {
            return Ok(());
        };

        if let Err(e) = child.kill().await {
            warn!(service_id = %service.id, error = %e, "kill failed");
            return Err(HarnessError::ServiceStop {
                service_id: service.id.clone(),
                reason: e.to_string(),
            });
        }
        info!(service_id = %service.id, "🛑 Service process stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ServiceType;

    #[tokio::test]
    async fn externally_managed_services_are_noops() {
        let controller = CommandServiceController::new();
        let service = ServiceDefinition::new("db", ServiceType::Database, "http://127.0.0.1:9/");
        controller.start(&service).await.expect("noop start");
        controller.stop(&service).await.expect("noop stop");
    }

    #[tokio::test]
    async fn missing_binary_is_a_start_error() {
        let controller = CommandServiceController::new();
        let service = ServiceDefinition::new("api", ServiceType::Api, "http://127.0.0.1:9/")
            .with_start_command(["definitely-not-a-real-binary-4f1c"]);
        let err = controller.start(&service).await.expect_err("spawn fails");
        assert!(matches!(err, HarnessError::ServiceStart { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawned_process_is_killed_on_stop() {
        let controller = CommandServiceController::new();
        let service = ServiceDefinition::new("sleeper", ServiceType::App, "http://127.0.0.1:9/")
            .with_start_command(["sleep", "30"]);
        controller.start(&service).await.expect("spawn sleep");
        assert!(controller.children.lock().await.contains_key("sleeper"));
        controller.stop(&service).await.expect("kill sleep");
        assert!(controller.children.lock().await.is_empty());
    }
}
