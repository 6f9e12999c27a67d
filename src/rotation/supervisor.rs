// External process supervisor hook (PM2 by default)

use std::io;
use std::time::Duration;

/// Asks the external process supervisor to stop and restart the service.
/// Only used when rotation alone cannot fix an outage, and never invoked
/// automatically by the rotator.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    command: String,
    app_name: String,
    ecosystem_file: String,
}

impl ProcessSupervisor {
    pub fn new(
        command: impl Into<String>,
        app_name: impl Into<String>,
        ecosystem_file: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            app_name: app_name.into(),
            ecosystem_file: ecosystem_file.into(),
        }
    }

    /// Stop the app (stop errors are ignored, the app may not be running),
    /// wait for the supervisor to settle, then start it from the ecosystem
    /// file and wait for the process to come up.
    pub async fn restart(&self) -> io::Result<()> {
        tracing::info!("restarting {} via {}", self.app_name, self.command);

        if let Err(e) = self.run(&["stop", &self.app_name]) {
            tracing::debug!("{} stop failed (ignored): {}", self.command, e);
        }
        tokio::time::sleep(Duration::from_millis(1_000)).await;

        let output = self.run(&["start", &self.ecosystem_file])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!("{} start failed: {}", self.command, stderr.trim());
            return Err(io::Error::other(format!(
                "{} start exited with {}",
                self.command, output.status
            )));
        }

        tokio::time::sleep(Duration::from_millis(3_000)).await;
        tracing::info!("{} restarted", self.app_name);
        Ok(())
    }

    fn run(&self, args: &[&str]) -> io::Result<std::process::Output> {
        std::process::Command::new(&self.command).args(args).output()
    }
}
