//! chrony adapter

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::config::{TimeSyncConfig, TimeSyncMode};
use crate::exec::CommandRunner;

use super::{template, TimeSyncError, TimeSyncManager, TimeSyncResult};

#[derive(Debug, Default)]
struct RenderState {
    /// Leader the staged follower configuration points at
    leader_ip: Option<String>,
    /// Staged file content
    rendered: Option<String>,
}

/// Renders `chrony.conf` and restarts chronyd
pub struct Chrony {
    mode: TimeSyncMode,
    servers: Vec<IpAddr>,
    config_path: PathBuf,
    service: String,
    runner: Arc<dyn CommandRunner>,
    state: Mutex<RenderState>,
}

impl Chrony {
    pub fn new(config: &TimeSyncConfig, runner: Arc<dyn CommandRunner>) -> TimeSyncResult<Self> {
        let servers = config
            .server_addrs()
            .map_err(TimeSyncError::InvalidServer)?;

        Ok(Self {
            mode: config.mode,
            servers,
            config_path: config.config_path.clone(),
            service: config.service.clone(),
            runner,
            state: Mutex::new(RenderState::default()),
        })
    }

    #[cfg(test)]
    fn config_path(&self) -> &std::path::Path {
        &self.config_path
    }

    /// Leader the staged configuration follows, if any
    #[cfg(test)]
    fn leader_ip(&self) -> Option<String> {
        self.state.lock().leader_ip.clone()
    }

    /// Currently staged content
    #[cfg(test)]
    fn rendered(&self) -> Option<String> {
        self.state.lock().rendered.clone()
    }

    async fn restart_service(&self) -> TimeSyncResult<()> {
        self.runner
            .run("systemctl", &["daemon-reload"])
            .await
            .map_err(|source| TimeSyncError::Command {
                step: "daemon-reload",
                source,
            })?;
        self.runner
            .run("systemctl", &["restart", &self.service])
            .await
            .map_err(|source| TimeSyncError::Command {
                step: "restart",
                source,
            })?;
        Ok(())
    }
}

#[async_trait]
impl TimeSyncManager for Chrony {
    fn render_leader(&self) -> TimeSyncResult<()> {
        let upstreams: &[IpAddr] = match self.mode {
            TimeSyncMode::Internal => &[],
            TimeSyncMode::External => &self.servers,
        };

        let mut state = self.state.lock();
        state.leader_ip = None;
        state.rendered = Some(template::leader(upstreams));
        info!(mode = %self.mode, upstreams = upstreams.len(), "rendered leader time-sync config");
        Ok(())
    }

    fn render_follower(&self, leader_ip: &str) -> TimeSyncResult<()> {
        let leader_ip = leader_ip.trim();
        if leader_ip.is_empty() {
            return Err(TimeSyncError::Validation(
                "leader IP must not be empty".to_string(),
            ));
        }

        let mut state = self.state.lock();
        state.leader_ip = Some(leader_ip.to_string());
        state.rendered = Some(template::follower(leader_ip));
        info!(leader = %leader_ip, "rendered follower time-sync config");
        Ok(())
    }

    async fn apply(&self) -> TimeSyncResult<()> {
        let content = self
            .state
            .lock()
            .rendered
            .clone()
            .ok_or(TimeSyncError::NotRendered)?;

        tokio::fs::write(&self.config_path, content)
            .await
            .map_err(|source| TimeSyncError::Write {
                path: self.config_path.clone(),
                source,
            })?;
        self.restart_service().await?;

        info!(
            path = %self.config_path.display(),
            service = %self.service,
            "time-sync config applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{command_line, CommandError, CommandResult};
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, program: &str, args: &[&str]) -> CommandResult<String> {
            let command = command_line(program, args);
            self.calls.lock().push(command.clone());
            if self.fail_on.is_some_and(|step| command.contains(step)) {
                return Err(CommandError::Failed {
                    command,
                    status: "exit status: 1".to_string(),
                    output: "Unit chronyd.service not found.".to_string(),
                });
            }
            Ok(String::new())
        }
    }

    fn config(dir: &tempfile::TempDir, mode: TimeSyncMode) -> TimeSyncConfig {
        TimeSyncConfig {
            mode,
            servers: vec!["192.168.1.1".to_string()],
            config_path: dir.path().join("chrony.conf"),
            service: "chronyd".to_string(),
        }
    }

    #[test]
    fn test_invalid_server() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir, TimeSyncMode::External);
        config.servers.push("time.example.com".to_string());
        let result = Chrony::new(&config, Arc::new(RecordingRunner::default()));
        assert!(matches!(
            result,
            Err(TimeSyncError::InvalidServer(e)) if e.to_string().contains("time.example.com")
        ));
    }

    #[test]
    fn test_render_leader_internal_omits_upstreams() {
        let dir = tempfile::tempdir().unwrap();
        let chrony = Chrony::new(
            &config(&dir, TimeSyncMode::Internal),
            Arc::new(RecordingRunner::default()),
        )
        .unwrap();

        chrony.render_leader().unwrap();
        assert_eq!(chrony.rendered().unwrap(), template::DIRECTIVES);
    }

    #[test]
    fn test_render_leader_clears_leader_ip() {
        let dir = tempfile::tempdir().unwrap();
        let chrony = Chrony::new(
            &config(&dir, TimeSyncMode::External),
            Arc::new(RecordingRunner::default()),
        )
        .unwrap();

        chrony.render_follower("10.0.0.10").unwrap();
        assert_eq!(chrony.leader_ip().as_deref(), Some("10.0.0.10"));

        chrony.render_leader().unwrap();
        assert_eq!(chrony.leader_ip(), None);
        assert!(chrony
            .rendered()
            .unwrap()
            .starts_with("server 192.168.1.1 iburst\n"));
    }

    #[test]
    fn test_render_follower_requires_leader() {
        let dir = tempfile::tempdir().unwrap();
        let chrony = Chrony::new(
            &config(&dir, TimeSyncMode::Internal),
            Arc::new(RecordingRunner::default()),
        )
        .unwrap();

        assert!(matches!(
            chrony.render_follower(""),
            Err(TimeSyncError::Validation(_))
        ));
        assert!(chrony.rendered().is_none());
    }

    #[tokio::test]
    async fn test_apply_without_render() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let chrony = Chrony::new(&config(&dir, TimeSyncMode::Internal), runner.clone()).unwrap();

        assert!(matches!(
            chrony.apply().await,
            Err(TimeSyncError::NotRendered)
        ));
        assert!(runner.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_apply_writes_then_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let chrony = Chrony::new(&config(&dir, TimeSyncMode::Internal), runner.clone()).unwrap();

        chrony.render_follower("10.0.0.10").unwrap();
        chrony.apply().await.unwrap();

        let written = std::fs::read_to_string(chrony.config_path()).unwrap();
        assert_eq!(written, template::follower("10.0.0.10"));
        assert_eq!(
            *runner.calls.lock(),
            vec![
                "systemctl daemon-reload".to_string(),
                "systemctl restart chronyd".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_reload_failure_skips_restart() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner {
            fail_on: Some("daemon-reload"),
            ..Default::default()
        });
        let chrony = Chrony::new(&config(&dir, TimeSyncMode::Internal), runner.clone()).unwrap();

        chrony.render_leader().unwrap();
        let err = chrony.apply().await.unwrap_err();
        assert!(matches!(
            err,
            TimeSyncError::Command {
                step: "daemon-reload",
                ..
            }
        ));
        assert_eq!(runner.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir, TimeSyncMode::Internal);
        config.config_path = dir.path().join("missing").join("chrony.conf");
        let runner = Arc::new(RecordingRunner::default());
        let chrony = Chrony::new(&config, runner.clone()).unwrap();

        chrony.render_leader().unwrap();
        assert!(matches!(
            chrony.apply().await,
            Err(TimeSyncError::Write { .. })
        ));
        assert!(runner.calls.lock().is_empty());
    }
}
