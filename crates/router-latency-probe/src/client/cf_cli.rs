use crate::{
    Error, Result,
    client::credentials::{CredentialProvider, TargetIdentity},
    settings::CfSettings,
};
use async_trait::async_trait;
use std::{path::PathBuf, process::Stdio, time::Duration};
use tempfile::TempDir;
use tokio::{process::Command, time::timeout};
use tracing::{debug, info};
use uuid::Uuid;

const CF_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity provider backed by the `cf` command-line tool.
///
/// CLI state lives in a private `CF_HOME` that is removed on drop, so the
/// probe never touches the operator's own CLI session.
pub struct CfCli {
    binary: PathBuf,
    settings: CfSettings,
    home: TempDir,
}

impl CfCli {
    pub fn new(settings: CfSettings) -> Result<Self> {
        let home = tempfile::Builder::new()
            .prefix("router-probe-cf-")
            .tempdir()?;
        Ok(Self {
            binary: settings.binary.clone(),
            settings,
            home,
        })
    }

    pub async fn login(&self) -> Result<()> {
        let api_url = self.settings.api_url();
        let mut api = vec!["api", api_url.as_str()];
        if self.settings.skip_ssl_validation {
            api.push("--skip-ssl-validation");
        }
        self.run(&api, &[]).await?;

        self.run(
            &["auth"],
            &[
                ("CF_USERNAME", self.settings.username.as_str()),
                ("CF_PASSWORD", self.settings.password.as_str()),
            ],
        )
        .await?;

        self.run(
            &[
                "target",
                "-o",
                self.settings.org.as_str(),
                "-s",
                self.settings.space.as_str(),
            ],
            &[],
        )
        .await?;

        info!(
            api = %api_url,
            org = %self.settings.org,
            space = %self.settings.space,
            "logged in to cloud controller"
        );
        Ok(())
    }

    async fn run(&self, args: &[&str], envs: &[(&str, &str)]) -> Result<String> {
        let label = format!("cf {}", args.first().copied().unwrap_or_default());
        debug!(command = %label, "running cf cli");

        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .envs(envs.iter().copied())
            .env("CF_HOME", self.home.path())
            .env("CF_COLOR", "false")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(CF_TIMEOUT, command.output())
            .await
            .map_err(|_| Error::Command {
                command: label.clone(),
                reason: format!("timed out after {CF_TIMEOUT:?}"),
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Command {
                command: label,
                reason: format!("{}: {} {}", output.status, stdout.trim(), stderr.trim()),
            });
        }

        Ok(stdout)
    }
}

#[async_trait]
impl CredentialProvider for CfCli {
    async fn current_token(&self) -> Result<String> {
        let stdout = self.run(&["oauth-token"], &[]).await?;
        parse_token(&stdout).ok_or_else(|| Error::Command {
            command: "cf oauth-token".to_string(),
            reason: "no token in output".to_string(),
        })
    }

    async fn resolve_target(&self, app_name: &str) -> Result<TargetIdentity> {
        let guid_output = self.run(&["app", app_name, "--guid"], &[]).await?;
        let guid = parse_guid(&guid_output)?;

        let app_output = self.run(&["app", app_name], &[]).await?;
        let host = parse_route(&app_output).ok_or_else(|| {
            Error::StartupResolution(format!("could not find a route for app `{app_name}`"))
        })?;

        Ok(TargetIdentity {
            guid,
            url: format!("http://{host}"),
        })
    }
}

/// `cf oauth-token` prints progress lines before the token on older CLIs.
fn parse_token(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map(str::to_string)
}

fn parse_guid(stdout: &str) -> Result<Uuid> {
    let raw = stdout.trim();
    Uuid::parse_str(raw)
        .map_err(|_| Error::StartupResolution(format!("`{raw}` is not an application guid")))
}

/// First route from the `routes:` (or legacy `urls:`) line of `cf app`.
fn parse_route(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let line = line.trim_start();
        let value = line
            .strip_prefix("routes:")
            .or_else(|| line.strip_prefix("urls:"))?;
        value
            .split(',')
            .map(str::trim)
            .find(|route| !route.is_empty())
            .map(str::to_string)
    })
}
