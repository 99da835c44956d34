use async_trait::async_trait;
use quietinbox_domain::Launcher;
use quietinbox_error::InboxError;
use tokio::process::Command;
use tracing::info;
use url::Url;

/// Opens links with the platform's default handler.
#[derive(Debug, Clone, Default)]
pub struct SystemLauncher;

impl SystemLauncher {
    pub fn new() -> Self {
        Self
    }

    async fn open(&self, target: &Url) -> Result<(), InboxError> {
        let (program, args) = opener(std::env::consts::OS, target.as_str());
        let status = Command::new(program)
            .args(&args)
            .status()
            .await
            .map_err(|e| InboxError::internal(format!("launch {program}: {e}")))?;
        if !status.success() {
            return Err(InboxError::internal(format!("{program} exited with {status}")));
        }
        Ok(())
    }
}

/// Program and arguments that hand `target` to the default handler.
///
/// Links come from untrusted mail and must never pass through a shell.
fn opener(os: &str, target: &str) -> (&'static str, Vec<String>) {
    match os {
        "macos" => ("open", vec![target.to_string()]),
        "windows" => (
            "rundll32",
            vec!["url.dll,FileProtocolHandler".to_string(), target.to_string()],
        ),
        _ => ("xdg-open", vec![target.to_string()]),
    }
}

fn check_scheme(raw: &str, allowed: &[&str]) -> Result<Url, InboxError> {
    let url = Url::parse(raw).map_err(|e| InboxError::invalid_input(format!("bad link {raw}: {e}")))?;
    if !allowed.contains(&url.scheme()) {
        return Err(InboxError::invalid_input(format!(
            "refusing to open {} link",
            url.scheme()
        )));
    }
    Ok(url)
}

#[async_trait]
impl Launcher for SystemLauncher {
    async fn open_url(&self, url: &str) -> Result<(), InboxError> {
        let target = check_scheme(url, &["http", "https"])?;
        self.open(&target).await?;
        info!(url, "opened unsubscribe page");
        Ok(())
    }

    async fn open_mailto(&self, uri: &str) -> Result<(), InboxError> {
        let target = check_scheme(uri, &["mailto"])?;
        self.open(&target).await?;
        info!("handed unsubscribe request to mail client");
        Ok(())
    }
}
