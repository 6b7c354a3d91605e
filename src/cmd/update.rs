//! `idc-groups update`: replace the running binary with the latest release

use crate::cmd::progress;
use crate::error::{IdcError, Result};
use clap::Args;
use colored::Colorize;
use dialoguer::{Confirm, theme::ColorfulTheme};
use reqwest::Client;
use serde::Deserialize;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const LATEST_RELEASE_URL: &str =
    "https://api.github.com/repos/idc-groups/idc-groups/releases/latest";

const BINARY_NAME: &str = if cfg!(windows) {
    "idc-groups.exe"
} else {
    "idc-groups"
};

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Install without asking for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Only report whether a newer release exists
    #[arg(long)]
    pub check: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

impl Release {
    pub fn asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|a| a.name == name)
    }
}

/// Release asset for this build, e.g. `idc-groups_linux_x86_64.zip`
pub fn asset_name() -> String {
    format!(
        "idc-groups_{}_{}.zip",
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

fn version_parts(version: &str) -> Vec<u64> {
    version
        .trim()
        .trim_start_matches('v')
        .split(['.', '-', '+'])
        .map_while(|part| part.parse().ok())
        .collect()
}

/// Does release `tag` carry a higher version than `current`
pub fn is_newer(current: &str, tag: &str) -> bool {
    let (current, candidate) = (version_parts(current), version_parts(tag));
    !candidate.is_empty() && candidate > current
}

/// Talks to the release API
pub struct Updater {
    client: Client,
    release_url: String,
}

impl Updater {
    pub fn new(release_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            release_url: release_url.into(),
        })
    }

    pub async fn latest_release(&self) -> Result<Release> {
        let resp = self
            .client
            .get(&self.release_url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IdcError::Update(format!(
                "release lookup returned {}: {}",
                status,
                body.trim()
            )));
        }
        Ok(resp.json().await?)
    }

    /// Downloads an asset, reporting progress on a byte bar
    pub async fn download(&self, asset: &ReleaseAsset) -> Result<Vec<u8>> {
        let mut resp = self
            .client
            .get(&asset.browser_download_url)
            .header("Accept", "application/octet-stream")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(IdcError::Update(format!(
                "download of {} returned {}",
                asset.name, status
            )));
        }

        let total = resp.content_length().unwrap_or(asset.size);
        let bar = progress::create_download_bar(total, &format!("Downloading {}", asset.name));
        let mut bytes = Vec::with_capacity(total as usize);
        while let Some(chunk) = resp.chunk().await? {
            bytes.extend_from_slice(&chunk);
            bar.inc(chunk.len() as u64);
        }
        progress::finish_success(&bar, &format!("Downloaded {}", asset.name));
        Ok(bytes)
    }
}

/// Pulls the executable out of a release archive
pub fn extract_binary(archive: &[u8]) -> Result<Vec<u8>> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let matches = Path::new(entry.name())
            .file_name()
            .is_some_and(|name| name == BINARY_NAME);
        if !entry.is_dir() && matches {
            let mut contents = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut contents)?;
            return Ok(contents);
        }
    }
    Err(IdcError::Update(format!(
        "archive does not contain {}",
        BINARY_NAME
    )))
}

/// Writes `contents` next to `target`, then renames it into place
pub fn replace_binary(target: &Path, contents: &[u8]) -> Result<()> {
    let staged: PathBuf = target.with_extension("new");
    std::fs::write(&staged, contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o755))?;
    }

    if let Err(e) = std::fs::rename(&staged, target) {
        let _ = std::fs::remove_file(&staged);
        return Err(e.into());
    }
    Ok(())
}

async fn install(args: &UpdateArgs, updater: &Updater) -> Result<()> {
    let current = env!("CARGO_PKG_VERSION");

    let spinner = progress::create_spinner("Checking for updates...");
    let release = match updater.latest_release().await {
        Ok(release) => release,
        Err(e) => {
            progress::finish_error(&spinner, "Release lookup failed");
            return Err(e);
        }
    };

    if !is_newer(current, &release.tag_name) {
        progress::finish_success(&spinner, &format!("Already up to date (v{})", current));
        return Ok(());
    }
    progress::finish_success(
        &spinner,
        &format!("{} available (current v{})", release.tag_name, current),
    );

    if args.check {
        return Ok(());
    }

    let name = asset_name();
    let asset = release
        .asset(&name)
        .ok_or_else(|| IdcError::Update(format!("release has no asset {}", name)))?;

    if !args.yes
        && !Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Install {}?", release.tag_name))
            .default(true)
            .interact()?
    {
        println!("{}", "Update skipped".yellow());
        return Ok(());
    }

    let archive = updater.download(asset).await?;
    let binary = extract_binary(&archive)?;
    let target = std::env::current_exe()?;
    replace_binary(&target, &binary)?;

    info!(tag = %release.tag_name, path = %target.display(), "binary replaced");
    println!(
        "{} Updated to {}",
        "✓".green().bold(),
        release.tag_name.bold()
    );
    Ok(())
}

/// Failures are printed and logged; the process still exits cleanly
pub async fn run(args: UpdateArgs) -> Result<()> {
    let updater = Updater::new(LATEST_RELEASE_URL)?;
    if let Err(e) = install(&args, &updater).await {
        warn!(error = %e, "self-update failed");
        eprintln!("{} {}", "Update failed:".red().bold(), e);
    }
    Ok(())
}
