use crate::error::{ClockworkError, Result};
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

const LATEST_RELEASE_URL: &str =
    "https://api.github.com/repos/part-avocado/clockwork/releases/latest";
const BUNDLE_ASSET_SUFFIX: &str = ".app.zip";
const UPDATE_DIR_NAME: &str = "ClockworkUpdate";

/// Compare dotted version strings, ignoring any `-suffix`
///
/// "1.2.0" < "1.10.0", "1.2" < "1.2.1", "1.2.0-beta" == "1.2.0". Strings
/// without a single numeric component never compare as newer.
pub fn is_newer_version(current: &str, candidate: &str) -> bool {
    fn components(version: &str) -> Vec<u64> {
        version
            .split('-')
            .next()
            .unwrap_or_default()
            .split('.')
            .filter_map(|part| part.parse().ok())
            .collect()
    }

    let current = components(current);
    let candidate = components(candidate);

    if current.is_empty() || candidate.is_empty() {
        return false;
    }

    for (new, old) in candidate.iter().zip(current.iter()) {
        if new != old {
            return new > old;
        }
    }

    candidate.len() > current.len()
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

/// Result of asking the release feed for the latest version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    UpToDate,
    Available { version: String, download_url: String },
    /// Newer release without a downloadable bundle
    MissingAsset { version: String },
}

/// What the user gets told about updates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateState {
    pub update_available: bool,
    pub download_complete: bool,
    pub error_message: Option<String>,
    /// Extracted bundle once a download has completed
    pub downloaded_app_path: Option<PathBuf>,
}

/// Checks the release feed and stages newer bundles in a temp directory
pub struct UpdateManager {
    http: Client,
    releases_url: String,
    current_version: String,
    work_dir: PathBuf,
    state: UpdateState,
}

impl UpdateManager {
    /// Create a manager for the running build
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("clockwork/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self::with_settings(
            http,
            LATEST_RELEASE_URL,
            env!("CARGO_PKG_VERSION"),
            std::env::temp_dir().join(UPDATE_DIR_NAME),
        ))
    }

    pub fn with_settings(
        http: Client,
        releases_url: impl Into<String>,
        current_version: impl Into<String>,
        work_dir: PathBuf,
    ) -> Self {
        Self {
            http,
            releases_url: releases_url.into(),
            current_version: current_version.into(),
            work_dir,
            state: UpdateState::default(),
        }
    }

    /// Ask the release feed whether a newer build exists
    pub async fn check_for_updates(&self) -> Result<UpdateStatus> {
        let response = self
            .http
            .get(&self.releases_url)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClockworkError::UpdateError(format!(
                "Release feed returned status: {}",
                response.status()
            )));
        }

        let release: Release = response.json().await?;
        let version = release
            .tag_name
            .strip_prefix('v')
            .unwrap_or(&release.tag_name)
            .to_string();

        if !is_newer_version(&self.current_version, &version) {
            log::debug!("Running {}, latest release is {}", self.current_version, version);
            return Ok(UpdateStatus::UpToDate);
        }

        match release
            .assets
            .into_iter()
            .find(|asset| asset.name.ends_with(BUNDLE_ASSET_SUFFIX))
        {
            Some(asset) => {
                log::info!("Update available: {} -> {}", self.current_version, version);
                Ok(UpdateStatus::Available {
                    version,
                    download_url: asset.browser_download_url,
                })
            }
            None => {
                log::warn!("Release {} has no {} asset", version, BUNDLE_ASSET_SUFFIX);
                Ok(UpdateStatus::MissingAsset { version })
            }
        }
    }

    /// Download the archive into a fresh work directory
    pub async fn fetch_archive(&self, download_url: &str) -> Result<PathBuf> {
        if fs::try_exists(&self.work_dir).await? {
            fs::remove_dir_all(&self.work_dir).await?;
        }
        fs::create_dir_all(&self.work_dir).await?;

        let response = self.http.get(download_url).send().await?;
        if !response.status().is_success() {
            return Err(ClockworkError::UpdateError(format!(
                "Download returned status: {}",
                response.status()
            )));
        }

        let bytes = response.bytes().await?;
        let zip_path = self.work_dir.join("update.zip");
        fs::write(&zip_path, &bytes).await?;

        log::info!("Downloaded update archive ({} bytes)", bytes.len());
        Ok(zip_path)
    }

    /// Unpack the archive next to itself with the system `unzip`
    async fn extract_archive(&self, zip_path: &Path) -> Result<PathBuf> {
        let status = Command::new("unzip")
            .arg("-o")
            .arg(zip_path)
            .arg("-d")
            .arg(&self.work_dir)
            .status()
            .await?;

        if !status.success() {
            return Err(ClockworkError::UpdateError(format!(
                "unzip exited with {}",
                status
            )));
        }

        find_app_bundle(&self.work_dir).await?.ok_or_else(|| {
            ClockworkError::UpdateError("Archive contained no application bundle".to_string())
        })
    }

    /// Fetch and unpack a release, remembering where the bundle landed
    pub async fn download_update(&mut self, download_url: &str) -> Result<PathBuf> {
        let zip_path = self.fetch_archive(download_url).await?;
        let app_path = self.extract_archive(&zip_path).await?;

        log::info!("Update staged at {:?}", app_path);
        self.state.downloaded_app_path = Some(app_path.clone());
        Ok(app_path)
    }

    /// Full check-then-download cycle, folding errors into [`UpdateState`]
    pub async fn check_and_download(&mut self) -> &UpdateState {
        match self.check_for_updates().await {
            Ok(UpdateStatus::Available { download_url, .. }) => {
                self.state.update_available = true;
                self.state.error_message = None;

                match self.download_update(&download_url).await {
                    Ok(_) => self.state.download_complete = true,
                    Err(e) => {
                        log::warn!("Failed to download update: {}", e);
                        self.state.error_message = Some(format!("Failed to download update: {}", e));
                    }
                }
            }
            Ok(UpdateStatus::UpToDate) => {
                self.state = UpdateState::default();
            }
            Ok(UpdateStatus::MissingAsset { .. }) => {}
            Err(e) => {
                log::warn!("Failed to check for updates: {}", e);
                self.state.error_message = Some(format!("Failed to check for updates: {}", e));
            }
        }

        &self.state
    }

    /// Move the manager onto its own task, checking every `period` and
    /// whenever [`UpdateHandle::check_now`] is called
    pub fn spawn(mut self, period: Duration) -> UpdateHandle {
        let (check_tx, mut check_rx) = mpsc::channel(4);
        let (state_tx, state_rx) = watch::channel(self.state.clone());

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            log::info!("Started update checks ({:?} interval)", period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    request = check_rx.recv() => {
                        if request.is_none() {
                            break;
                        }
                    }
                }

                let state = self.check_and_download().await.clone();
                state_tx.send_replace(state);
            }

            log::info!("Update checks stopped");
        });

        UpdateHandle {
            check_tx,
            state_rx,
            task: Some(task),
        }
    }
}

/// Handle to a spawned [`UpdateManager`]; dropping it stops the task
pub struct UpdateHandle {
    check_tx: mpsc::Sender<()>,
    state_rx: watch::Receiver<UpdateState>,
    task: Option<JoinHandle<()>>,
}

impl UpdateHandle {
    /// Ask for a check outside the regular schedule
    pub fn check_now(&self) {
        // A full queue already has a check pending
        if let Err(mpsc::error::TrySendError::Closed(_)) = self.check_tx.try_send(()) {
            log::error!("Update task is gone, check request dropped");
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UpdateState> {
        self.state_rx.clone()
    }

    /// Stop checking and wait for the task to finish
    pub async fn shutdown(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for UpdateHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// First `*.app` entry directly inside `dir`
async fn find_app_bundle(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "app") {
            return Ok(Some(path));
        }
    }

    Ok(None)
}
