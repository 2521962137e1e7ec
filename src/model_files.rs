//! Model file provisioning.
//!
//! The detector needs three files: network weights, network config and the
//! class label list. Missing files are fetched over HTTP(S) before the model
//! is loaded, and loading itself happens on a background thread so the
//! capture loop keeps running meanwhile.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};

use crate::detect::{load_model_with, BackendRegistry, DetectionModel};
use crate::error::CameraError;

pub const DEFAULT_WEIGHTS_URL: &str = "https://pjreddie.com/media/files/yolov3.weights";
pub const DEFAULT_CONFIG_URL: &str =
    "https://raw.githubusercontent.com/pjreddie/darknet/master/cfg/yolov3.cfg";
pub const DEFAULT_LABELS_URL: &str =
    "https://raw.githubusercontent.com/pjreddie/darknet/master/data/coco.names";

const CHUNK_SIZE: usize = 64 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelFile {
    pub name: String,
    pub path: PathBuf,
    pub url: String,
    /// Expected lowercase hex SHA-256 of the downloaded bytes, if pinned.
    pub sha256: Option<String>,
}

impl ModelFile {
    pub fn new(name: &str, path: impl Into<PathBuf>, url: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.into(),
            url: url.to_string(),
            sha256: None,
        }
    }

    pub fn with_sha256(mut self, digest: &str) -> Self {
        self.sha256 = Some(digest.trim().to_lowercase());
        self
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelFiles {
    pub weights: ModelFile,
    pub config: ModelFile,
    pub labels: ModelFile,
}

impl ModelFiles {
    /// The default YOLOv3 / COCO file set, located in `dir`.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            weights: ModelFile::new("yolov3.weights", dir.join("yolov3.weights"), DEFAULT_WEIGHTS_URL),
            config: ModelFile::new("yolov3.cfg", dir.join("yolov3.cfg"), DEFAULT_CONFIG_URL),
            labels: ModelFile::new("coco.names", dir.join("coco.names"), DEFAULT_LABELS_URL),
        }
    }

    pub fn all(&self) -> [&ModelFile; 3] {
        [&self.weights, &self.config, &self.labels]
    }

    /// Files not present on disk, in weights/config/labels order.
    pub fn missing(&self) -> Vec<&ModelFile> {
        self.all().into_iter().filter(|file| !file.exists()).collect()
    }
}

impl Default for ModelFiles {
    fn default() -> Self {
        Self::in_dir(".")
    }
}

/// Progress of a single file download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadProgress {
    pub file: String,
    pub bytes_so_far: u64,
    /// From `Content-Length`; `None` when the server does not send it.
    pub total_bytes: Option<u64>,
}

/// Download every missing file. Files already on disk are left alone.
///
/// Each download streams into `<path>.part` and is renamed into place only
/// once complete (and verified, when a digest is pinned). There is no retry.
pub fn download_missing(
    files: &ModelFiles,
    progress: &mut dyn FnMut(DownloadProgress),
) -> Result<()> {
    for file in files.missing() {
        download_file(file, progress)?;
    }
    Ok(())
}

pub fn download_file(file: &ModelFile, progress: &mut dyn FnMut(DownloadProgress)) -> Result<()> {
    log::info!("downloading {} from {}", file.name, file.url);
    fetch(file, progress).map_err(|err| {
        let _ = fs::remove_file(part_path(&file.path));
        CameraError::Download {
            file: file.name.clone(),
            reason: format!("{:#}", err),
        }
        .into()
    })
}

fn fetch(file: &ModelFile, progress: &mut dyn FnMut(DownloadProgress)) -> Result<()> {
    check_url(&file.url)?;
    if let Some(parent) = file.path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
    }

    let agent = ureq::AgentBuilder::new()
        .timeout_connect(CONNECT_TIMEOUT)
        .timeout_read(READ_TIMEOUT)
        .build();
    let response = agent
        .get(&file.url)
        .call()
        .map_err(|err| anyhow!("request failed: {}", err))?;
    let total_bytes = response
        .header("Content-Length")
        .and_then(|value| value.trim().parse::<u64>().ok());

    let part = part_path(&file.path);
    let mut out =
        fs::File::create(&part).with_context(|| format!("create {}", part.display()))?;
    let mut reader = response.into_reader();
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut bytes_so_far = 0u64;
    progress(DownloadProgress {
        file: file.name.clone(),
        bytes_so_far,
        total_bytes,
    });
    loop {
        let read = reader.read(&mut buf).context("read response body")?;
        if read == 0 {
            break;
        }
        out.write_all(&buf[..read])
            .with_context(|| format!("write {}", part.display()))?;
        hasher.update(&buf[..read]);
        bytes_so_far += read as u64;
        progress(DownloadProgress {
            file: file.name.clone(),
            bytes_so_far,
            total_bytes,
        });
    }
    out.sync_all().context("flush download")?;
    drop(out);

    if let Some(total) = total_bytes {
        if bytes_so_far != total {
            return Err(anyhow!(
                "connection closed after {} of {} bytes",
                bytes_so_far,
                total
            ));
        }
    }
    if let Some(expected) = &file.sha256 {
        let actual = hex::encode(hasher.finalize());
        if &actual != expected {
            return Err(anyhow!("sha256 mismatch: expected {}, got {}", expected, actual));
        }
    }
    fs::rename(&part, &file.path)
        .with_context(|| format!("move {} into place", file.path.display()))?;
    log::info!("downloaded {} ({} bytes)", file.name, bytes_so_far);
    Ok(())
}

fn check_url(raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw).with_context(|| format!("invalid url {}", raw))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(anyhow!("unsupported url scheme '{}'", other)),
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Event published by a `ModelLoader`.
pub enum LoadEvent {
    Progress(DownloadProgress),
    Finished(Result<DetectionModel>),
}

/// Background model provisioning: download (optional) then load.
pub struct ModelLoader {
    rx: Receiver<LoadEvent>,
    worker: Option<JoinHandle<()>>,
    finished: bool,
}

impl ModelLoader {
    /// Fetch missing files (when `allow_download`) and load the model with
    /// the backends compiled into this build.
    ///
    /// `input_size` overrides the input geometry from the network config.
    pub fn spawn(files: ModelFiles, allow_download: bool, input_size: Option<(u32, u32)>) -> Self {
        Self::spawn_using(
            BackendRegistry::with_defaults(),
            files,
            allow_download,
            input_size,
        )
    }

    /// Like `spawn`, choosing the backend from `registry`.
    ///
    /// Nothing is downloaded unless `registry` has a backend for the weights
    /// file's extension.
    pub fn spawn_using(
        registry: BackendRegistry,
        files: ModelFiles,
        allow_download: bool,
        input_size: Option<(u32, u32)>,
    ) -> Self {
        Self::spawn_with(move |progress| {
            registry
                .ensure_supported(&files.weights.path)
                .map_err(|err| CameraError::model_load(format!("{:#}", err)))?;
            if allow_download {
                download_missing(&files, progress)?;
            } else if let Some(file) = files.missing().first() {
                return Err(CameraError::model_load(format!(
                    "{} not found at {} and downloads are disabled",
                    file.name,
                    file.path.display()
                ))
                .into());
            }
            load_model_with(
                &registry,
                &files.weights.path,
                &files.config.path,
                &files.labels.path,
                input_size,
            )
        })
    }

    /// Run an arbitrary provisioning job on the loader thread.
    pub fn spawn_with<F>(job: F) -> Self
    where
        F: FnOnce(&mut dyn FnMut(DownloadProgress)) -> Result<DetectionModel> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("model-loader".to_string())
            .spawn(move || {
                let progress_tx = tx.clone();
                let mut report = move |progress: DownloadProgress| {
                    let _ = progress_tx.send(LoadEvent::Progress(progress));
                };
                let result = job(&mut report);
                let _ = tx.send(LoadEvent::Finished(result));
            });
        match worker {
            Ok(handle) => Self {
                rx,
                worker: Some(handle),
                finished: false,
            },
            Err(err) => {
                let (tx, rx) = mpsc::channel();
                let _ = tx.send(LoadEvent::Finished(Err(CameraError::model_load(format!(
                    "spawn loader thread: {}",
                    err
                ))
                .into())));
                Self {
                    rx,
                    worker: None,
                    finished: false,
                }
            }
        }
    }

    /// Next pending event, without blocking.
    pub fn poll(&mut self) -> Option<LoadEvent> {
        if self.finished {
            return None;
        }
        match self.rx.try_recv() {
            Ok(event) => Some(self.observe(event)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(self.lost()),
        }
    }

    /// Block until the next event. Returns `None` once `Finished` was delivered.
    pub fn next_event(&mut self) -> Option<LoadEvent> {
        if self.finished {
            return None;
        }
        match self.rx.recv() {
            Ok(event) => Some(self.observe(event)),
            Err(_) => Some(self.lost()),
        }
    }

    /// Block until loading finishes, forwarding download progress to `progress`.
    pub fn wait(mut self, progress: &mut dyn FnMut(DownloadProgress)) -> Result<DetectionModel> {
        while let Some(event) = self.next_event() {
            match event {
                LoadEvent::Progress(p) => progress(p),
                LoadEvent::Finished(result) => return result,
            }
        }
        Err(CameraError::model_load("loader already finished").into())
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn observe(&mut self, event: LoadEvent) -> LoadEvent {
        if matches!(event, LoadEvent::Finished(_)) {
            self.finished = true;
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
            }
        }
        event
    }

    fn lost(&mut self) -> LoadEvent {
        self.finished = true;
        self.worker = None;
        LoadEvent::Finished(Err(CameraError::model_load("loader thread exited").into()))
    }
}
