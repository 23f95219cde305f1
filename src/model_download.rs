use std::{
    env, fs,
    io::{Read, Write},
    path::{Component, Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, bail};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

const POSE_MODEL_FILENAME: &str = "yolo11n-pose.onnx";
const POSE_MODEL_URL: &str =
    "https://github.com/ultralytics/assets/releases/download/v8.3.0/yolo11n-pose.onnx";

pub fn default_pose_model_path() -> PathBuf {
    PathBuf::from("models").join(POSE_MODEL_FILENAME)
}

/// Absolute, with `.` segments dropped, so `./models/x` and `models/x` agree.
fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    absolute
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect()
}

fn is_default_model_path(path: &Path) -> bool {
    normalize(path) == normalize(&default_pose_model_path())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelDownloadEvent {
    AlreadyPresent,
    Started { total: Option<u64> },
    Progress { downloaded: u64, total: Option<u64> },
    Finished,
}

/// Makes sure the pose model exists at `model_path`. Only the default
/// location is downloaded automatically; a custom path has to exist already.
pub fn ensure_pose_model_ready<F>(model_path: &Path, mut on_event: F) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    if model_path.exists() {
        on_event(ModelDownloadEvent::AlreadyPresent);
        on_event(ModelDownloadEvent::Finished);
        return Ok(());
    }

    if !is_default_model_path(model_path) {
        bail!("pose model not found at {}", model_path.display());
    }

    if let Some(parent) = model_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create model directory {}", parent.display()))?;
    }

    let mut progress: Option<ProgressBar> = None;
    download_to_path(POSE_MODEL_URL, model_path, &mut |event| {
        match &event {
            ModelDownloadEvent::Started { total } => {
                progress = Some(create_progress_bar(*total));
            }
            ModelDownloadEvent::Progress { downloaded, .. } => {
                if let Some(pb) = progress.as_ref() {
                    pb.set_position(*downloaded);
                }
            }
            ModelDownloadEvent::Finished => {
                if let Some(pb) = progress.take() {
                    pb.finish_with_message("pose model ready");
                }
            }
            ModelDownloadEvent::AlreadyPresent => {}
        }
        on_event(event);
    })
}

fn download_to_path<F>(url: &str, dest: &Path, on_event: &mut F) -> anyhow::Result<()>
where
    F: FnMut(ModelDownloadEvent),
{
    log::info!("downloading pose model from {url} to {}", dest.display());

    let client = Client::new();
    let mut response = client
        .get(url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let total_size = response.content_length();
    on_event(ModelDownloadEvent::Started { total: total_size });

    let tmp_path = dest.with_extension("download");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; 16 * 1024];
    loop {
        let bytes_read = response
            .read(&mut buffer)
            .context("failed while reading model bytes")?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read])
            .context("failed while writing model to disk")?;
        downloaded += bytes_read as u64;
        on_event(ModelDownloadEvent::Progress {
            downloaded,
            total: total_size,
        });
    }

    file.sync_all()
        .context("failed to flush downloaded model to disk")?;
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to move temp model {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    on_event(ModelDownloadEvent::Finished);
    Ok(())
}

fn create_progress_bar(total_size: Option<u64>) -> ProgressBar {
    match total_size {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ) {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} downloading model") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_model_is_reported_present() {
        let dir = std::env::temp_dir().join(format!("pose-relay-model-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("custom.onnx");
        fs::write(&path, b"onnx").unwrap();

        let mut events = Vec::new();
        ensure_pose_model_ready(&path, |evt| events.push(evt)).unwrap();
        assert_eq!(
            events,
            vec![ModelDownloadEvent::AlreadyPresent, ModelDownloadEvent::Finished]
        );

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn default_location_matches_however_it_is_spelled() {
        assert!(is_default_model_path(&default_pose_model_path()));
        assert!(is_default_model_path(Path::new("./models/yolo11n-pose.onnx")));
        assert!(is_default_model_path(Path::new("models/./yolo11n-pose.onnx")));
        let absolute = env::current_dir().unwrap().join("models/yolo11n-pose.onnx");
        assert!(is_default_model_path(&absolute));

        assert!(!is_default_model_path(Path::new("other/yolo11n-pose.onnx")));
        assert!(!is_default_model_path(Path::new("models/yolov8n-pose.onnx")));
    }

    #[test]
    fn missing_custom_model_is_not_downloaded() {
        let path = std::env::temp_dir().join("pose-relay-definitely-missing.onnx");
        let mut events = Vec::new();
        let err = ensure_pose_model_ready(&path, |evt| events.push(evt)).unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(events.is_empty());
    }
}
