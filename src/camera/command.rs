//! Device layer backed by an external grabber command (fswebcam, ffmpeg,
//! whatever the host has). Each frame is one short-lived process writing an
//! encoded image to stdout, so the device is only held for the duration of a
//! grab.

use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::camera::{Facing, MediaDevices, StreamConstraints, VideoInput, VideoStream};
use crate::config::CameraConfig;
use crate::error::{Error, Result};
use crate::media::Frame;

pub struct CommandDevice {
    config: CameraConfig,
}

impl CommandDevice {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }

    fn device_for(&self, facing: Facing) -> &str {
        match facing {
            Facing::User => &self.config.user_device,
            Facing::Environment => &self.config.environment_device,
        }
    }

    fn facing_of(&self, path: &str) -> Option<Facing> {
        if path == self.config.user_device {
            Some(Facing::User)
        } else if path == self.config.environment_device {
            Some(Facing::Environment)
        } else {
            None
        }
    }
}

#[async_trait]
impl MediaDevices for CommandDevice {
    async fn open(&self, constraints: &StreamConstraints) -> Result<Box<dyn VideoStream>> {
        let Some(template) = &self.config.capture_command else {
            return Err(Error::Camera("no capture command configured".into()));
        };
        let device = self.device_for(constraints.facing);
        match tokio::fs::metadata(device).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(Error::CameraDenied);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::Camera(format!("video device not found: {device}")));
            }
            Err(e) => return Err(Error::Camera(format!("cannot access {device}: {e}"))),
        }
        let command = template.replace("{device}", device);
        // whitespace split, no shell quoting
        let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        if argv.is_empty() {
            return Err(Error::Camera("capture command is empty".into()));
        }
        debug!(device, "camera stream opened");
        Ok(Box::new(CommandStream { argv, live: true }))
    }

    async fn enumerate(&self) -> Result<Vec<VideoInput>> {
        let paths = glob::glob(&self.config.device_glob)
            .map_err(|e| Error::Camera(format!("bad device glob: {e}")))?;
        let mut inputs = Vec::new();
        for entry in paths {
            let path = entry.map_err(|e| Error::Camera(format!("device listing failed: {e}")))?;
            let id = path.display().to_string();
            let label = Path::new(&id)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&id)
                .to_string();
            let facing = self.facing_of(&id);
            inputs.push(VideoInput { id, label, facing });
        }
        Ok(inputs)
    }
}

#[derive(Debug)]
struct CommandStream {
    argv: Vec<String>,
    live: bool,
}

#[async_trait]
impl VideoStream for CommandStream {
    async fn grab_frame(&mut self) -> Result<Frame> {
        if !self.live {
            return Err(Error::Camera("stream is stopped".into()));
        }
        let output = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::PermissionDenied => Error::CameraDenied,
                ErrorKind::NotFound => {
                    Error::Camera(format!("capture command not found: {}", self.argv[0]))
                }
                _ => Error::Camera(format!("capture command failed to run: {e}")),
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().next().unwrap_or("no output").trim();
            return Err(Error::Camera(format!(
                "capture command exited with {}: {detail}",
                output.status
            )));
        }
        let decoded = image::load_from_memory(&output.stdout)
            .map_err(|e| Error::Camera(format!("cannot decode grabbed frame: {e}")))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        Frame::new(width, height, decoded.into_raw())
    }

    fn stop(&mut self) {
        // one-shot grabs hold the device only while the command runs
        self.live = false;
    }

    fn is_live(&self) -> bool {
        self.live
    }
}
