//! Camera acquisition. [`CameraController`] drives a stream through its
//! idle/live/captured/failed states and guarantees that every acquired
//! stream is stopped again, whichever exit path is taken. The device seam is
//! [`MediaDevices`]; [`command::CommandDevice`] backs it with a real grabber
//! process and [`fake::FakeDevices`] backs it for tests.

pub mod command;
pub mod fake;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::media::Frame;

/// Which way the requested camera points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    #[default]
    User,
    Environment,
}

impl Facing {
    pub fn flipped(self) -> Self {
        match self {
            Facing::User => Facing::Environment,
            Facing::Environment => Facing::User,
        }
    }
}

impl FromStr for Facing {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "user" | "front" => Ok(Facing::User),
            "environment" | "back" | "rear" => Ok(Facing::Environment),
            other => Err(Error::Other(format!("unknown camera facing: {other}"))),
        }
    }
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Facing::User => write!(f, "user"),
            Facing::Environment => write!(f, "environment"),
        }
    }
}

/// What to ask the device layer for. Width and height are ideals, not
/// guarantees; the stream reports what it actually delivers per frame.
#[derive(Debug, Clone)]
pub struct StreamConstraints {
    pub facing: Facing,
    pub ideal_width: u32,
    pub ideal_height: u32,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            facing: Facing::User,
            ideal_width: 1920,
            ideal_height: 1080,
        }
    }
}

/// One attachable video input, as listed by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInput {
    pub id: String,
    pub label: String,
    pub facing: Option<Facing>,
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire a live stream matching the constraints.
    async fn open(&self, constraints: &StreamConstraints) -> Result<Box<dyn VideoStream>>;

    /// List the available video inputs.
    async fn enumerate(&self) -> Result<Vec<VideoInput>>;
}

/// A live acquisition. Holders must call [`VideoStream::stop`] when done;
/// dropping without stopping leaves the device held.
#[async_trait]
pub trait VideoStream: Send + std::fmt::Debug {
    async fn grab_frame(&mut self) -> Result<Frame>;

    fn stop(&mut self);

    fn is_live(&self) -> bool;
}

/// Lifecycle of the capture surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraState {
    Idle,
    Live,
    Captured,
    /// Acquisition or grabbing failed; holds the user-facing message.
    Failed(String),
}

pub struct CameraController {
    devices: Arc<dyn MediaDevices>,
    constraints: StreamConstraints,
    stream: Option<Box<dyn VideoStream>>,
    state: CameraState,
}

impl CameraController {
    pub fn new(devices: Arc<dyn MediaDevices>, constraints: StreamConstraints) -> Self {
        Self {
            devices,
            constraints,
            stream: None,
            state: CameraState::Idle,
        }
    }

    pub fn state(&self) -> &CameraState {
        &self.state
    }

    pub fn facing(&self) -> Facing {
        self.constraints.facing
    }

    pub fn is_live(&self) -> bool {
        self.stream.is_some()
    }

    /// Acquire a stream. Any previously held stream is stopped first, so
    /// repeated starts never accumulate acquisitions.
    pub async fn start(&mut self) -> Result<()> {
        self.release();
        match self.devices.open(&self.constraints).await {
            Ok(stream) => {
                debug!(facing = %self.constraints.facing, "camera live");
                self.stream = Some(stream);
                self.state = CameraState::Live;
                Ok(())
            }
            Err(e) => {
                warn!("camera acquisition failed: {e}");
                self.state = CameraState::Failed(e.user_message());
                Err(e)
            }
        }
    }

    /// Current frame, mirrored the way the on-screen preview is.
    pub async fn preview_frame(&mut self) -> Result<Frame> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::Camera("camera is not live".into()))?;
        match stream.grab_frame().await {
            Ok(frame) => Ok(frame.mirrored()),
            Err(e) => {
                self.state = CameraState::Failed(e.user_message());
                self.release();
                Err(e)
            }
        }
    }

    /// Take the still: grab, mirror, encode as PNG, and hand back a data
    /// URL. The stream is stopped either way; a retake re-acquires.
    pub async fn capture(&mut self) -> Result<String> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::Camera("camera is not live".into()))?;
        let grabbed = stream.grab_frame().await;
        self.release();
        match grabbed {
            Ok(frame) => {
                let blob = frame.mirrored().to_png()?;
                self.state = CameraState::Captured;
                Ok(blob.to_data_url())
            }
            Err(e) => {
                warn!("frame grab failed: {e}");
                self.state = CameraState::Failed(e.user_message());
                Err(e)
            }
        }
    }

    /// Discard the captured still and go live again with a fresh stream.
    pub async fn retake(&mut self) -> Result<()> {
        self.start().await
    }

    /// Flip between user and environment. A live stream is stopped before
    /// the other camera is opened; when idle only the preference changes.
    pub async fn switch_facing(&mut self) -> Result<()> {
        let was_live = self.stream.is_some();
        self.release();
        self.constraints.facing = self.constraints.facing.flipped();
        if was_live { self.start().await } else { Ok(()) }
    }

    pub async fn inputs(&self) -> Result<Vec<VideoInput>> {
        self.devices.enumerate().await
    }

    /// Stop any held stream and return to idle.
    pub fn shutdown(&mut self) {
        self.release();
        self.state = CameraState::Idle;
    }

    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeDevices;
    use super::*;
    use crate::media::Blob;

    fn controller(fake: &Arc<FakeDevices>) -> CameraController {
        CameraController::new(fake.clone(), StreamConstraints::default())
    }

    #[tokio::test]
    async fn capture_stops_the_stream_and_yields_a_data_url() {
        let fake = Arc::new(FakeDevices::new());
        let mut cam = controller(&fake);

        cam.start().await.unwrap();
        assert_eq!(cam.state(), &CameraState::Live);
        assert_eq!(fake.live_streams(), 1);

        let data_url = cam.capture().await.unwrap();
        assert_eq!(cam.state(), &CameraState::Captured);
        assert_eq!(fake.live_streams(), 0);

        let blob = Blob::from_data_url(&data_url).unwrap();
        assert_eq!(blob.content_type, "image/png");
        assert!(!blob.is_empty());
    }

    #[tokio::test]
    async fn capture_mirrors_the_frame() {
        let fake = Arc::new(FakeDevices::new());
        let mut cam = CameraController::new(
            fake.clone(),
            StreamConstraints {
                ideal_width: 4,
                ideal_height: 2,
                ..StreamConstraints::default()
            },
        );
        cam.start().await.unwrap();
        let data_url = cam.capture().await.unwrap();

        let blob = Blob::from_data_url(&data_url).unwrap();
        let decoded = image::load_from_memory(&blob.bytes).unwrap().to_rgba8();
        let expected = fake.test_frame(4, 2).unwrap().mirrored();
        assert_eq!(decoded.into_raw(), expected.pixels().to_vec());
    }

    #[tokio::test]
    async fn permission_denial_fails_with_a_message_and_no_stream() {
        let fake = Arc::new(FakeDevices::new());
        fake.set_deny_permission(true);
        let mut cam = controller(&fake);

        let err = cam.start().await.unwrap_err();
        assert!(matches!(err, Error::CameraDenied));
        match cam.state() {
            CameraState::Failed(message) => assert!(message.contains("grant permissions")),
            other => panic!("expected failed state, got {other:?}"),
        }
        assert_eq!(fake.live_streams(), 0);

        // capture in a failed state reports, it does not panic
        assert!(cam.capture().await.is_err());
    }

    #[tokio::test]
    async fn retake_reacquires_a_fresh_stream() {
        let fake = Arc::new(FakeDevices::new());
        let mut cam = controller(&fake);

        cam.start().await.unwrap();
        cam.capture().await.unwrap();
        cam.retake().await.unwrap();

        assert_eq!(cam.state(), &CameraState::Live);
        assert_eq!(fake.streams_opened(), 2);
        assert_eq!(fake.live_streams(), 1);
    }

    #[tokio::test]
    async fn switching_facing_never_holds_two_streams() {
        let fake = Arc::new(FakeDevices::new());
        let mut cam = controller(&fake);

        cam.start().await.unwrap();
        assert_eq!(cam.facing(), Facing::User);

        cam.switch_facing().await.unwrap();
        assert_eq!(cam.facing(), Facing::Environment);
        assert_eq!(fake.live_streams(), 1);
        assert_eq!(fake.streams_opened(), 2);

        // idle switch only flips the preference
        cam.shutdown();
        cam.switch_facing().await.unwrap();
        assert_eq!(cam.facing(), Facing::User);
        assert_eq!(fake.streams_opened(), 2);
        assert_eq!(fake.live_streams(), 0);
    }

    #[tokio::test]
    async fn grab_failure_releases_the_stream() {
        let fake = Arc::new(FakeDevices::new());
        let mut cam = controller(&fake);
        cam.start().await.unwrap();

        fake.set_fail_grab(true);
        assert!(cam.capture().await.is_err());
        assert!(matches!(cam.state(), CameraState::Failed(_)));
        assert_eq!(fake.live_streams(), 0);
    }

    #[tokio::test]
    async fn dropping_a_live_controller_stops_the_stream() {
        let fake = Arc::new(FakeDevices::new());
        {
            let mut cam = controller(&fake);
            cam.start().await.unwrap();
            assert_eq!(fake.live_streams(), 1);
        }
        assert_eq!(fake.live_streams(), 0);
    }

    #[test]
    fn facing_parses_both_vocabularies() {
        assert_eq!("user".parse::<Facing>().unwrap(), Facing::User);
        assert_eq!("front".parse::<Facing>().unwrap(), Facing::User);
        assert_eq!("back".parse::<Facing>().unwrap(), Facing::Environment);
        assert!("sideways".parse::<Facing>().is_err());
    }
}
