//! Scriptable in-memory device layer. Streams count their acquisitions and
//! stops, so tests can assert that no code path leaks a live stream. A
//! dropped-but-never-stopped stream intentionally stays counted as live.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::camera::{Facing, MediaDevices, StreamConstraints, VideoInput, VideoStream};
use crate::error::{Error, Result};
use crate::media::Frame;

#[derive(Debug, Default)]
struct StreamStats {
    opened: AtomicUsize,
    stopped: AtomicUsize,
}

pub struct FakeDevices {
    stats: Arc<StreamStats>,
    deny_permission: AtomicBool,
    fail_open: AtomicBool,
    fail_grab: Arc<AtomicBool>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(StreamStats::default()),
            deny_permission: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            fail_grab: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_deny_permission(&self, deny: bool) {
        self.deny_permission.store(deny, Ordering::SeqCst);
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_grab(&self, fail: bool) {
        self.fail_grab.store(fail, Ordering::SeqCst);
    }

    pub fn streams_opened(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst)
    }

    pub fn live_streams(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst) - self.stats.stopped.load(Ordering::SeqCst)
    }

    /// The deterministic pattern every fake stream produces, exposed so
    /// tests can compute expected pixels.
    pub fn test_frame(&self, width: u32, height: u32) -> Result<Frame> {
        test_pattern(width, height)
    }
}

impl Default for FakeDevices {
    fn default() -> Self {
        Self::new()
    }
}

/// Horizontally asymmetric so mirroring is observable.
fn test_pattern(width: u32, height: u32) -> Result<Frame> {
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            pixels.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, 42, 255]);
        }
    }
    Frame::new(width, height, pixels)
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn open(&self, constraints: &StreamConstraints) -> Result<Box<dyn VideoStream>> {
        if self.deny_permission.load(Ordering::SeqCst) {
            return Err(Error::CameraDenied);
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::Camera("no suitable device".into()));
        }
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            stats: self.stats.clone(),
            fail_grab: self.fail_grab.clone(),
            width: constraints.ideal_width,
            height: constraints.ideal_height,
            live: true,
        }))
    }

    async fn enumerate(&self) -> Result<Vec<VideoInput>> {
        Ok(vec![
            VideoInput {
                id: "fake-front".into(),
                label: "Fake front camera".into(),
                facing: Some(Facing::User),
            },
            VideoInput {
                id: "fake-rear".into(),
                label: "Fake rear camera".into(),
                facing: Some(Facing::Environment),
            },
        ])
    }
}

#[derive(Debug)]
struct FakeStream {
    stats: Arc<StreamStats>,
    fail_grab: Arc<AtomicBool>,
    width: u32,
    height: u32,
    live: bool,
}

#[async_trait]
impl VideoStream for FakeStream {
    async fn grab_frame(&mut self) -> Result<Frame> {
        if !self.live {
            return Err(Error::Camera("stream is stopped".into()));
        }
        if self.fail_grab.load(Ordering::SeqCst) {
            return Err(Error::Camera("frame grab failed".into()));
        }
        test_pattern(self.width, self.height)
    }

    fn stop(&mut self) {
        if self.live {
            self.live = false;
            self.stats.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_is_idempotent_in_the_counters() {
        let fake = FakeDevices::new();
        let mut stream = fake.open(&StreamConstraints::default()).await.unwrap();
        assert_eq!(fake.live_streams(), 1);

        stream.stop();
        stream.stop();
        assert_eq!(fake.live_streams(), 0);
        assert!(!stream.is_live());
        assert!(stream.grab_frame().await.is_err());
    }

    #[tokio::test]
    async fn dropping_without_stop_counts_as_a_leak() {
        let fake = FakeDevices::new();
        let stream = fake.open(&StreamConstraints::default()).await.unwrap();
        drop(stream);
        assert_eq!(fake.live_streams(), 1);
    }

    #[tokio::test]
    async fn enumeration_lists_both_facings() {
        let fake = FakeDevices::new();
        let inputs = fake.enumerate().await.unwrap();
        assert_eq!(inputs.len(), 2);
        assert!(inputs.iter().any(|i| i.facing == Some(Facing::User)));
        assert!(inputs.iter().any(|i| i.facing == Some(Facing::Environment)));
    }
}
