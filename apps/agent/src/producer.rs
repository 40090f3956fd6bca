//! Frame producer that plays a directory of JPEG files in a loop.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bytes::Bytes;
use framecast_streamer::FrameProducer;

/// JPEG start-of-image marker.
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Cycles through the `*.jpg` / `*.jpeg` files of a directory in name order,
/// offering a new frame at most `frame_rate` times per second.
pub struct DirectoryProducer {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    frame_interval: Duration,
    last_frame: Option<Instant>,
    playing: bool,
}

impl DirectoryProducer {
    pub fn new(dir: impl Into<PathBuf>, frame_rate: u32) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
            next: 0,
            frame_interval: Duration::from_secs(1) / frame_rate.max(1),
            last_frame: None,
            playing: false,
        }
    }
}

impl FrameProducer for DirectoryProducer {
    fn start(&mut self) -> bool {
        match list_jpegs(&self.dir) {
            Ok(files) if files.is_empty() => {
                tracing::warn!(dir = %self.dir.display(), "no JPEG files found");
                false
            }
            Ok(files) => {
                tracing::info!(dir = %self.dir.display(), count = files.len(), "frame directory loaded");
                self.files = files;
                self.next = 0;
                self.last_frame = None;
                self.playing = true;
                true
            }
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), "failed to read frame directory: {e}");
                false
            }
        }
    }

    fn stop(&mut self) {
        self.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn has_new_frame(&self) -> bool {
        !self.files.is_empty()
            && self
                .last_frame
                .is_none_or(|at| at.elapsed() >= self.frame_interval)
    }

    fn encode_jpeg(&mut self) -> Option<Bytes> {
        let path = self.files.get(self.next)?.clone();
        self.next = (self.next + 1) % self.files.len();
        self.last_frame = Some(Instant::now());

        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to read frame: {e}");
                return None;
            }
        };
        if !data.starts_with(&JPEG_SOI) {
            tracing::warn!(path = %path.display(), "not a JPEG file, skipping");
            return None;
        }
        Some(Bytes::from(data))
    }
}

fn list_jpegs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_jpeg = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
        if is_jpeg && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, data: &[u8]) {
        std::fs::write(dir.join(name), data).unwrap();
    }

    fn jpeg(tag: u8) -> Vec<u8> {
        vec![0xFF, 0xD8, tag, 0xFF, 0xD9]
    }

    #[test]
    fn plays_jpegs_in_name_order_and_loops() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "b.jpeg", &jpeg(2));
        write(tmp.path(), "a.jpg", &jpeg(1));
        write(tmp.path(), "c.JPG", &jpeg(3));
        write(tmp.path(), "notes.txt", b"ignored");

        // High rate so the throttle never blocks the test.
        let mut producer = DirectoryProducer::new(tmp.path(), 1_000_000);
        assert!(!producer.is_playing());
        assert!(producer.start());
        assert!(producer.is_playing());

        let tags: Vec<u8> = (0..4)
            .map(|_| producer.encode_jpeg().unwrap()[2])
            .collect();
        assert_eq!(tags, vec![1, 2, 3, 1]);

        producer.stop();
        assert!(!producer.is_playing());
    }

    #[test]
    fn start_fails_without_frames() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "readme.md", b"no frames here");

        let mut producer = DirectoryProducer::new(tmp.path(), 30);
        assert!(!producer.start());
        assert!(!producer.has_new_frame());
    }

    #[test]
    fn start_fails_for_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let mut producer = DirectoryProducer::new(tmp.path().join("missing"), 30);
        assert!(!producer.start());
    }

    #[test]
    fn frame_rate_throttles_new_frames() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.jpg", &jpeg(1));

        let mut producer = DirectoryProducer::new(tmp.path(), 1);
        assert!(producer.start());
        assert!(producer.has_new_frame());
        producer.encode_jpeg().unwrap();
        assert!(!producer.has_new_frame());
    }

    #[test]
    fn skips_files_without_jpeg_marker() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "a.jpg", b"PNG? no");
        write(tmp.path(), "b.jpg", &jpeg(2));

        let mut producer = DirectoryProducer::new(tmp.path(), 1_000_000);
        assert!(producer.start());
        assert!(producer.encode_jpeg().is_none());
        assert_eq!(producer.encode_jpeg().unwrap()[2], 2);
    }
}
