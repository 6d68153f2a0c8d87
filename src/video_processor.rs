// src/video_processor.rs
//
// Frame I/O around the pipeline: an image-sequence source paired with the
// tracker output for each frame, and a writer for annotated frames.
//
// Detections come as JSON lines, one object per frame:
//   {"frame": 12, "rows": [[x1, y1, x2, y2, conf, class, id], ...], "drowsy": false}
// Frames without a line have no detections.

use crate::config::VideoConfig;
use crate::types::Frame;
use anyhow::{Context, Result};
use image::RgbImage;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FrameDetections {
    #[serde(default)]
    pub rows: Vec<Vec<f32>>,
    #[serde(default)]
    pub drowsy: bool,
}

#[derive(Debug, Deserialize)]
struct DetectionLine {
    frame: u64,
    #[serde(flatten)]
    detections: FrameDetections,
}

/// Parse a detections file. Malformed lines are skipped with a warning.
pub fn parse_detections(contents: &str) -> HashMap<u64, FrameDetections> {
    let mut by_frame = HashMap::new();
    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<DetectionLine>(line) {
            Ok(entry) => {
                by_frame.insert(entry.frame, entry.detections);
            }
            Err(e) => warn!("Skipping detections line {}: {}", line_no + 1, e),
        }
    }
    by_frame
}

pub struct VideoProcessor {
    config: VideoConfig,
}

impl VideoProcessor {
    pub fn new(config: VideoConfig) -> Self {
        Self { config }
    }

    /// Image files under the input directory, sorted by path.
    pub fn find_frame_files(&self) -> Result<Vec<PathBuf>> {
        let input = Path::new(&self.config.input_dir);
        if !input.is_dir() {
            anyhow::bail!("Frame directory {} does not exist", input.display());
        }

        let mut frames: Vec<PathBuf> = WalkDir::new(input)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        frames.sort();

        info!("Found {} frame files in {}", frames.len(), input.display());
        Ok(frames)
    }

    pub fn load_detections(&self) -> Result<HashMap<u64, FrameDetections>> {
        let path = Path::new(&self.config.detections_file);
        if !path.exists() {
            warn!("Detections file {} not found, running without objects", path.display());
            return Ok(HashMap::new());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read detections {}", path.display()))?;
        let detections = parse_detections(&contents);
        info!("Loaded detections for {} frames", detections.len());
        Ok(detections)
    }

    pub fn open(&self, fps: f32, frame_skip: u32) -> Result<FrameSource> {
        let files = self.find_frame_files()?;
        let detections = self.load_detections()?;
        Ok(FrameSource::new(files, detections, fps, frame_skip))
    }

    pub fn create_writer(&self) -> Result<Option<AnnotatedWriter>> {
        if !self.config.save_annotated {
            return Ok(None);
        }
        AnnotatedWriter::create(&self.config.output_dir).map(Some)
    }
}

pub struct SourceFrame {
    pub frame: Frame,
    pub detections: FrameDetections,
}

pub struct FrameSource {
    files: Vec<PathBuf>,
    detections: HashMap<u64, FrameDetections>,
    fps: f64,
    frame_skip: u64,
    next_index: u64,
}

impl FrameSource {
    pub fn new(
        files: Vec<PathBuf>,
        detections: HashMap<u64, FrameDetections>,
        fps: f32,
        frame_skip: u32,
    ) -> Self {
        Self {
            files,
            detections,
            fps: fps.max(f32::EPSILON) as f64,
            frame_skip: frame_skip.max(1) as u64,
            next_index: 0,
        }
    }

    pub fn total_frames(&self) -> usize {
        self.files.len()
    }

    /// Next frame to process, honouring the frame skip. `Ok(None)` at end of
    /// stream.
    pub fn read_frame(&mut self) -> Result<Option<SourceFrame>> {
        while (self.next_index as usize) < self.files.len() {
            let index = self.next_index;
            self.next_index += 1;
            if index % self.frame_skip != 0 {
                continue;
            }

            let path = &self.files[index as usize];
            let image = image::open(path)
                .with_context(|| format!("Failed to decode frame {}", path.display()))?
                .to_rgb8();
            debug!("Read frame {} from {}", index, path.display());

            return Ok(Some(SourceFrame {
                frame: Frame {
                    index,
                    timestamp_s: index as f64 / self.fps,
                    image,
                },
                detections: self.detections.remove(&index).unwrap_or_default(),
            }));
        }
        Ok(None)
    }

    pub fn progress(&self) -> f32 {
        if self.files.is_empty() {
            return 0.0;
        }
        (self.next_index as f32 / self.files.len() as f32) * 100.0
    }
}

pub struct AnnotatedWriter {
    output_dir: PathBuf,
    written: u64,
}

impl AnnotatedWriter {
    pub fn create(output_dir: impl AsRef<Path>) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create output dir {}", output_dir.display()))?;
        info!("Annotated frames -> {}", output_dir.display());
        Ok(Self {
            output_dir,
            written: 0,
        })
    }

    pub fn write(&mut self, frame_index: u64, image: &RgbImage) -> Result<PathBuf> {
        let path = self.output_dir.join(format!("frame_{:06}.png", frame_index));
        image
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        self.written += 1;
        Ok(path)
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_frames(dir: &Path, n: usize) {
        for i in 0..n {
            RgbImage::from_pixel(8, 6, Rgb([i as u8, 0, 0]))
                .save(dir.join(format!("f_{:03}.png", i)))
                .unwrap();
        }
        fs::write(dir.join("notes.txt"), "not a frame").unwrap();
    }

    #[test]
    fn test_parse_detections_skips_bad_lines() {
        let text = r#"{"frame": 0, "rows": [[1,2,3,4,0.9,2,7]]}
garbage
{"frame": 2, "drowsy": true}
"#;
        let d = parse_detections(text);
        assert_eq!(d.len(), 2);
        assert_eq!(d[&0].rows[0][6], 7.0);
        assert!(!d[&0].drowsy);
        assert!(d[&2].drowsy && d[&2].rows.is_empty());
    }

    #[test]
    fn test_source_reads_in_order_with_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);
        let processor = VideoProcessor::new(VideoConfig {
            input_dir: dir.path().display().to_string(),
            detections_file: dir.path().join("none.jsonl").display().to_string(),
            ..VideoConfig::default()
        });

        let mut source = processor.open(10.0, 1).unwrap();
        assert_eq!(source.total_frames(), 3);
        let mut seen = Vec::new();
        while let Some(f) = source.read_frame().unwrap() {
            assert_eq!(f.frame.image.get_pixel(0, 0)[0] as u64, f.frame.index);
            seen.push((f.frame.index, f.frame.timestamp_s));
        }
        assert_eq!(seen.len(), 3);
        assert!((seen[2].1 - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_frame_skip_and_detections_join() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 5);
        let mut detections = HashMap::new();
        detections.insert(
            2,
            FrameDetections {
                rows: vec![vec![0.0, 0.0, 5.0, 5.0, 0.9, 2.0, 1.0]],
                drowsy: false,
            },
        );
        let files = VideoProcessor::new(VideoConfig {
            input_dir: dir.path().display().to_string(),
            ..VideoConfig::default()
        })
        .find_frame_files()
        .unwrap();

        let mut source = FrameSource::new(files, detections, 30.0, 2);
        let mut indices = Vec::new();
        while let Some(f) = source.read_frame().unwrap() {
            if f.frame.index == 2 {
                assert_eq!(f.detections.rows.len(), 1);
            }
            indices.push(f.frame.index);
        }
        assert_eq!(indices, vec![0, 2, 4]);
    }

    #[test]
    fn test_missing_input_dir_errors() {
        let processor = VideoProcessor::new(VideoConfig {
            input_dir: "/definitely/not/a/dir".to_string(),
            ..VideoConfig::default()
        });
        assert!(processor.find_frame_files().is_err());
    }

    #[test]
    fn test_writer_saves_png() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = AnnotatedWriter::create(dir.path().join("out")).unwrap();
        let path = writer.write(7, &RgbImage::new(4, 4)).unwrap();
        assert!(path.ends_with("frame_000007.png"));
        assert!(path.is_file());
        assert_eq!(writer.written(), 1);
    }
}
