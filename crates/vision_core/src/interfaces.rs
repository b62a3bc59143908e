use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("failed to read image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("frame {id} has {found} RGBA bytes, expected {expected} for {width}x{height}")]
    BadBuffer {
        id: u64,
        width: u32,
        height: u32,
        expected: usize,
        found: usize,
    },
    #[error("frame {0} has neither pixel data nor a path")]
    Empty(u64),
}

/// A frame of image data and associated metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: u64,
    /// Optional raw RGBA8 data; can be `None` when operating on file-based frames.
    pub rgba: Option<Vec<u8>>,
    /// Image dimensions (width, height).
    pub size: (u32, u32),
    /// Optional on-disk location for lazy loading.
    pub path: Option<PathBuf>,
}

impl Frame {
    pub fn from_image(id: u64, image: &RgbaImage, path: Option<PathBuf>) -> Self {
        Self {
            id,
            rgba: Some(image.as_raw().clone()),
            size: image.dimensions(),
            path,
        }
    }

    /// Decode `path` eagerly.
    pub fn open(id: u64, path: &Path) -> Result<Self, FrameError> {
        let image = image::open(path)
            .map_err(|source| FrameError::Image {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgba8();
        Ok(Self::from_image(id, &image, Some(path.to_path_buf())))
    }

    /// Pixel data as an image, reading from `path` when no buffer is held.
    pub fn to_rgba_image(&self) -> Result<RgbaImage, FrameError> {
        match (&self.rgba, &self.path) {
            (Some(buf), _) => {
                let (width, height) = self.size;
                let expected = width as usize * height as usize * 4;
                RgbaImage::from_raw(width, height, buf.clone()).ok_or(FrameError::BadBuffer {
                    id: self.id,
                    width,
                    height,
                    expected,
                    found: buf.len(),
                })
            }
            (None, Some(path)) => Ok(image::open(path)
                .map_err(|source| FrameError::Image {
                    path: path.clone(),
                    source,
                })?
                .to_rgba8()),
            (None, None) => Err(FrameError::Empty(self.id)),
        }
    }

    /// File name used when exporting results for this frame.
    pub fn file_name(&self) -> String {
        self.path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("frame_{:06}.png", self.id))
    }
}

/// Per-pixel classes for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationResult {
    pub frame_id: u64,
    pub width: u32,
    pub height: u32,
    /// Row-major class index per pixel.
    pub class_map: Vec<u8>,
    /// Share of pixels assigned to each class.
    pub class_fractions: Vec<f32>,
}

impl SegmentationResult {
    pub fn from_class_map(
        frame_id: u64,
        width: u32,
        height: u32,
        class_map: Vec<u8>,
        num_classes: usize,
    ) -> Self {
        let mut counts = vec![0usize; num_classes];
        for &c in &class_map {
            if let Some(slot) = counts.get_mut(c as usize) {
                *slot += 1;
            }
        }
        let total = class_map.len().max(1) as f32;
        Self {
            frame_id,
            width,
            height,
            class_fractions: counts.into_iter().map(|n| n as f32 / total).collect(),
            class_map,
        }
    }

    pub fn fraction(&self, class: usize) -> f32 {
        self.class_fractions.get(class).copied().unwrap_or(0.0)
    }
}

/// Pulls frames from some source (image folder, test generator).
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<Result<Frame, FrameError>>;
}

/// Frames from every `*.png` in a directory, sorted by name.
#[derive(Debug)]
pub struct ImageFolderSource {
    paths: std::vec::IntoIter<PathBuf>,
    next_id: u64,
}

impl ImageFolderSource {
    pub fn new(dir: &Path) -> Result<Self, FrameError> {
        let io_err = |source| FrameError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_png = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("png"));
            if path.is_file() && is_png {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(Self {
            paths: paths.into_iter(),
            next_id: 0,
        })
    }

    pub fn remaining(&self) -> usize {
        self.paths.len()
    }
}

impl FrameSource for ImageFolderSource {
    fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        let path = self.paths.next()?;
        let id = self.next_id;
        self.next_id += 1;
        Some(Frame::open(id, &path))
    }
}

/// Runs segmentation on a frame.
pub trait Segmenter {
    fn segment(&mut self, frame: &Frame) -> SegmentationResult;
    /// Optional: adjust the decision threshold at runtime.
    fn set_threshold(&mut self, _threshold: f32) {}
}
