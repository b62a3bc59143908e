use crate::ValidationError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassEntry {
    pub name: String,
    /// RGB colour marking this class in ground-truth images.
    pub label_color: [u8; 3],
    /// RGBA colour painted over the street image at inference; alpha 0 disables.
    pub overlay_color: [u8; 4],
}

/// Mapping between ground-truth colours, class indices and overlay colours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassPalette {
    pub classes: Vec<ClassEntry>,
    pub background_index: usize,
}

impl ClassPalette {
    /// KITTI road: pure red marks background, anything else is road.
    pub fn kitti_road() -> Self {
        Self {
            classes: vec![
                ClassEntry {
                    name: "background".to_string(),
                    label_color: [255, 0, 0],
                    overlay_color: [0, 0, 0, 0],
                },
                ClassEntry {
                    name: "road".to_string(),
                    label_color: [255, 0, 255],
                    overlay_color: [0, 255, 0, 127],
                },
            ],
            background_index: 0,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Class index for a ground-truth pixel.
    ///
    /// Exact colour matches win. With two classes an unmatched pixel is the
    /// non-background class, otherwise it falls back to background.
    pub fn class_for_color(&self, rgb: [u8; 3]) -> usize {
        if let Some(idx) = self.classes.iter().position(|c| c.label_color == rgb) {
            return idx;
        }
        if self.classes.len() == 2 {
            1 - self.background_index
        } else {
            self.background_index
        }
    }

    pub fn overlay_color(&self, class: usize) -> Option<[u8; 4]> {
        self.classes
            .get(class)
            .map(|c| c.overlay_color)
            .filter(|c| c[3] > 0)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let n = self.classes.len();
        if n < 2 {
            return Err(ValidationError::TooFewClasses(n));
        }
        if self.background_index >= n {
            return Err(ValidationError::BackgroundOutOfRange {
                index: self.background_index,
                classes: n,
            });
        }
        for (i, a) in self.classes.iter().enumerate() {
            if let Some(b) = self.classes[i + 1..]
                .iter()
                .find(|b| b.label_color == a.label_color)
            {
                return Err(ValidationError::DuplicateLabelColor {
                    color: a.label_color,
                    first: a.name.clone(),
                    second: b.name.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Default for ClassPalette {
    fn default() -> Self {
        Self::kitti_road()
    }
}
