use serde::{Deserialize, Serialize};

/// Expected file counts for one split of the road dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitCounts {
    pub calib: usize,
    pub image_2: usize,
    /// `None` for splits shipped without ground truth.
    pub gt_image_2: Option<usize>,
}

/// Directory layout under `<data_dir>/data_road`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetLayout {
    pub root_subdir: String,
    pub training: SplitCounts,
    pub testing: SplitCounts,
}

impl DatasetLayout {
    pub fn kitti_road() -> Self {
        Self {
            root_subdir: "data_road".to_string(),
            training: SplitCounts {
                calib: 289,
                image_2: 289,
                gt_image_2: Some(384),
            },
            testing: SplitCounts {
                calib: 290,
                image_2: 290,
                gt_image_2: None,
            },
        }
    }
}

impl Default for DatasetLayout {
    fn default() -> Self {
        Self::kitti_road()
    }
}
