use std::fmt;

/// Ordered steps of a single scan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PipelineStage {
    Preprocessing,
    #[cfg_attr(feature = "serde", serde(rename = "extraction"))]
    FeatureExtraction,
    #[cfg_attr(feature = "serde", serde(rename = "matching"))]
    FeatureMatching,
    Mapping,
    PointCloud,
    Meshing,
    Storing,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 7] = [
        PipelineStage::Preprocessing,
        PipelineStage::FeatureExtraction,
        PipelineStage::FeatureMatching,
        PipelineStage::Mapping,
        PipelineStage::PointCloud,
        PipelineStage::Meshing,
        PipelineStage::Storing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Preprocessing => "preprocessing",
            PipelineStage::FeatureExtraction => "extraction",
            PipelineStage::FeatureMatching => "matching",
            PipelineStage::Mapping => "mapping",
            PipelineStage::PointCloud => "point_cloud",
            PipelineStage::Meshing => "meshing",
            PipelineStage::Storing => "storing",
        }
    }

    /// True for the three stages delegated to the external toolchain.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            PipelineStage::FeatureExtraction
                | PipelineStage::FeatureMatching
                | PipelineStage::Mapping
        )
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
