use serde::Deserialize;

/// One recognized object.
///
/// Only `label` drives playback; position and confidence are carried for
/// logging.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Detection {
    pub label: String,
    #[serde(default)]
    pub confidence: f32,
    /// Bounding box (normalized 0..1 coordinates).
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub w: f32,
    #[serde(default)]
    pub h: f32,
}

impl Detection {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            confidence: 1.0,
            x: 0.0,
            y: 0.0,
            w: 0.0,
            h: 0.0,
        }
    }
}

/// All detections from one inference cycle, in detector order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionBatch {
    pub detections: Vec<Detection>,
}

impl DetectionBatch {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.detections.iter().any(|d| d.label == label)
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Parse one line of detector output.
    ///
    /// Accepts either a bare array of detections or an object with a
    /// `detections` array.
    pub fn parse_line(line: &str) -> serde_json::Result<Self> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Bare(Vec<Detection>),
            Wrapped { detections: Vec<Detection> },
        }

        let wire: Wire = serde_json::from_str(line)?;
        let detections = match wire {
            Wire::Bare(detections) => detections,
            Wire::Wrapped { detections } => detections,
        };
        Ok(Self { detections })
    }
}
