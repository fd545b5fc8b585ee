use serde::{Deserialize, Serialize};

/// Longest display name accepted for an identity, in characters.
pub const MAX_NAME_CHARS: usize = 8;

/// Axis-aligned bounding box for a detected face, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Area in square pixels; widened so large frames cannot overflow.
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// True when both sides reach `min_side`.
    pub fn meets_min_size(&self, min_side: u32) -> bool {
        self.width >= min_side && self.height >= min_side
    }

    /// Pick the face with the largest area. Ties keep the first one found.
    pub fn largest(faces: &[FaceBox]) -> Option<FaceBox> {
        let mut best: Option<FaceBox> = None;
        for face in faces {
            match best {
                Some(current) if face.area() <= current.area() => {}
                _ => best = Some(*face),
            }
        }
        best
    }
}

/// A captured grayscale camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    /// All-black frame, used when no capture has succeeded yet.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            data: vec![0; width as usize * height as usize],
            width,
            height,
            sequence: 0,
        }
    }
}

/// Fixed-length face feature vector produced by a [`FaceFeatureProvider`].
///
/// [`FaceFeatureProvider`]: crate::provider::FaceFeatureProvider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor(Vec<f32>);

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Cosine similarity in [-1, 1]; 0 when either vector has zero norm.
    pub fn similarity(&self, other: &Descriptor) -> f32 {
        crate::matcher::cosine_similarity(&self.0, &other.0)
    }

    /// Element-wise arithmetic mean of `samples`.
    ///
    /// Returns `None` for an empty slice.
    ///
    /// # Panics
    ///
    /// Panics if the samples do not all share the same length. The feature
    /// provider guarantees a fixed length for the process lifetime, so a
    /// mismatch is an internal consistency failure.
    pub fn mean(samples: &[Descriptor]) -> Option<Descriptor> {
        let first = samples.first()?;
        let dim = first.len();
        let mut sums = vec![0.0f64; dim];

        for sample in samples {
            assert_eq!(
                sample.len(),
                dim,
                "descriptor length mismatch while averaging samples"
            );
            for (sum, value) in sums.iter_mut().zip(sample.values()) {
                *sum += f64::from(*value);
            }
        }

        let count = samples.len() as f64;
        Some(Descriptor(
            sums.into_iter().map(|sum| (sum / count) as f32).collect(),
        ))
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// One enrolled identity as persisted in the template store.
///
/// The record id is the key of the persisted map and is carried alongside
/// the record by [`TemplateStore`](crate::store::TemplateStore), not inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub name: String,
    #[serde(alias = "features")]
    pub descriptor: Descriptor,
    #[serde(alias = "registration_time")]
    pub registered_at: String,
    #[serde(alias = "samples_count")]
    pub sample_count: u32,
    /// Fields written by other firmware revisions; kept so a rewrite does not drop them.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Check a display name against the 1..=8 character rule.
pub fn is_valid_name(name: &str) -> bool {
    let chars = name.chars().count();
    (1..=MAX_NAME_CHARS).contains(&chars) && !name.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_largest_face_prefers_area() {
        let faces = [
            FaceBox::new(0, 0, 90, 90),
            FaceBox::new(10, 10, 120, 100),
            FaceBox::new(5, 5, 100, 100),
        ];
        assert_eq!(FaceBox::largest(&faces), Some(FaceBox::new(10, 10, 120, 100)));
    }

    #[test]
    fn test_largest_face_tie_keeps_first() {
        let faces = [FaceBox::new(0, 0, 100, 80), FaceBox::new(50, 50, 80, 100)];
        assert_eq!(FaceBox::largest(&faces), Some(FaceBox::new(0, 0, 100, 80)));
    }

    #[test]
    fn test_largest_face_empty() {
        assert_eq!(FaceBox::largest(&[]), None);
    }

    #[test]
    fn test_min_size_needs_both_sides() {
        assert!(FaceBox::new(0, 0, 80, 80).meets_min_size(80));
        assert!(!FaceBox::new(0, 0, 79, 200).meets_min_size(80));
        assert!(!FaceBox::new(0, 0, 200, 79).meets_min_size(80));
    }

    #[test]
    fn test_mean_of_samples() {
        let samples = vec![
            Descriptor::new(vec![1.0, 2.0, 3.0]),
            Descriptor::new(vec![3.0, 2.0, 1.0]),
            Descriptor::new(vec![2.0, 5.0, -1.0]),
        ];
        let mean = Descriptor::mean(&samples).unwrap();
        let expected = [2.0, 3.0, 1.0];
        for (got, want) in mean.values().iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "got {got}, want {want}");
        }
    }

    #[test]
    fn test_mean_of_identical_samples_is_unchanged() {
        let samples = vec![Descriptor::new(vec![1.0, 0.0, 0.0]); 3];
        assert_eq!(Descriptor::mean(&samples), Some(Descriptor::new(vec![1.0, 0.0, 0.0])));
    }

    #[test]
    fn test_mean_of_nothing() {
        assert_eq!(Descriptor::mean(&[]), None);
    }

    #[test]
    #[should_panic(expected = "descriptor length mismatch")]
    fn test_mean_length_mismatch_is_fatal() {
        let samples = vec![Descriptor::new(vec![1.0, 0.0]), Descriptor::new(vec![1.0])];
        let _ = Descriptor::mean(&samples);
    }

    #[test]
    fn test_name_rules() {
        assert!(is_valid_name("Ada"));
        assert!(is_valid_name("赵钱孙李周吴郑王"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("   "));
        assert!(!is_valid_name("Ada Lovelace"));
    }

    #[test]
    fn test_record_accepts_legacy_field_names() {
        let json = r#"{
            "name": "Ada",
            "features": [0.5, 0.5],
            "registered_at": "(2024, 1, 1)",
            "samples_count": 1
        }"#;
        let record: IdentityRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.descriptor.values(), &[0.5, 0.5]);
        assert_eq!(record.sample_count, 1);
        assert!(record.extra.is_empty());
    }

    #[test]
    fn test_record_accepts_registration_time() {
        let json = r#"{
            "name": "Ada",
            "descriptor": [1.0, 0.0],
            "registration_time": "(2023, 1, 1)",
            "samples_count": 5
        }"#;
        let record: IdentityRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.registered_at, "(2023, 1, 1)");
        assert!(record.extra.is_empty());

        let written = serde_json::to_value(&record).unwrap();
        assert_eq!(written["registered_at"], "(2023, 1, 1)");
        assert!(written.get("registration_time").is_none());
    }

    #[test]
    fn test_record_keeps_unknown_fields() {
        let json = r#"{
            "name": "Ada",
            "descriptor": [1.0],
            "registered_at": "2024-01-01T00:00:00Z",
            "sample_count": 2,
            "badge": "A-17"
        }"#;
        let record: IdentityRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.extra.get("badge").and_then(|v| v.as_str()), Some("A-17"));

        let written = serde_json::to_value(&record).unwrap();
        assert_eq!(written["badge"], "A-17");
        assert_eq!(written["sample_count"], 2);
    }
}
