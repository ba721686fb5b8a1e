//! Sign-alphabet classification with an ONNX model.

use std::{fmt, path::Path};

use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use serde::Serialize;
use smallvec::SmallVec;
use tract_onnx::prelude::*;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;
type NnOut = SmallVec<[Arc<Tensor>; 4]>;

/// Ordered category names of the sign-alphabet model.
///
/// The position of a score in the model output selects the name at the same
/// index, so the order is significant.
pub const ASL_ALPHABET_LABELS: [&str; 29] = [
    "A", "B", "C", "D", "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R", "S",
    "T", "U", "V", "W", "X", "Y", "Z", "del", "nothing", "space",
];

/// Label reported when no category reaches the confidence threshold.
pub const UNDETERMINABLE_LABEL: &str = "Undeterminable";

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Side length of the square model input.
const INPUT_SIZE: u32 = 224;

pub trait InferModel {
    fn run(&self, frame: &DynamicImage) -> Result<Prediction>;
}

/// Best label of one classification cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

impl Default for Prediction {
    fn default() -> Self {
        Self {
            label: UNDETERMINABLE_LABEL.to_owned(),
            confidence: 0.0,
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Label: {}  Confidence: {:.2}", self.label, self.confidence)
    }
}

/// Loaded classifier with its label set and confidence threshold.
pub struct SignClassifier {
    model: NnModel,
    labels: Vec<String>,
    min_confidence: f32,
}

impl SignClassifier {
    /// Load the ONNX artifact and fix its input to a single NHWC image.
    pub fn load(
        path: impl AsRef<Path>,
        labels: Vec<String>,
        min_confidence: f32,
    ) -> Result<Self> {
        let path = path.as_ref();
        let input_fact = InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 224, 224, 3));
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to read model artifact {}", path.display()))?
            .with_input_fact(0, input_fact)?
            .into_optimized()?
            .into_runnable()?;

        Ok(Self {
            model,
            labels,
            min_confidence,
        })
    }

    fn postproc(&self, raw_nn_out: NnOut) -> Result<Prediction> {
        let output = raw_nn_out
            .first()
            .ok_or_else(|| anyhow!("model produced no output"))?
            .to_array_view::<f32>()?;
        let scores = output
            .as_slice()
            .ok_or_else(|| anyhow!("model output is not contiguous"))?;

        Ok(select_prediction(scores, &self.labels, self.min_confidence))
    }
}

impl InferModel for SignClassifier {
    fn run(&self, frame: &DynamicImage) -> Result<Prediction> {
        let input = preprocess_frame(frame, INPUT_SIZE);
        let raw_nn_out = self.model.run(tvec!(input))?;
        self.postproc(raw_nn_out)
    }
}

/// Convert a frame into the normalized `[1, size, size, 3]` NHWC tensor the
/// model expects.
///
/// Single-channel sources are expanded to RGB by replicating the channel.
pub fn preprocess_frame(frame: &DynamicImage, size: u32) -> Tensor {
    let rgb = frame.to_rgb8();
    let resized = image::imageops::resize(&rgb, size, size, image::imageops::FilterType::Triangle);

    tract_ndarray::Array4::from_shape_fn((1, size as usize, size as usize, 3), |(_, y, x, c)| {
        resized[(x as _, y as _)][c] as f32 / 255.0
    })
    .into()
}

/// Pick the best label from per-category scores.
///
/// The first maximum wins on ties. A best score below the threshold is
/// reported as undeterminable with a confidence of zero.
pub fn select_prediction(scores: &[f32], labels: &[String], min_confidence: f32) -> Prediction {
    let best = scores
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (index, &score)| {
            match best {
                Some((_, top)) if score <= top => best,
                _ => Some((index, score)),
            }
        });

    match best {
        Some((index, confidence)) if confidence >= min_confidence => match labels.get(index) {
            Some(label) => Prediction {
                label: label.clone(),
                confidence,
            },
            None => Prediction::default(),
        },
        _ => Prediction::default(),
    }
}

/// The label set as owned strings, ready to inject into a classifier.
pub fn asl_alphabet_labels() -> Vec<String> {
    ASL_ALPHABET_LABELS
        .iter()
        .map(|label| (*label).to_owned())
        .collect()
}
