use crate::error::ModelLoadError;
use std::path::Path;
use tracing::{info, warn};

/// One named output copied out of an inference run.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    pub name: String,
    pub shape: Vec<i64>,
    pub data: Vec<f32>,
}

impl OutputTensor {
    pub fn last_dim(&self) -> i64 {
        self.shape.last().copied().unwrap_or(0)
    }
}

/// A loaded network taking a single NCHW f32 input.
///
/// Implementations are owned by exactly one worker, so `run` takes `&mut self`
/// and needs no internal locking.
pub trait InferenceModel: Send {
    fn run(&mut self, shape: [i64; 4], input: Vec<f32>) -> anyhow::Result<Vec<OutputTensor>>;
}

impl<M: InferenceModel + ?Sized> InferenceModel for Box<M> {
    fn run(&mut self, shape: [i64; 4], input: Vec<f32>) -> anyhow::Result<Vec<OutputTensor>> {
        (**self).run(shape, input)
    }
}

#[derive(Debug)]
pub enum ModelState<T> {
    Disabled,
    Loaded(T),
}

impl<T> ModelState<T> {
    pub fn is_enabled(&self) -> bool {
        matches!(self, ModelState::Loaded(_))
    }
}

/// Loads the network at `path`.
///
/// A missing path, a missing file, a corrupt model or a build without ONNX
/// support all give `Disabled` (logged once here). Only a broken runtime is
/// returned as an error.
pub fn load_model(
    path: Option<&Path>,
    label: &str,
) -> Result<ModelState<Box<dyn InferenceModel>>, ModelLoadError> {
    let Some(path) = path else {
        info!("No {} model configured; {} disabled", label, label);
        return Ok(ModelState::Disabled);
    };
    match open_session(path) {
        Ok(model) => {
            info!("{} model loaded from {:?}", label, path);
            Ok(ModelState::Loaded(model))
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("{} disabled: {}", label, e);
            Ok(ModelState::Disabled)
        }
    }
}

#[cfg(feature = "facial-recognition")]
fn open_session(path: &Path) -> Result<Box<dyn InferenceModel>, ModelLoadError> {
    if !path.exists() {
        return Err(ModelLoadError::Missing(path.to_path_buf()));
    }
    Ok(Box::new(onnx::OnnxModel::open(path)?))
}

#[cfg(not(feature = "facial-recognition"))]
fn open_session(path: &Path) -> Result<Box<dyn InferenceModel>, ModelLoadError> {
    if !path.exists() {
        return Err(ModelLoadError::Missing(path.to_path_buf()));
    }
    Err(ModelLoadError::Unsupported)
}

#[cfg(feature = "facial-recognition")]
mod onnx {
    use super::{InferenceModel, OutputTensor};
    use crate::error::ModelLoadError;
    use anyhow::Context;
    use ort::session::Session;
    use ort::value::Value;
    use std::path::Path;

    pub struct OnnxModel {
        session: Session,
        input_name: String,
    }

    impl OnnxModel {
        pub fn open(path: &Path) -> Result<Self, ModelLoadError> {
            let builder = Session::builder().map_err(|e| ModelLoadError::Runtime(e.to_string()))?;
            let session = builder.commit_from_file(path).map_err(|e| ModelLoadError::Corrupt {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            let input_name = session
                .inputs
                .first()
                .map(|i| i.name.clone())
                .ok_or_else(|| ModelLoadError::Corrupt {
                    path: path.to_path_buf(),
                    message: "model declares no inputs".to_string(),
                })?;
            Ok(Self { session, input_name })
        }
    }

    impl InferenceModel for OnnxModel {
        fn run(&mut self, shape: [i64; 4], input: Vec<f32>) -> anyhow::Result<Vec<OutputTensor>> {
            let input_name = self.input_name.clone();
            let input = Value::from_array((shape.to_vec(), input)).context("Failed to create input tensor")?;
            let outputs = self
                .session
                .run(ort::inputs![input_name => input])
                .context("Inference failed")?;
            let mut tensors = Vec::new();
            for (name, value) in outputs.iter() {
                let (shape, data) = value
                    .try_extract_tensor::<f32>()
                    .with_context(|| format!("Output '{}' is not an f32 tensor", name))?;
                tensors.push(OutputTensor {
                    name: name.to_string(),
                    shape: shape.to_vec(),
                    data: data.to_vec(),
                });
            }
            Ok(tensors)
        }
    }
}
