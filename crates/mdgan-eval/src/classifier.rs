use std::path::Path;

use burn::{
    config::Config,
    module::{AutodiffModule, Module},
    nn::{
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::Backend,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::{
        Device, ElementConversion, Tensor,
        activation::{relu, softmax},
        backend::AutodiffBackend,
    },
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use mdgan_dataset::{DatasetKind, ImageDataset, batch_loader::BatchLoader};
use tracing::trace_span;

use crate::{
    EvalError,
    config::{ClassifierArch, ClassifierTrainConfig},
};

const CNN_WIDTHS: [usize; 3] = [32, 64, 128];

#[derive(Config, Debug)]
pub struct FidClassifierConfig {
    pub dataset: DatasetKind,
    pub arch: ClassifierArch,
    #[config(default = 0.3)]
    pub dropout: f64,
}

impl FidClassifierConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> FidClassifier<B> {
        let [channels, height, _] = self.dataset.dims();
        let num_classes = self.dataset.num_classes();
        let dropout = DropoutConfig::new(self.dropout).init();

        let (mlp, cnn) = match self.arch {
            ClassifierArch::Mlp => {
                let sizes = [self.dataset.image_len(), 512, 256, num_classes];
                let layers = sizes
                    .windows(2)
                    .map(|w| LinearConfig::new(w[0], w[1]).init(device))
                    .collect();
                (Some(MlpClassifier { layers, dropout }), None)
            }
            ClassifierArch::Cnn => {
                let mut in_channels = channels;
                let convs = CNN_WIDTHS
                    .iter()
                    .map(|&width| {
                        let conv = Conv2dConfig::new([in_channels, width], [3, 3])
                            .with_padding(PaddingConfig2d::Explicit(1, 1))
                            .init(device);
                        in_channels = width;
                        conv
                    })
                    .collect();
                // Every block halves the resolution.
                let size = height >> CNN_WIDTHS.len();
                let flat = in_channels * size * size;

                let cnn = CnnClassifier {
                    convs,
                    pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
                    fc: LinearConfig::new(flat, 256).init(device),
                    head: LinearConfig::new(256, num_classes).init(device),
                    dropout,
                };
                (None, Some(cnn))
            }
        };

        FidClassifier { mlp, cnn }
    }
}

#[derive(Module, Debug)]
pub struct MlpClassifier<B: Backend> {
    layers: Vec<Linear<B>>,
    dropout: Dropout,
}

impl<B: Backend> MlpClassifier<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images.flatten::<2>(1, 3);
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if i < last {
                x = self.dropout.forward(relu(x));
            }
        }
        x
    }
}

#[derive(Module, Debug)]
pub struct CnnClassifier<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
    fc: Linear<B>,
    head: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> CnnClassifier<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for conv in &self.convs {
            x = self.pool.forward(relu(conv.forward(x)));
        }
        let x = self.dropout.forward(relu(self.fc.forward(x.flatten::<2>(1, 3))));
        self.head.forward(x)
    }
}

/// Classifier whose logits serve as the feature space for FID.
#[derive(Module, Debug)]
pub struct FidClassifier<B: Backend> {
    mlp: Option<MlpClassifier<B>>,
    cnn: Option<CnnClassifier<B>>,
}

impl<B: Backend> FidClassifier<B> {
    /// Class logits for NCHW images in [-1, 1].
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        if let Some(mlp) = &self.mlp {
            mlp.forward(images)
        } else if let Some(cnn) = &self.cnn {
            cnn.forward(images)
        } else {
            unreachable!("Classifier has no body")
        }
    }

    /// p(y|x) for every image.
    pub fn probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }
}

/// Load arguments for a PyTorch checkpoint saved as `{"model_state": state_dict}`.
///
/// State dicts use the usual `conv1..3` and `fc1..3` layer names, optionally behind the
/// `module.` prefix left by `DataParallel`. Keys already in our layout pass through.
fn torch_load_args(path: &Path, arch: ClassifierArch) -> LoadArgs {
    let args = LoadArgs::new(path.to_path_buf())
        .with_top_level_key("model_state")
        .with_key_remap(r"^module\.(.*)", "$1");

    match arch {
        ClassifierArch::Mlp => args
            .with_key_remap(r"^fc1\.", "mlp.layers.0.")
            .with_key_remap(r"^fc2\.", "mlp.layers.1.")
            .with_key_remap(r"^fc3\.", "mlp.layers.2."),
        ClassifierArch::Cnn => args
            .with_key_remap(r"^conv1\.", "cnn.convs.0.")
            .with_key_remap(r"^conv2\.", "cnn.convs.1.")
            .with_key_remap(r"^conv3\.", "cnn.convs.2.")
            .with_key_remap(r"^fc1\.", "cnn.fc.")
            .with_key_remap(r"^fc2\.", "cnn.head."),
    }
}

/// Load classifier weights from a burn record or a PyTorch state dict.
pub fn load_classifier<B: Backend>(
    config: &FidClassifierConfig,
    path: &Path,
    device: &Device<B>,
) -> Result<FidClassifier<B>, EvalError> {
    let model = config.init::<B>(device);

    match path.extension().and_then(|e| e.to_str()) {
        Some("mpk") => {
            let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
            Ok(model.load_file(path.to_path_buf(), &recorder, device)?)
        }
        Some("pt" | "pth") => {
            let args = torch_load_args(path, config.arch);
            let record: FidClassifierRecord<B> =
                PyTorchFileRecorder::<FullPrecisionSettings>::default().load(args, device)?;
            Ok(model.load_record(record))
        }
        _ => Err(EvalError::UnsupportedModelFormat(path.to_path_buf())),
    }
}

pub fn save_classifier<B: Backend>(
    model: FidClassifier<B>,
    path: &Path,
) -> Result<(), EvalError> {
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model.save_file(path.to_path_buf(), &recorder)?;
    Ok(())
}

/// Fraction of correctly classified samples.
pub fn accuracy<B: Backend>(
    model: &FidClassifier<B>,
    dataset: &ImageDataset,
    batch_size: usize,
    device: &Device<B>,
) -> f32 {
    let mut correct = 0;
    for start in (0..dataset.len()).step_by(batch_size) {
        let end = (start + batch_size).min(dataset.len());
        let batch = dataset.batch::<B>(start..end, device);
        let predicted = model.forward(batch.images).argmax(1).flatten::<1>(0, 1);
        correct += predicted
            .equal(batch.labels)
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();
    }
    correct as f32 / dataset.len().max(1) as f32
}

/// Train a classifier from scratch with cross entropy and Adam.
///
/// Returns the trained model together with its accuracy on `test`.
pub async fn train_classifier<B: AutodiffBackend>(
    model_config: &FidClassifierConfig,
    config: &ClassifierTrainConfig,
    loader: &mut BatchLoader,
    test: &ImageDataset,
    device: &B::Device,
) -> (FidClassifier<B::InnerBackend>, f32) {
    let mut model = model_config.init::<B>(device);
    let mut optim = AdamConfig::new().init::<B, FidClassifier<B>>();
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let eval_batch = loader.batch_size();

    let mut test_accuracy = 0.0;
    for epoch in 0..config.classifier_epochs {
        let mut batches = loader.epoch::<B>(device);
        let mut total_loss = 0.0;
        let mut steps = 0;

        while let Some(batch) = batches.next_batch().await {
            let _span = trace_span!("Classifier step").entered();
            let loss = loss_fn.forward(model.forward(batch.images), batch.labels);
            total_loss += loss.clone().into_scalar().elem::<f32>();
            steps += 1;

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(config.classifier_lr, model, grads);
        }

        test_accuracy = accuracy(&model.valid(), test, eval_batch, device);
        log::info!(
            "Classifier epoch {}: loss {:.4}, test accuracy {:.2}%",
            epoch + 1,
            total_loss / steps.max(1) as f32,
            test_accuracy * 100.0
        );
    }

    (model.valid(), test_accuracy)
}
