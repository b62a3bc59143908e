use burn::module::AutodiffModule;
use burn::optim::{Optimizer, SgdConfig};
use burn::tensor::activation::log_softmax;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;

/// Mean softmax cross-entropy between row-wise logits `[P, C]` and (soft) labels `[P, C]`.
pub fn cross_entropy_loss<B: Backend>(logits: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
    labels
        .mul(log_softmax(logits, 1))
        .sum_dim(1)
        .neg()
        .mean()
}

/// Flatten the decoder output and labels to one row per pixel and score them.
///
/// `last_layer` is `[N, C, H, W]`, `correct_label` is one-hot `[N, H, W, C]`.
/// Returns the pixel logits `[N*H*W, C]` (same row order as the labels) and the scalar loss.
pub fn optimize<B: Backend>(
    last_layer: Tensor<B, 4>,
    correct_label: Tensor<B, 4>,
    num_classes: usize,
) -> (Tensor<B, 2>, Tensor<B, 1>) {
    let [n, _, h, w] = last_layer.dims();
    let rows = n * h * w;
    let logits = last_layer
        .permute([0, 2, 3, 1])
        .reshape([rows, num_classes]);
    let labels = correct_label.reshape([rows, num_classes]);
    let loss = cross_entropy_loss(logits.clone(), labels);
    (logits, loss)
}

/// Plain gradient descent; the learning rate is supplied at each step.
pub fn gradient_descent<B: AutodiffBackend, M: AutodiffModule<B>>() -> impl Optimizer<M, B> {
    SgdConfig::new().init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;

    type B = burn_ndarray::NdArray<f32>;

    #[test]
    fn uniform_logits_cost_ln_classes() {
        let device = Default::default();
        let logits = Tensor::<B, 2>::zeros([4, 3], &device);
        let labels = Tensor::<B, 2>::from_data(
            TensorData::new(
                vec![1.0f32, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0],
                [4, 3],
            ),
            &device,
        );
        let loss = cross_entropy_loss(logits, labels).into_scalar();
        assert!((loss - 3f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn optimize_flattens_channels_last() {
        let device = Default::default();
        // [1, 2, 1, 2]: channel 0 = [1, 2], channel 1 = [3, 4]
        let last = Tensor::<B, 4>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [1, 2, 1, 2]),
            &device,
        );
        let labels = Tensor::<B, 4>::from_data(
            TensorData::new(vec![0.0f32, 1.0, 1.0, 0.0], [1, 1, 2, 2]),
            &device,
        );
        let (logits, loss) = optimize(last, labels, 2);
        assert_eq!(logits.dims(), [2, 2]);
        let rows = logits.into_data().to_vec::<f32>().unwrap();
        assert_eq!(rows, vec![1.0, 3.0, 2.0, 4.0]);
        // pixel 0 picks class 1 (logit gap +2), pixel 1 class 0 (gap -2)
        let expected = ((1.0 + (-2f32).exp()).ln() + (1.0 + 2f32.exp()).ln()) / 2.0;
        assert!((loss.into_scalar() - expected).abs() < 1e-5);
    }
}
