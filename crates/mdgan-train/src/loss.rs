use burn::{
    prelude::Backend,
    tensor::{Tensor, activation::relu},
};

// log(1 + e^x) as max(x, 0) + log(1 + e^-|x|), finite for any x.
fn softplus<B: Backend>(x: Tensor<B, 1>) -> Tensor<B, 1> {
    relu(x.clone()) + x.abs().neg().exp().log1p()
}

/// Binary cross entropy of sigmoid(logits) against a constant label.
pub fn bce_with_logits<B: Backend>(logits: Tensor<B, 1>, real: bool) -> Tensor<B, 1> {
    if real {
        softplus(logits.neg()).mean()
    } else {
        softplus(logits).mean()
    }
}
