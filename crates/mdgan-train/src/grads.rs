use burn::{
    module::{AutodiffModule, ModuleVisitor, Param},
    prelude::Backend,
    tensor::{ElementConversion, Tensor, backend::AutodiffBackend},
};

/// Collects the gradients of every float parameter of a module into one flat vector.
struct FlattenGrads<'a, B: AutodiffBackend> {
    grads: &'a B::Gradients,
    parts: Vec<Tensor<B::InnerBackend, 1>>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for FlattenGrads<'_, B> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        if let Some(grad) = param.val().grad(self.grads) {
            self.parts.push(grad.flatten::<1>(0, D - 1));
        }
    }
}

/// All gradients of `module` concatenated, or `None` if no parameter received a gradient.
pub fn flat_grads<B: AutodiffBackend, M: AutodiffModule<B>>(
    module: &M,
    grads: &B::Gradients,
) -> Option<Tensor<B::InnerBackend, 1>> {
    let mut visitor = FlattenGrads::<B> {
        grads,
        parts: vec![],
    };
    module.visit(&mut visitor);
    (!visitor.parts.is_empty()).then(|| Tensor::cat(visitor.parts, 0))
}

pub fn dot<B: Backend>(a: Tensor<B, 1>, b: Tensor<B, 1>) -> f64 {
    (a * b).sum().into_scalar().elem::<f64>()
}

/// Gram matrix of a set of flat gradients.
pub fn gram_matrix<B: Backend>(grads: &[Tensor<B, 1>]) -> Vec<Vec<f64>> {
    let n = grads.len();
    let mut gram = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let value = dot(grads[i].clone(), grads[j].clone());
            gram[i][j] = value;
            gram[j][i] = value;
        }
    }
    gram
}
