/// A `ParamGen` generates values for the initial state of a layer's parameters.
pub trait ParamGen {
    /// Samples exactly `n` parameters.
    fn sample(&mut self, n: usize) -> Vec<f32>;
}

impl<G: ParamGen + ?Sized> ParamGen for &mut G {
    fn sample(&mut self, n: usize) -> Vec<f32> {
        (**self).sample(n)
    }
}

impl<G: ParamGen + ?Sized> ParamGen for Box<G> {
    fn sample(&mut self, n: usize) -> Vec<f32> {
        (**self).sample(n)
    }
}
