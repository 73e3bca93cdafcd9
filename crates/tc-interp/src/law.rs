/// Space in which node values are blended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterpolationLaw {
    /// Plain linear blending (fractions, potentials).
    Linear,
    /// Blend `asinh(v)`: logarithmic in magnitude, sign preserving and
    /// well defined through zero (net doping).
    Asinh,
}

impl InterpolationLaw {
    pub fn forward(self, v: f64) -> f64 {
        match self {
            InterpolationLaw::Linear => v,
            InterpolationLaw::Asinh => v.asinh(),
        }
    }

    pub fn inverse(self, t: f64) -> f64 {
        match self {
            InterpolationLaw::Linear => t,
            InterpolationLaw::Asinh => t.sinh(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            InterpolationLaw::Linear => "linear",
            InterpolationLaw::Asinh => "asinh",
        }
    }
}
