use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpError {
    #[error("No data filled for region {region}")]
    Empty { region: usize },

    #[error("Value vector length {len} does not match node count {nodes}")]
    Length { len: usize, nodes: usize },

    #[error("Non-finite value {value} at node {node}")]
    NonFinite { node: usize, value: f64 },

    #[error("Interpolator for {expected}D meshes cannot use a {found}D mesh")]
    Dimension { expected: usize, found: usize },
}

pub type InterpResult<T> = Result<T, InterpError>;
