use thiserror::Error;

pub type TcResult<T> = Result<T, TcError>;

#[derive(Error, Debug)]
pub enum TcError {
    #[error("Non-finite numeric value for {what}: {value}")]
    NonFinite { what: &'static str, value: f64 },
}
