use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaxosError {
    #[error("an observer does not propose values")]
    ObserverCannotPropose,
}

pub type Result<T> = std::result::Result<T, PaxosError>;
