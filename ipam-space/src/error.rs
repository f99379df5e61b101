use ipam_types::Addr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpaceError {
    #[error("{0} is not within any range we currently own")]
    NotOwned(Addr),

    #[error("{0} is already taken")]
    AlreadyTaken(Addr),
}

pub type Result<T> = std::result::Result<T, SpaceError>;
