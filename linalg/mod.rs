pub mod factorize;
pub mod faer_ndarray;

pub use factorize::{
    Factorization, FactorizationError, FactorizationOptions, Factorizer, SubspaceIteration,
};
