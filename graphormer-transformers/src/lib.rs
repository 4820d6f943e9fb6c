pub mod activations;

pub mod attention;

pub(crate) mod cow;

pub mod error;
pub use error::TransformerError;

pub mod layers;

pub mod models;

pub mod module;

pub mod traits;
