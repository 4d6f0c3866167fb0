//! # crf-core
//!
//! A library for training and applying first-order linear-chain
//! Conditional Random Fields over sequences of discrete items annotated
//! with sparse attributes.
//!
//! The crate is organized around the data flow described in its design
//! documentation: a caller builds a [`data::Dataset`] of labeled
//! [`data::Instance`]s, an [`encoder::Encoder`] turns it into a
//! [`features::FeatureTable`] and a [`context::Context`] for inference,
//! one of the [`train`] drivers (L-BFGS, SGD, averaged perceptron,
//! passive-aggressive, or AROW) fits a weight vector against that
//! encoder, and the result is written through [`model::ModelWriter`] to a
//! memory-mappable model file that [`tagger::Tagger`] later opens to
//! decode new instances.
//!
//! ```text
//! Dataset -> Encoder (features + Context) -> Trainer -> ModelWriter
//!                                                            |
//!                                                            v
//!                                            ModelReader -> Tagger -> labels
//! ```

pub mod config;
pub mod context;
pub mod data;
pub mod dictionary;
pub mod encoder;
pub mod error;
pub mod eval;
pub mod features;
pub mod logging;
pub mod model;
pub mod numeric;
pub mod tagger;
pub mod train;

pub use config::{ParamTable, ParamValue};
pub use data::{AttributeContent, Dataset, Instance, Item};
pub use dictionary::{Dictionary, VecDictionary};
pub use encoder::Encoder;
pub use error::{CrfError, Result};
pub use eval::Evaluation;
pub use features::{Feature, FeatureGenOptions, FeatureKind, FeatureTable};
pub use model::{ModelReader, ModelWriter};
pub use tagger::Tagger;
pub use train::{Algorithm, Trainer};
