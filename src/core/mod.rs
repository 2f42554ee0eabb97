// Core modules implementing decoding, flattening, extraction, storage, and error modeling.
pub mod backup;
pub mod error;
pub mod extract;
pub mod flatten;
pub mod form;
pub mod geometry;
pub mod input;
pub mod secret_store;
pub mod table;
