//! # Transfer Module
//!
//! Astrazione sui due endpoint del backend (presign + optimize) e sul download
//! degli output trasformati.
//!
//! - `api`: trait `TransformApi` e tipi wire JSON
//! - `http`: client `reqwest` verso il backend serverless
//! - `local`: backend in-process che esegue lo stesso resize+re-encode con `image`
//! - `memory`: fake in memoria con iniezione di errori, usato nei test

pub mod api;
pub mod http;
pub mod local;
pub mod memory;

pub use api::{ProgressCallback, TransformApi, TransformRequest, TransformResponse, UploadSlot};
pub use http::HttpApi;
pub use local::LocalBackend;
pub use memory::MemoryApi;
