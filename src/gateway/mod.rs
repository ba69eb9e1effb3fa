//! Admission gateway

mod admission;
mod builder;

pub use admission::{AdmissionGateway, AdmissionRequest, Admitted, Rejection};
pub use builder::{Portcullis, PortcullisBuilder};
