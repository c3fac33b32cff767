//! Event handlers that move files dropped in S3: one submits CSV
//! files to a SOAP intake webservice, the other copies exports into
//! the layout of an integration bucket. Both report by email.

pub mod client;
pub mod conf;
pub mod interpret;
pub mod mail;
pub mod notify;
pub mod relay;
pub mod response;
pub mod soap;
pub mod submit;
pub mod trigger;

#[cfg(test)]
mod testing;
