#![doc = include_str!("../README.md")]
#![warn(
    missing_docs,
    rustdoc::missing_crate_level_docs,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod certs;
pub mod client;
pub mod config;
pub mod error;
pub(crate) mod runtime;
pub mod server;
pub mod tls;
mod trace;

pub use crate::{
    certs::{CertificateGenerator, CertificateRequest, Format, GeneratedCertificates},
    client::{ClientProducer, Clients},
    config::{MongoClientConfig, Properties},
    error::{Error, ErrorKind, Result},
    server::{Mongod, MongodArguments, MongodOptions, MongodProcess},
    tls::{TlsConfiguration, TlsRegistry},
};

pub use ::mongodb;
