pub(crate) mod process;
pub(crate) mod tls_rustls;

pub(crate) use self::{
    process::Process,
    tls_rustls::{load_certificates, load_private_key, make_rustls_config, tls_connect},
};
