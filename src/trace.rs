pub(crate) const CERTS_TRACING_EVENT_TARGET: &str = "mongodb_tls_harness::certs";
pub(crate) const TLS_TRACING_EVENT_TARGET: &str = "mongodb_tls_harness::tls";
pub(crate) const SERVER_TRACING_EVENT_TARGET: &str = "mongodb_tls_harness::server";
pub(crate) const CLIENT_TRACING_EVENT_TARGET: &str = "mongodb_tls_harness::client";

pub(crate) trait TracingRepresentation {
    type Representation;

    fn tracing_representation(&self) -> Self::Representation;
}

impl TracingRepresentation for std::path::Path {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.display().to_string()
    }
}

impl TracingRepresentation for crate::error::Error {
    type Representation = String;

    fn tracing_representation(&self) -> String {
        self.to_string()
    }
}
