pub mod httpproxy;
pub mod tls_cert_delegation;

pub use self::{
    httpproxy::{HttpProxy, HttpProxySpec, HttpProxyStatus},
    tls_cert_delegation::{TlsCertificateDelegation, TlsCertificateDelegationSpec},
};
