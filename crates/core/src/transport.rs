//! The boundary between the driver and the block service.
//!
//! The driver only needs one primitive: post an encoded request and block
//! until the encoded response comes back. It assumes the exchange is
//! synchronous and lossless; a failed post fails the driver operation that
//! issued it and is never retried.

use crate::error::TransportError;

/// Synchronous request/response exchange with the block service.
pub trait Transport {
    /// Send `request` and wait for the service's response bytes.
    fn post(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError>;
}

impl<F> Transport for F
where
    F: FnMut(&[u8]) -> Result<Vec<u8>, TransportError>,
{
    fn post(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        self(request)
    }
}
