/*!
 * Transport abstraction.
 *
 * A transport owns the byte-level channel to one device and performs the
 * scheme-specific encryption and, where required, the authentication
 * handshake. The protocol layer above it only ever sees plaintext request
 * and reply buffers.
 */
use std::fmt::Debug;

use async_trait::async_trait;

use crate::error::Result;
use crate::recipe::TransportKind;

/// Byte-level channel to a device
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// The transport kind this instance implements
    fn kind(&self) -> TransportKind;

    /// Open the channel and perform the authentication handshake, if any
    ///
    /// Calling `connect` on an already-open transport is a no-op.
    async fn connect(&mut self) -> Result<()>;

    /// Send one plaintext request and await the plaintext reply
    async fn send(&mut self, request: &[u8]) -> Result<Vec<u8>>;

    /// Close the channel
    ///
    /// Must be safe to call on every exit path, including after a failed
    /// `connect` or `send`.
    async fn close(&mut self) -> Result<()>;
}

/// Symmetric encrypt/decrypt of one message buffer
///
/// The contract is deliberately narrow: given a key baked into the
/// implementation, turn a plaintext buffer into a wire buffer and back.
/// The cryptographic math of each scheme lives behind this seam.
pub trait Cipher: Send + Sync + Debug {
    /// Encrypt one plaintext buffer
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8>;

    /// Decrypt one wire buffer
    fn decrypt(&self, ciphertext: &[u8]) -> Vec<u8>;
}
