/*!
 * Transport implementations.
 */
pub mod tcp;
pub mod xor;

pub use tcp::TcpTransport;
pub use xor::XorCipher;
