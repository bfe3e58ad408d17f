/*!
 * Protocol implementations.
 */
pub mod composite;
pub mod legacy;

pub use composite::CompositeProtocol;
pub use legacy::LegacyProtocol;
