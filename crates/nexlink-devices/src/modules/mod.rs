/*!
 * Built-in device modules.
 */
pub mod battery;
pub mod info;

pub use battery::BatteryModule;
pub use info::InfoModule;
