/*!
 * Connection recipes.
 *
 * A [`ConnectionRecipe`] is one candidate combination of protocol kind,
 * transport kind, device family and HTTPS flag. Negotiation walks a fixed,
 * deterministic candidate list and settles on the first recipe that yields
 * a working session; the winning recipe is also usable as a cache key for
 * "last successful recipe per host".
 */
use std::fmt;

use serde::{Deserialize, Serialize};

/// Application-level request framing understood by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolKind {
    /// Envelope protocol: fragments travel as one `multiple_request` batch
    Composite,
    /// Single-object protocol: fragments merge into one nested request
    Legacy,
}

/// Byte-level channel and encryption scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Handshake-authenticated session transport (newest firmwares)
    Session,
    /// AES-encrypted request/response transport
    Aes,
    /// Autokey-XOR obfuscated transport (oldest firmwares)
    Xor,
}

/// Broad device family, used to pick the module catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceFamily {
    /// Hub with attached child devices
    Hub,
    /// Plug, switch or similar single-endpoint device
    Plug,
    /// Camera-class device
    Camera,
    /// Family not yet determined
    Unknown,
}

/// One candidate combination tried during connection negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionRecipe {
    /// The application protocol kind
    pub protocol: ProtocolKind,
    /// The transport kind
    pub transport: TransportKind,
    /// The device family
    pub family: DeviceFamily,
    /// Whether the transport runs over HTTPS/TLS
    pub https: bool,
}

impl ConnectionRecipe {
    /// Create a new recipe
    pub fn new(
        protocol: ProtocolKind,
        transport: TransportKind,
        family: DeviceFamily,
        https: bool,
    ) -> Self {
        Self {
            protocol,
            transport,
            family,
            https,
        }
    }

    /// The same recipe with a different device family
    pub fn with_family(mut self, family: DeviceFamily) -> Self {
        self.family = family;
        self
    }

    /// The full negotiation candidate list, in priority order
    ///
    /// The order is fixed and deterministic: newest/most specific schemes
    /// first, so negotiation is repeatable and cheap for devices that
    /// support the common case. Candidates carry `DeviceFamily::Unknown`;
    /// the family is refined from the first successful update.
    pub fn candidates() -> Vec<ConnectionRecipe> {
        use DeviceFamily::Unknown;
        use ProtocolKind::*;
        use TransportKind::*;

        vec![
            ConnectionRecipe::new(Composite, Session, Unknown, true),
            ConnectionRecipe::new(Composite, Session, Unknown, false),
            ConnectionRecipe::new(Composite, Aes, Unknown, true),
            ConnectionRecipe::new(Composite, Aes, Unknown, false),
            ConnectionRecipe::new(Composite, Xor, Unknown, false),
            ConnectionRecipe::new(Legacy, Xor, Unknown, false),
        ]
    }
}

impl fmt::Display for ConnectionRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{:?}/{:?}{}",
            self.protocol,
            self.transport,
            self.family,
            if self.https { "/https" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_candidate_order_is_deterministic() {
        let a = ConnectionRecipe::candidates();
        let b = ConnectionRecipe::candidates();
        assert_eq!(a, b);
        assert!(!a.is_empty());

        // Newest scheme first, oldest last
        assert_eq!(a.first().unwrap().transport, TransportKind::Session);
        assert!(a.first().unwrap().https);
        assert_eq!(a.last().unwrap().protocol, ProtocolKind::Legacy);
        assert_eq!(a.last().unwrap().transport, TransportKind::Xor);
    }

    #[test]
    fn test_recipe_as_cache_key() {
        let mut cache: HashMap<String, ConnectionRecipe> = HashMap::new();
        let recipe = ConnectionRecipe::candidates()[0];
        cache.insert("10.0.0.5".to_string(), recipe);
        assert_eq!(cache.get("10.0.0.5"), Some(&recipe));
    }

    #[test]
    fn test_with_family() {
        let recipe = ConnectionRecipe::candidates()[0].with_family(DeviceFamily::Hub);
        assert_eq!(recipe.family, DeviceFamily::Hub);
        // Other fields are untouched
        assert_eq!(recipe.protocol, ProtocolKind::Composite);
    }

    #[test]
    fn test_display() {
        let recipe = ConnectionRecipe::new(
            ProtocolKind::Composite,
            TransportKind::Session,
            DeviceFamily::Plug,
            true,
        );
        assert_eq!(format!("{}", recipe), "Composite/Session/Plug/https");
    }
}
