//! Property-based test generators using proptest.

use ovsdb_protocol::{Atom, Datum};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for entity names such as switch or port names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,15}").expect("Invalid regex")
}

/// Strategy for MAC addresses in colon-separated lowercase hex.
pub fn mac_address_strategy() -> impl Strategy<Value = String> {
    prop::array::uniform6(any::<u8>()).prop_map(|bytes| {
        bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    })
}

/// Strategy for dotted-quad IPv4 addresses.
pub fn ipv4_strategy() -> impl Strategy<Value = String> {
    prop::array::uniform4(any::<u8>()).prop_map(|[a, b, c, d]| format!("{a}.{b}.{c}.{d}"))
}

/// Strategy for logical port address lists (`"MAC IP"` entries).
pub fn port_addresses_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        (mac_address_strategy(), ipv4_strategy()).prop_map(|(mac, ip)| format!("{mac} {ip}")),
        0..4,
    )
}

/// Strategy for bridge mappings (physical network to bridge name).
pub fn bridge_mappings_strategy() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map(
        prop::string::string_regex("phys[a-z0-9]{0,6}").expect("Invalid regex"),
        prop::string::string_regex("br-[a-z0-9]{1,8}").expect("Invalid regex"),
        0..4,
    )
}

/// Strategy for string set datums.
pub fn string_set_strategy() -> impl Strategy<Value = Datum> {
    prop::collection::btree_set(name_strategy(), 0..6)
        .prop_map(|names| Datum::Set(names.into_iter().map(Atom::String).collect()))
}

/// Strategy for string-to-string map datums.
pub fn string_map_strategy() -> impl Strategy<Value = Datum> {
    prop::collection::btree_map(name_strategy(), name_strategy(), 0..6).prop_map(|pairs| {
        Datum::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (Atom::String(k), Atom::String(v)))
                .collect(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn mac_addresses_have_six_octets(mac in mac_address_strategy()) {
            prop_assert_eq!(mac.split(':').count(), 6);
        }

        #[test]
        fn names_are_non_empty(name in name_strategy()) {
            prop_assert!(!name.is_empty());
        }
    }
}
