//! Capability negotiation
//!
//! The device answers a product request with a protocol array: a sequence of
//! `(tag, value)` triples describing its physical link (`P`), link protocol (`L`),
//! application protocols (`A`) and, after each application protocol, the datatypes
//! (`D`) it uses for that protocol's records.
//!
//! [`CapabilityManager`] turns that array into named lookups, e.g. `"lap"` →
//! protocol A906 with datatype D1011.

use crate::types::{GarminError, LinkType, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Size of one protocol array entry: tag byte plus 16-bit value
const TRIPLE_SIZE: usize = 3;

/// Known application protocol
struct ProtocolDefinition {
    code: u16,
    name: &'static str,
    /// Datatype names in the order the device lists them
    datatypes: &'static [&'static str],
}

static PROTOCOL_REGISTRY: &[ProtocolDefinition] = &[
    ProtocolDefinition { code: 10, name: "command", datatypes: &[] },
    ProtocolDefinition { code: 11, name: "command", datatypes: &[] },
    ProtocolDefinition { code: 100, name: "waypoint", datatypes: &["waypoint"] },
    ProtocolDefinition { code: 101, name: "waypoint.category", datatypes: &["waypoint.category"] },
    ProtocolDefinition { code: 200, name: "route", datatypes: &["route.header", "route.waypoint"] },
    ProtocolDefinition {
        code: 201,
        name: "route",
        datatypes: &["route.header", "route.waypoint", "route.link"],
    },
    ProtocolDefinition { code: 300, name: "track", datatypes: &["track.data"] },
    ProtocolDefinition { code: 301, name: "track", datatypes: &["track.header", "track.data"] },
    ProtocolDefinition { code: 302, name: "track", datatypes: &["track.header", "track.data"] },
    ProtocolDefinition { code: 400, name: "waypoint.proximity", datatypes: &["waypoint.proximity"] },
    ProtocolDefinition { code: 500, name: "almanac", datatypes: &["almanac"] },
    ProtocolDefinition { code: 600, name: "date_time", datatypes: &["date_time"] },
    ProtocolDefinition { code: 650, name: "flightbook", datatypes: &["flightbook"] },
    ProtocolDefinition { code: 700, name: "position", datatypes: &["position"] },
    ProtocolDefinition { code: 800, name: "pvt", datatypes: &["pvt"] },
    ProtocolDefinition { code: 906, name: "lap", datatypes: &["lap"] },
    ProtocolDefinition { code: 1000, name: "run", datatypes: &["run"] },
    ProtocolDefinition { code: 1002, name: "workout", datatypes: &["workout"] },
    ProtocolDefinition { code: 1003, name: "workout.occurrence", datatypes: &["workout.occurrence"] },
    ProtocolDefinition { code: 1004, name: "fitness", datatypes: &["fitness"] },
    ProtocolDefinition { code: 1005, name: "workout.limits", datatypes: &["workout.limits"] },
    ProtocolDefinition { code: 1006, name: "course", datatypes: &["course"] },
    ProtocolDefinition { code: 1007, name: "course.lap", datatypes: &["course.lap"] },
    ProtocolDefinition { code: 1008, name: "course.point", datatypes: &["course.point"] },
    ProtocolDefinition { code: 1009, name: "course.limits", datatypes: &["course.limits"] },
    ProtocolDefinition {
        code: 1012,
        name: "course.track",
        datatypes: &["course.track.header", "course.track.data"],
    },
];

fn lookup_protocol(code: u16) -> Option<&'static ProtocolDefinition> {
    PROTOCOL_REGISTRY.iter().find(|def| def.code == code)
}

/// Negotiated device capabilities
///
/// Built once per session from the protocol array and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityManager {
    physical_link_code: Option<u16>,
    link_protocol_code: u16,
    protocols: HashMap<String, u16>,
    datatypes: HashMap<String, u16>,
}

impl CapabilityManager {
    /// Parse a protocol array payload
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() % TRIPLE_SIZE != 0 {
            return Err(GarminError::Protocol(format!(
                "Protocol array length {} is not a multiple of {}",
                payload.len(),
                TRIPLE_SIZE
            )));
        }

        let triples: Vec<(u8, u16)> = payload
            .chunks_exact(TRIPLE_SIZE)
            .map(|chunk| (chunk[0], u16::from_le_bytes([chunk[1], chunk[2]])))
            .collect();

        Self::from_triples(&triples)
    }

    /// Build from already split `(tag, value)` entries
    pub fn from_triples(triples: &[(u8, u16)]) -> Result<Self> {
        let mut physical_link_code = None;
        let mut link_protocol_code = 0;
        // Application protocols in declaration order with their datatype values
        let mut declared: Vec<(u16, Vec<u16>)> = Vec::new();
        let mut current_open = false;

        for &(tag, value) in triples {
            match tag {
                b'P' => {
                    physical_link_code = Some(value);
                    current_open = false;
                }
                b'L' => {
                    link_protocol_code = value;
                    current_open = false;
                }
                b'A' => {
                    declared.push((value, Vec::new()));
                    current_open = true;
                }
                b'D' => match declared.last_mut() {
                    Some((_, values)) if current_open => values.push(value),
                    _ => {
                        return Err(GarminError::Protocol(format!(
                            "Datatype D{:03} without an open protocol",
                            value
                        )))
                    }
                },
                _ => {
                    return Err(GarminError::Protocol(format!(
                        "Unknown protocol array tag 0x{:02X}",
                        tag
                    )))
                }
            }
        }

        let mut protocols = HashMap::new();
        let mut datatypes = HashMap::new();

        for (code, values) in declared {
            let Some(definition) = lookup_protocol(code) else {
                warn!("Ignoring unknown protocol A{:03}", code);
                continue;
            };

            protocols.insert(definition.name.to_string(), code);
            for (name, value) in definition.datatypes.iter().zip(values) {
                datatypes.insert(name.to_string(), value);
            }
        }

        debug!(
            "Negotiated {} protocols and {} datatypes (link L{:03})",
            protocols.len(),
            datatypes.len(),
            link_protocol_code
        );

        Ok(Self {
            physical_link_code,
            link_protocol_code,
            protocols,
            datatypes,
        })
    }

    pub fn physical_link_code(&self) -> Option<u16> {
        self.physical_link_code
    }

    pub fn link_protocol_code(&self) -> u16 {
        self.link_protocol_code
    }

    /// Link type used to pick command codes
    pub fn link_type(&self) -> Result<LinkType> {
        LinkType::from_code(self.link_protocol_code)
    }

    /// Check whether the device declared a named protocol
    pub fn supports(&self, name: &str) -> bool {
        self.protocols.contains_key(name)
    }

    /// Numeric code of a declared protocol
    pub fn protocol(&self, name: &str) -> Option<u16> {
        self.protocols.get(name).copied()
    }

    /// Negotiated datatype for a named record kind
    pub fn datatype(&self, name: &str) -> Result<u16> {
        self.datatypes
            .get(name)
            .copied()
            .ok_or_else(|| GarminError::Protocol(format!("No datatype negotiated for {}", name)))
    }

    /// Fail unless the device declared the named protocol
    pub fn enforce(&self, name: &str) -> Result<()> {
        if self.supports(name) {
            Ok(())
        } else {
            Err(GarminError::Protocol(format!(
                "Protocol {} not supported by device",
                name
            )))
        }
    }

    /// Negotiated datatype, restricted to the layouts a decoder implements
    pub fn datatype_for(&self, name: &str, allowed: &[u16]) -> Result<u16> {
        let datatype = self.datatype(name)?;
        if allowed.contains(&datatype) {
            Ok(datatype)
        } else {
            Err(GarminError::UnsupportedDatatype { datatype })
        }
    }

    pub fn protocols(&self) -> impl Iterator<Item = (&str, u16)> {
        self.protocols.iter().map(|(name, code)| (name.as_str(), *code))
    }

    pub fn datatypes(&self) -> impl Iterator<Item = (&str, u16)> {
        self.datatypes.iter().map(|(name, code)| (name.as_str(), *code))
    }
}
