//! Simple Node Information payload.

use arrayvec::ArrayString;

const MAX_FIELD_LEN: usize = 64;

fn read_cstring(buf: &[u8]) -> Option<(ArrayString<MAX_FIELD_LEN>, &[u8])> {
    let nul = buf.iter().position(|&b| b == 0)?;
    let mut s = ArrayString::new();
    for &b in &buf[..nul] {
        s.push(b as char);
    }
    Some((s, &buf[nul + 1..]))
}

fn write_cstring(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Manufacturer-supplied fixed fields, version 1 or 4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixedFields {
    V1 {
        manufacturer_name: ArrayString<MAX_FIELD_LEN>,
    },
    V4 {
        manufacturer_name: ArrayString<MAX_FIELD_LEN>,
        model_name: ArrayString<MAX_FIELD_LEN>,
        hardware_version: ArrayString<MAX_FIELD_LEN>,
        software_version: ArrayString<MAX_FIELD_LEN>,
    },
    /// Unrecognized version; the remaining bytes are kept opaque.
    Other { version: u8 },
}

/// User-configurable fields, version 1 or 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserFields {
    V1 {
        node_name: ArrayString<MAX_FIELD_LEN>,
    },
    V2 {
        node_name: ArrayString<MAX_FIELD_LEN>,
        node_description: ArrayString<MAX_FIELD_LEN>,
    },
    Other { version: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleNodeInformation {
    pub fixed: FixedFields,
    pub user: UserFields,
}

impl SimpleNodeInformation {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let (&version_fixed, rest) = payload.split_first()?;
        let (fixed, rest) = match version_fixed {
            1 => {
                let (manufacturer_name, rest) = read_cstring(rest)?;
                (FixedFields::V1 { manufacturer_name }, rest)
            }
            4 => {
                let (manufacturer_name, rest) = read_cstring(rest)?;
                let (model_name, rest) = read_cstring(rest)?;
                let (hardware_version, rest) = read_cstring(rest)?;
                let (software_version, rest) = read_cstring(rest)?;
                (
                    FixedFields::V4 {
                        manufacturer_name,
                        model_name,
                        hardware_version,
                        software_version,
                    },
                    rest,
                )
            }
            other => (FixedFields::Other { version: other }, rest),
        };

        let (&version_user, rest) = rest.split_first()?;
        let (user, _rest) = match version_user {
            1 => {
                let (node_name, rest) = read_cstring(rest)?;
                (UserFields::V1 { node_name }, rest)
            }
            2 => {
                let (node_name, rest) = read_cstring(rest)?;
                let (node_description, rest) = read_cstring(rest)?;
                (
                    UserFields::V2 {
                        node_name,
                        node_description,
                    },
                    rest,
                )
            }
            other => (UserFields::Other { version: other }, rest),
        };

        Some(Self { fixed, user })
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match &self.fixed {
            FixedFields::V1 { manufacturer_name } => {
                out.push(1);
                write_cstring(&mut out, manufacturer_name);
            }
            FixedFields::V4 {
                manufacturer_name,
                model_name,
                hardware_version,
                software_version,
            } => {
                out.push(4);
                write_cstring(&mut out, manufacturer_name);
                write_cstring(&mut out, model_name);
                write_cstring(&mut out, hardware_version);
                write_cstring(&mut out, software_version);
            }
            FixedFields::Other { version } => out.push(*version),
        }
        match &self.user {
            UserFields::V1 { node_name } => {
                out.push(1);
                write_cstring(&mut out, node_name);
            }
            UserFields::V2 {
                node_name,
                node_description,
            } => {
                out.push(2);
                write_cstring(&mut out, node_name);
                write_cstring(&mut out, node_description);
            }
            UserFields::Other { version } => out.push(*version),
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_roundtrip_v4_v2() {
        let snip = SimpleNodeInformation {
            fixed: FixedFields::V4 {
                manufacturer_name: ArrayString::from("Acme").unwrap(),
                model_name: ArrayString::from("Widget").unwrap(),
                hardware_version: ArrayString::from("1.0").unwrap(),
                software_version: ArrayString::from("2.1").unwrap(),
            },
            user: UserFields::V2 {
                node_name: ArrayString::from("Turnout 3").unwrap(),
                node_description: ArrayString::from("West yard").unwrap(),
            },
        };
        let built = snip.build();
        let parsed = SimpleNodeInformation::parse(&built).unwrap();
        assert_eq!(parsed, snip);
    }

    #[test]
    fn test_roundtrip_v1_v1() {
        let snip = SimpleNodeInformation {
            fixed: FixedFields::V1 {
                manufacturer_name: ArrayString::from("Acme").unwrap(),
            },
            user: UserFields::V1 {
                node_name: ArrayString::from("Signal 1").unwrap(),
            },
        };
        let built = snip.build();
        let parsed = SimpleNodeInformation::parse(&built).unwrap();
        assert_eq!(parsed, snip);
    }
}
