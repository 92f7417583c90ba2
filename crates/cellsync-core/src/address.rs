//! Full-format CKB addresses.
//!
//! A lock script is rendered as `hrp 1 data checksum`, Bech32m-checksummed
//! per BIP-350. The HRP is `ckb` on mainnet and `ckt` on testnet; the data
//! carries `0x00 || code_hash || hash_type || args`. Short and deprecated
//! long formats are not produced or accepted.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::AddressError;
use crate::types::{Hash256, HashType, Script};

/// Payload format byte for full-format addresses.
pub const FULL_FORMAT: u8 = 0x00;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    pub fn hrp(&self) -> &'static str {
        match self {
            Network::Mainnet => "ckb",
            Network::Testnet => "ckt",
        }
    }

    pub fn from_hrp(hrp: &str) -> Result<Self, AddressError> {
        match hrp {
            "ckb" => Ok(Network::Mainnet),
            "ckt" => Ok(Network::Testnet),
            _ => Err(AddressError::UnknownNetwork(hrp.to_string())),
        }
    }
}

impl FromStr for Network {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" | "ckb" => Ok(Network::Mainnet),
            "testnet" | "ckt" => Ok(Network::Testnet),
            other => Err(AddressError::UnknownNetwork(other.to_string())),
        }
    }
}

/// An address: a lock script bound to a network.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    network: Network,
    script: Script,
}

impl Address {
    pub fn from_script(script: Script, network: Network) -> Self {
        Self { network, script }
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn encode(&self) -> String {
        let hrp = self.network.hrp();

        let mut payload = Vec::with_capacity(1 + 32 + 1 + self.script.args.len());
        payload.push(FULL_FORMAT);
        payload.extend_from_slice(self.script.code_hash.as_bytes());
        payload.push(self.script.hash_type.as_byte());
        payload.extend_from_slice(&self.script.args);

        let data = bech32m::to_five_bit(&payload);
        let checksum = bech32m::checksum(hrp, &data);
        let body: String = data
            .iter()
            .chain(&checksum)
            .map(|&d| bech32m::ALPHABET[d as usize] as char)
            .collect();
        format!("{hrp}1{body}")
    }

    /// Parse a full-format address. Mixed case is rejected; otherwise the
    /// string is case-insensitive.
    pub fn decode(s: &str) -> Result<Self, AddressError> {
        let has_lower = s.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = s.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper {
            return Err(AddressError::MixedCase);
        }

        let s_lower = s.to_ascii_lowercase();
        let sep_pos = s_lower.rfind('1').ok_or(AddressError::MissingSeparator)?;
        if sep_pos == 0 {
            return Err(AddressError::InvalidHrp);
        }
        if sep_pos + 7 > s_lower.len() {
            return Err(AddressError::InvalidLength);
        }

        let hrp = &s_lower[..sep_pos];
        let data_part = &s_lower[sep_pos + 1..];

        let data = data_part
            .chars()
            .map(|c| bech32m::value_of(c).ok_or(AddressError::InvalidCharacter(c)))
            .collect::<Result<Vec<u8>, _>>()?;

        if !bech32m::verify(hrp, &data) {
            return Err(AddressError::InvalidChecksum);
        }
        let network = Network::from_hrp(hrp)?;

        let payload = bech32m::from_five_bit(&data[..data.len() - bech32m::CHECKSUM_LEN])
            .ok_or(AddressError::InvalidPadding)?;
        if payload.len() < 34 {
            return Err(AddressError::InvalidLength);
        }
        if payload[0] != FULL_FORMAT {
            return Err(AddressError::InvalidFormat(payload[0]));
        }

        let mut code_hash = [0u8; 32];
        code_hash.copy_from_slice(&payload[1..33]);
        let hash_type =
            HashType::from_byte(payload[33]).ok_or(AddressError::InvalidHashType(payload[33]))?;

        Ok(Self {
            network,
            script: Script {
                code_hash: Hash256(code_hash),
                hash_type,
                args: payload[34..].to_vec(),
            },
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

mod bech32m {
    pub const ALPHABET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
    pub const CHECKSUM_LEN: usize = 6;

    const BECH32M_CONST: u32 = 0x2bc830a3;
    const GENERATOR: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];

    pub fn value_of(c: char) -> Option<u8> {
        ALPHABET.iter().position(|&a| a as char == c).map(|p| p as u8)
    }

    fn polymod<'a>(values: impl IntoIterator<Item = &'a u8>) -> u32 {
        values.into_iter().fold(1u32, |chk, &v| {
            let top = chk >> 25;
            let next = ((chk & 0x1ff_ffff) << 5) ^ u32::from(v);
            GENERATOR
                .iter()
                .enumerate()
                .filter(|(i, _)| (top >> i) & 1 == 1)
                .fold(next, |acc, (_, g)| acc ^ g)
        })
    }

    fn hrp_values(hrp: &str) -> Vec<u8> {
        hrp.bytes()
            .map(|c| c >> 5)
            .chain(std::iter::once(0))
            .chain(hrp.bytes().map(|c| c & 31))
            .collect()
    }

    pub fn checksum(hrp: &str, data: &[u8]) -> [u8; CHECKSUM_LEN] {
        let prefix = hrp_values(hrp);
        let residue =
            polymod(prefix.iter().chain(data).chain(&[0u8; CHECKSUM_LEN])) ^ BECH32M_CONST;
        std::array::from_fn(|i| ((residue >> (5 * (CHECKSUM_LEN - 1 - i))) & 31) as u8)
    }

    /// `data` includes the trailing checksum.
    pub fn verify(hrp: &str, data: &[u8]) -> bool {
        polymod(hrp_values(hrp).iter().chain(data)) == BECH32M_CONST
    }

    pub fn to_five_bit(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(bytes.len() * 8 / 5 + 1);
        let (mut acc, mut bits) = (0u32, 0u32);
        for &byte in bytes {
            acc = (acc << 8) | u32::from(byte);
            bits += 8;
            while bits >= 5 {
                bits -= 5;
                out.push(((acc >> bits) & 31) as u8);
            }
        }
        if bits > 0 {
            out.push(((acc << (5 - bits)) & 31) as u8);
        }
        out
    }

    /// `None` on out-of-range values or non-zero padding.
    pub fn from_five_bit(values: &[u8]) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(values.len() * 5 / 8);
        let (mut acc, mut bits) = (0u32, 0u32);
        for &v in values {
            if v > 31 {
                return None;
            }
            acc = ((acc << 5) | u32::from(v)) & 0xfff;
            bits += 5;
            if bits >= 8 {
                bits -= 8;
                out.push(((acc >> bits) & 0xff) as u8);
            }
        }
        let padding_clean = bits < 5 && (acc << (8 - bits)) & 0xff == 0;
        padding_clean.then_some(out)
    }
}
