//! Version negotiation.
//!
//! A client opens with a 20 byte preamble: the magic number followed by four
//! version offers. The server answers with the single version it picked, or
//! with four zero bytes when none of the offers match.
//!
//! ```text
//! 60 60 B0 17 | 00 08 08 05 | 00 00 04 04 | 00 00 00 00 | 00 00 00 00
//!    magic    | 5.0 ..= 5.8 |     4.4     |   padding   |   padding
//! ```
use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint},
};
use thiserror::Error;

use super::version::ProtocolVersion;

pub const MAGIC: u32 = 0x6060_B017;
pub const OFFER_COUNT: usize = 4;
pub const PREAMBLE_SIZE: usize = 4 + OFFER_COUNT * 4;
pub const CHOICE_SIZE: usize = 4;

const CONFIG: Configuration<BigEndian, Fixint> = bincode::config::standard()
    .with_big_endian()
    .with_fixed_int_encoding();

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("not a bolt connection: bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("none of the offered versions {0:?} is supported")]
    NoCommonVersion(Vec<VersionOffer>),
    #[error("failed to encode handshake: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode handshake: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// One offer: every minor in `minor - range ..= minor` of `major`.
///
/// Field order is the wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct VersionOffer {
    reserved: u8,
    pub range: u8,
    pub minor: u8,
    pub major: u8,
}

impl VersionOffer {
    pub const fn exact(version: ProtocolVersion) -> Self {
        Self::range(version, 0)
    }

    /// Offers `version` and the `range` minors below it.
    pub const fn range(version: ProtocolVersion, range: u8) -> Self {
        Self {
            reserved: 0,
            range,
            minor: version.minor(),
            major: version.major(),
        }
    }

    pub fn is_padding(&self) -> bool {
        *self == Self::default()
    }

    pub fn accepts(&self, version: ProtocolVersion) -> bool {
        version.major() == self.major
            && version.minor() <= self.minor
            && version.minor() >= self.minor.saturating_sub(self.range)
    }
}

#[derive(Debug, Encode, Decode)]
struct Preamble {
    magic: u32,
    offers: [VersionOffer; OFFER_COUNT],
}

/// Picks a version for the client's offers: the first offer that accepts any
/// supported version wins, and within it the highest matching version.
pub fn negotiate<I>(supported: I, offers: &[VersionOffer]) -> Option<ProtocolVersion>
where
    I: IntoIterator<Item = ProtocolVersion>,
    I::IntoIter: Clone,
{
    let supported = supported.into_iter();
    offers
        .iter()
        .filter(|offer| !offer.is_padding())
        .find_map(|offer| supported.clone().filter(|v| offer.accepts(*v)).max())
}

/// Parses the client preamble.
pub fn decode_preamble(bytes: &[u8; PREAMBLE_SIZE]) -> Result<[VersionOffer; OFFER_COUNT], HandshakeError> {
    let (preamble, _): (Preamble, usize) = bincode::decode_from_slice(bytes, CONFIG)?;
    if preamble.magic != MAGIC {
        return Err(HandshakeError::BadMagic(preamble.magic));
    }
    Ok(preamble.offers)
}

/// Builds a client preamble. Missing offers are padded with zeroes, offers
/// beyond the fourth are dropped.
pub fn encode_preamble(offers: &[VersionOffer]) -> Result<Vec<u8>, HandshakeError> {
    let mut padded = [VersionOffer::default(); OFFER_COUNT];
    for (slot, offer) in padded.iter_mut().zip(offers) {
        *slot = *offer;
    }
    let preamble = Preamble {
        magic: MAGIC,
        offers: padded,
    };
    Ok(bincode::encode_to_vec(preamble, CONFIG)?)
}

/// The server's answer: the chosen version, or zeroes on rejection.
pub fn encode_choice(choice: Option<ProtocolVersion>) -> Result<Vec<u8>, HandshakeError> {
    let offer = choice.map(VersionOffer::exact).unwrap_or_default();
    Ok(bincode::encode_to_vec(offer, CONFIG)?)
}

pub fn decode_choice(bytes: &[u8; CHOICE_SIZE]) -> Result<Option<ProtocolVersion>, HandshakeError> {
    let (offer, _): (VersionOffer, usize) = bincode::decode_from_slice(bytes, CONFIG)?;
    if offer.is_padding() {
        return Ok(None);
    }
    Ok(Some(ProtocolVersion::new(offer.major, offer.minor)))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn v(major: u8, minor: u8) -> ProtocolVersion {
        ProtocolVersion::new(major, minor)
    }

    fn supported() -> Vec<ProtocolVersion> {
        (0..=8).map(|minor| v(5, minor)).collect()
    }

    #[test]
    fn preamble_layout() {
        let bytes = encode_preamble(&[VersionOffer::range(v(5, 8), 8), VersionOffer::exact(v(4, 4))])
            .unwrap();
        assert_eq!(
            bytes,
            vec![
                0x60, 0x60, 0xB0, 0x17, 0, 8, 8, 5, 0, 0, 4, 4, 0, 0, 0, 0, 0, 0, 0, 0
            ]
        );
        let parsed = decode_preamble(&bytes.try_into().unwrap()).unwrap();
        assert_eq!(parsed[0], VersionOffer::range(v(5, 8), 8));
        assert!(parsed[2].is_padding());
    }

    #[test]
    fn bad_magic_is_not_a_version_mismatch() {
        let mut bytes = [0u8; PREAMBLE_SIZE];
        bytes[..4].copy_from_slice(b"GET ");
        assert!(matches!(
            decode_preamble(&bytes),
            Err(HandshakeError::BadMagic(0x4745_5420))
        ));
    }

    #[test]
    fn choice_layout() {
        assert_eq!(encode_choice(Some(v(5, 4))).unwrap(), vec![0, 0, 4, 5]);
        assert_eq!(encode_choice(None).unwrap(), vec![0, 0, 0, 0]);
        assert_eq!(decode_choice(&[0, 0, 4, 5]).unwrap(), Some(v(5, 4)));
        assert_eq!(decode_choice(&[0, 0, 0, 0]).unwrap(), None);
    }

    #[rstest]
    #[case::exact_oldest(VersionOffer::exact(v(5, 0)), Some(v(5, 0)))]
    #[case::exact_newest(VersionOffer::exact(v(5, 8)), Some(v(5, 8)))]
    #[case::full_range(VersionOffer::range(v(5, 8), 8), Some(v(5, 8)))]
    #[case::range_below(VersionOffer::range(v(5, 3), 2), Some(v(5, 3)))]
    #[case::newer_minor_in_range(VersionOffer::range(v(5, 9), 1), Some(v(5, 8)))]
    #[case::newer_minor_only(VersionOffer::exact(v(5, 9)), None)]
    #[case::other_major(VersionOffer::exact(v(4, 4)), None)]
    fn single_offer(#[case] offer: VersionOffer, #[case] expected: Option<ProtocolVersion>) {
        assert_eq!(negotiate(supported(), &[offer]), expected);
    }

    #[test]
    fn first_matching_offer_wins() {
        let offers = [
            VersionOffer::exact(v(6, 0)),
            VersionOffer::exact(v(5, 2)),
            VersionOffer::range(v(5, 8), 8),
        ];
        assert_eq!(negotiate(supported(), &offers), Some(v(5, 2)));
    }

    #[test]
    fn padding_is_skipped() {
        let offers = [VersionOffer::default(), VersionOffer::exact(v(5, 1))];
        assert_eq!(negotiate(supported(), &offers), Some(v(5, 1)));
        assert_eq!(negotiate(supported(), &[VersionOffer::default(); 4]), None);
    }

    #[test]
    fn every_supported_version_is_reachable() {
        for version in supported() {
            assert_eq!(
                negotiate(supported(), &[VersionOffer::exact(version)]),
                Some(version)
            );
        }
    }
}
