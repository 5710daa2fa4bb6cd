use nom::IResult;
use nom::number::complete::{be_u8, be_u16};
use serde::Serialize;
use strum_macros::Display;

#[repr(u16)]
#[derive(Debug, Default, PartialEq, Eq, Ord, PartialOrd, Clone, Copy, Hash, Serialize, Display)]
pub enum Afi {
    #[default]
    #[strum(serialize = "IPv4")]
    Ip = 1,
    #[strum(serialize = "L2VPN")]
    L2vpn = 25,
    #[strum(to_string = "Unknown({0})")]
    Unknown(u16),
}

#[repr(u8)]
#[derive(Debug, Default, PartialEq, Eq, Ord, PartialOrd, Clone, Copy, Hash, Serialize, Display)]
pub enum Safi {
    #[default]
    Unicast = 1,
    #[strum(serialize = "EVPN")]
    Evpn = 70,
    #[strum(serialize = "MPLS VPN")]
    MplsVpn = 128,
    #[strum(serialize = "RTarget")]
    RTarget = 132,
    #[strum(serialize = "ERMVPN")]
    ErmVpn = 241,
    #[strum(to_string = "Unknown({0})")]
    Unknown(u8),
}

impl From<Afi> for u16 {
    fn from(afi: Afi) -> Self {
        use Afi::*;
        match afi {
            Ip => 1,
            L2vpn => 25,
            Unknown(v) => v,
        }
    }
}

impl From<u16> for Afi {
    fn from(val: u16) -> Self {
        use Afi::*;
        match val {
            1 => Ip,
            25 => L2vpn,
            v => Unknown(v),
        }
    }
}

impl From<Safi> for u8 {
    fn from(safi: Safi) -> Self {
        use Safi::*;
        match safi {
            Unicast => 1,
            Evpn => 70,
            MplsVpn => 128,
            RTarget => 132,
            ErmVpn => 241,
            Unknown(v) => v,
        }
    }
}

impl From<u8> for Safi {
    fn from(val: u8) -> Self {
        use Safi::*;
        match val {
            1 => Unicast,
            70 => Evpn,
            128 => MplsVpn,
            132 => RTarget,
            241 => ErmVpn,
            v => Unknown(v),
        }
    }
}

impl Afi {
    pub fn parse_be(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, afi) = be_u16(input)?;
        Ok((input, afi.into()))
    }
}

impl Safi {
    pub fn parse_be(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, safi) = be_u8(input)?;
        Ok((input, safi.into()))
    }
}

#[derive(Debug, Default, PartialEq, Eq, Ord, PartialOrd, Clone, Copy, Hash, Serialize)]
pub struct AfiSafi {
    pub afi: Afi,
    pub safi: Safi,
}

impl AfiSafi {
    pub fn new(afi: Afi, safi: Safi) -> Self {
        Self { afi, safi }
    }
}

impl std::fmt::Display for AfiSafi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.afi, self.safi)
    }
}

/// Internal address-family tag used across tables, peers and the codec.
#[derive(Debug, PartialEq, Eq, Ord, PartialOrd, Clone, Copy, Hash, Serialize, Display)]
pub enum Family {
    #[strum(serialize = "inet")]
    Inet,
    #[strum(serialize = "inet-vpn")]
    InetVpn,
    #[strum(serialize = "ermvpn")]
    ErmVpn,
    #[strum(serialize = "evpn")]
    Evpn,
    #[strum(serialize = "rtarget")]
    RTarget,
}

impl Family {
    pub const ALL: [Family; 5] = [
        Family::Inet,
        Family::InetVpn,
        Family::ErmVpn,
        Family::Evpn,
        Family::RTarget,
    ];

    pub fn afi_safi(&self) -> AfiSafi {
        match self {
            Family::Inet => AfiSafi::new(Afi::Ip, Safi::Unicast),
            Family::InetVpn => AfiSafi::new(Afi::Ip, Safi::MplsVpn),
            Family::ErmVpn => AfiSafi::new(Afi::Ip, Safi::ErmVpn),
            Family::Evpn => AfiSafi::new(Afi::L2vpn, Safi::Evpn),
            Family::RTarget => AfiSafi::new(Afi::Ip, Safi::RTarget),
        }
    }

    pub fn from_afi_safi(afi_safi: &AfiSafi) -> Option<Family> {
        match (afi_safi.afi, afi_safi.safi) {
            (Afi::Ip, Safi::Unicast) => Some(Family::Inet),
            (Afi::Ip, Safi::MplsVpn) => Some(Family::InetVpn),
            (Afi::Ip, Safi::ErmVpn) => Some(Family::ErmVpn),
            (Afi::L2vpn, Safi::Evpn) => Some(Family::Evpn),
            (Afi::Ip, Safi::RTarget) => Some(Family::RTarget),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_afi_safi_roundtrip() {
        for family in Family::ALL.iter() {
            let afi_safi = family.afi_safi();
            assert_eq!(Family::from_afi_safi(&afi_safi), Some(*family));
        }
        let unknown = AfiSafi::new(Afi::Ip, Safi::Unknown(99));
        assert_eq!(Family::from_afi_safi(&unknown), None);
    }
}
