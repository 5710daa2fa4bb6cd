#[repr(u8)]
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum CapCode {
    #[default]
    MultiProtocol = 1,
    GracefulRestart = 64,
    Unknown(u8),
}

impl From<CapCode> for u8 {
    fn from(typ: CapCode) -> Self {
        use CapCode::*;
        match typ {
            MultiProtocol => 1,
            GracefulRestart => 64,
            Unknown(v) => v,
        }
    }
}

impl From<u8> for CapCode {
    fn from(typ: u8) -> Self {
        use CapCode::*;
        match typ {
            1 => MultiProtocol,
            64 => GracefulRestart,
            v => Unknown(v),
        }
    }
}
