use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bitmask over the three channel events the selector tracks.
///
/// Used both as interest-ops (what the channel wants reported) and as
/// ready-ops (what the OS reported as satisfiable this iteration).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Ops(u8);

impl Ops {
    pub const NONE: Ops = Ops(0);
    pub const READ: Ops = Ops(1 << 0);
    pub const WRITE: Ops = Ops(1 << 1);
    pub const CONNECT: Ops = Ops(1 << 2);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Ops) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: Ops) -> Ops {
        Ops(self.0 | other.0)
    }

    pub fn without(self, other: Ops) -> Ops {
        Ops(self.0 & !other.0)
    }

    pub fn is_readable(self) -> bool {
        self.contains(Ops::READ)
    }

    pub fn is_writable(self) -> bool {
        self.contains(Ops::WRITE)
    }

    pub fn is_connectable(self) -> bool {
        self.contains(Ops::CONNECT)
    }

    pub(crate) fn bits(self) -> u8 {
        self.0
    }

    pub(crate) fn from_bits(bits: u8) -> Ops {
        Ops(bits & 0b111)
    }
}

impl BitOr for Ops {
    type Output = Ops;

    fn bitor(self, rhs: Ops) -> Ops {
        self.with(rhs)
    }
}

impl BitOrAssign for Ops {
    fn bitor_assign(&mut self, rhs: Ops) {
        *self = self.with(rhs);
    }
}

impl fmt::Debug for Ops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let mut sep = "";
        for (bit, name) in [
            (Ops::READ, "READ"),
            (Ops::WRITE, "WRITE"),
            (Ops::CONNECT, "CONNECT"),
        ] {
            if self.contains(bit) {
                write!(f, "{}{}", sep, name)?;
                sep = "|";
            }
        }
        Ok(())
    }
}
