use std::{cmp::Ordering, fmt};

use super::types::{ExceptionHandlerIndex, PositionId};

/// Markers that the code parser hands out alongside the real instructions, at the address
/// they apply to.
/// Their order at a shared address follows how try regions nest: handlers earlier in the
/// exception table are the more deeply nested ones, so their regions close first and open last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PseudoOpcode {
    /// The end of a try region (exclusive)
    TryEnd(ExceptionHandlerIndex),
    /// The start of a try region
    Try(ExceptionHandlerIndex),
    /// The start of a handler
    Catch(ExceptionHandlerIndex),
    /// A branch target that has a stack map entry
    Target(u16),
    /// An address that has debug information
    Position(PositionId),
}
impl PseudoOpcode {
    #[must_use]
    pub fn rank(&self) -> u8 {
        match self {
            PseudoOpcode::TryEnd(_) => 0,
            PseudoOpcode::Try(_) => 1,
            PseudoOpcode::Catch(_) => 2,
            PseudoOpcode::Target(_) => 3,
            PseudoOpcode::Position(_) => 4,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            PseudoOpcode::TryEnd(_) => "TRYEND",
            PseudoOpcode::Try(_) => "TRY",
            PseudoOpcode::Catch(_) => "CATCH",
            PseudoOpcode::Target(_) => "TARGET",
            PseudoOpcode::Position(_) => "POSITION",
        }
    }
}
impl Ord for PseudoOpcode {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // Outer regions open first
            (PseudoOpcode::Try(a), PseudoOpcode::Try(b)) => b.cmp(a),
            // Inner regions close first
            (PseudoOpcode::TryEnd(a), PseudoOpcode::TryEnd(b))
            | (PseudoOpcode::Catch(a), PseudoOpcode::Catch(b)) => a.cmp(b),
            (PseudoOpcode::Target(a), PseudoOpcode::Target(b)) => a.cmp(b),
            (PseudoOpcode::Position(a), PseudoOpcode::Position(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}
impl PartialOrd for PseudoOpcode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl fmt::Display for PseudoOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PseudoOpcode::TryEnd(index) | PseudoOpcode::Try(index) | PseudoOpcode::Catch(index) => {
                write!(f, "{} #{}", self.name(), index.0)
            }
            PseudoOpcode::Target(address) => write!(f, "TARGET @{}", address),
            PseudoOpcode::Position(id) => write!(f, "POSITION {}", id.0),
        }
    }
}
