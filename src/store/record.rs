//! Per-IP impact record.
//!
//! Each tracked address carries a current and maximum impact amount for three
//! fixed time windows, a forgiveness counter, and an allow/deny flag byte.
//! All arithmetic saturates; nothing here ever overflows or underflows.
//!
//! Mutations take `now` as an explicit UNIX-seconds argument so tests can
//! drive the window clock directly.

/// Window lengths in seconds.
pub const FIVE_MIN_SECS: u32 = 5 * 60;
pub const HOUR_SECS: u32 = 60 * 60;
pub const DAY_SECS: u32 = 24 * 60 * 60;

/// Allow flag, bit 0 of the flag byte.
pub const FLAG_ALLOW: u8 = 0x01;
/// Deny flag, bit 1 of the flag byte.
pub const FLAG_DENY: u8 = 0x02;

/// Impact amounts for the three time windows.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImpactTriple {
    pub five_min: u32,
    pub hour: u32,
    pub day: u32,
}

impl ImpactTriple {
    pub fn splat(amount: u32) -> Self {
        Self {
            five_min: amount,
            hour: amount,
            day: amount,
        }
    }
}

/// UNIX-seconds origin of each window's current bucket. Zero means the
/// window has never been impacted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WindowStarts {
    pub five_min: u32,
    pub hour: u32,
    pub day: u32,
}

/// A flag mutation carried by the BlackWhiteIP command.
///
/// Wire bytes 0 through 4; anything else is unknown and leaves the flag byte
/// untouched (callers log it, it is not a protocol error).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagModifier {
    Nop,
    Allow,
    UnAllow,
    Deny,
    UnDeny,
}

impl FlagModifier {
    /// Decodes the wire byte. Returns `None` for unknown modifiers.
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Nop),
            1 => Some(Self::Allow),
            2 => Some(Self::UnAllow),
            3 => Some(Self::Deny),
            4 => Some(Self::UnDeny),
            _ => None,
        }
    }
}

/// The full per-IP state.
///
/// Invariant: `maximum[w] >= current[w]` for every window after every
/// operation. Bits 2 through 7 of `flags` are reserved and preserved.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImpactRecord {
    pub current: ImpactTriple,
    pub maximum: ImpactTriple,
    pub starts: WindowStarts,
    pub forgiven: u16,
    pub flags: u8,
}

impl ImpactRecord {
    /// Applies a flag modifier and adds `amount` to every window.
    ///
    /// The modifier is applied even when `amount` is zero; that is how
    /// flag-only commands work. A window whose bucket has expired (strictly
    /// after `start + length`) restarts at `amount`, discarding the stale
    /// accumulator.
    pub fn impact(&mut self, amount: u32, modifier: FlagModifier, now: u32) {
        if modifier != FlagModifier::Nop {
            self.apply_modifier(modifier);
        }

        if amount == 0 {
            return;
        }

        roll_window(
            &mut self.current.five_min,
            &mut self.maximum.five_min,
            &mut self.starts.five_min,
            FIVE_MIN_SECS,
            amount,
            now,
        );
        roll_window(
            &mut self.current.hour,
            &mut self.maximum.hour,
            &mut self.starts.hour,
            HOUR_SECS,
            amount,
            now,
        );
        roll_window(
            &mut self.current.day,
            &mut self.maximum.day,
            &mut self.starts.day,
            DAY_SECS,
            amount,
            now,
        );
    }

    /// Subtracts the given amounts from each window's maximum and resets the
    /// current accumulator to the new maximum. Flags are untouched.
    pub fn forgive(&mut self, amounts: ImpactTriple) {
        self.maximum.five_min = self.maximum.five_min.saturating_sub(amounts.five_min);
        self.current.five_min = self.maximum.five_min;

        self.maximum.hour = self.maximum.hour.saturating_sub(amounts.hour);
        self.current.hour = self.maximum.hour;

        self.maximum.day = self.maximum.day.saturating_sub(amounts.day);
        self.current.day = self.maximum.day;

        self.forgiven = self.forgiven.saturating_add(1);
    }

    fn apply_modifier(&mut self, modifier: FlagModifier) {
        match modifier {
            FlagModifier::Nop => {}
            FlagModifier::Allow => self.flags |= FLAG_ALLOW,
            FlagModifier::UnAllow => self.flags &= !FLAG_ALLOW,
            FlagModifier::Deny => self.flags |= FLAG_DENY,
            FlagModifier::UnDeny => self.flags &= !FLAG_DENY,
        }
    }
}

fn roll_window(current: &mut u32, maximum: &mut u32, start: &mut u32, length: u32, amount: u32, now: u32) {
    if now > start.saturating_add(length) {
        *start = now;
        *current = amount;
    } else {
        *current = current.saturating_add(amount);
    }
    *maximum = (*maximum).max(*current);
}
