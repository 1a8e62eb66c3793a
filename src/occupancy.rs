//! Shared facility-occupancy flags.
//!
//! Each flag is an independent boolean with last-writer-wins semantics: no
//! ownership, no locking. Flag names compare case-insensitively because
//! peers have historically sent `"Male"` and `"male"` interchangeably.

/// Wire value for an occupied flag.
pub const OCCUPIED: &str = "occupied";

/// Wire value for a vacant flag.
pub const VACANT: &str = "vacant";

/// Named occupancy flags in configuration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyState {
    flags: Vec<(String, bool)>,
}

impl OccupancyState {
    /// All flags start vacant. Duplicate names (ignoring case) are dropped.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut flags: Vec<(String, bool)> = Vec::new();
        for name in names {
            let name = name.into();
            if !flags.iter().any(|(existing, _)| existing.eq_ignore_ascii_case(&name)) {
                flags.push((name, false));
            }
        }
        Self { flags }
    }

    #[must_use]
    pub fn get(&self, flag: &str) -> Option<bool> {
        self.position(flag).map(|i| self.flags[i].1)
    }

    /// Set a flag, returning its previous value, or `None` if unknown.
    pub fn set(&mut self, flag: &str, occupied: bool) -> Option<bool> {
        let i = self.position(flag)?;
        Some(std::mem::replace(&mut self.flags[i].1, occupied))
    }

    /// Flip a flag, returning its new value, or `None` if unknown.
    pub fn toggle(&mut self, flag: &str) -> Option<bool> {
        let i = self.position(flag)?;
        let slot = &mut self.flags[i].1;
        *slot = !*slot;
        Some(*slot)
    }

    /// Pick the flag a peer meant from loosely-shaped event arguments.
    ///
    /// The last candidate naming a known flag wins. With no match, a
    /// single-flag clock falls back to its only flag; a multi-flag clock
    /// cannot guess and returns `None`.
    #[must_use]
    pub fn resolve(&self, candidates: &[String]) -> Option<&str> {
        if let Some(i) = candidates.iter().rev().find_map(|c| self.position(c)) {
            return Some(self.flags[i].0.as_str());
        }
        match self.flags.as_slice() {
            [(only, _)] => Some(only.as_str()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.flags.iter().map(|(name, value)| (name.as_str(), *value))
    }

    fn position(&self, flag: &str) -> Option<usize> {
        self.flags
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case(flag.trim()))
    }
}

/// Render an occupancy value for the wire.
#[must_use]
pub fn wire_value(occupied: bool) -> &'static str {
    if occupied { OCCUPIED } else { VACANT }
}

/// Interpret a wire occupancy value.
#[must_use]
pub fn parse_wire_value(text: &str) -> Option<bool> {
    let text = text.trim();
    if text.eq_ignore_ascii_case(OCCUPIED) {
        Some(true)
    } else if text.eq_ignore_ascii_case(VACANT) {
        Some(false)
    } else {
        None
    }
}
