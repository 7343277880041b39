use std::fmt;

/// Methods a server advertises in its `Public` header (RFC 2326 §12.28).
///
/// Stored as a bitmask. Only [`GET_PARAMETER`](Self::GET_PARAMETER) changes
/// client behavior: it selects the keep-alive command.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const NONE: Self = Self(0);
    pub const OPTIONS: Self = Self(1 << 1);
    pub const DESCRIBE: Self = Self(1 << 2);
    pub const ANNOUNCE: Self = Self(1 << 3);
    pub const SETUP: Self = Self(1 << 4);
    pub const PLAY: Self = Self(1 << 5);
    pub const RECORD: Self = Self(1 << 6);
    pub const PAUSE: Self = Self(1 << 7);
    pub const TEARDOWN: Self = Self(1 << 8);
    pub const SET_PARAMETER: Self = Self(1 << 9);
    pub const GET_PARAMETER: Self = Self(1 << 10);
    pub const REDIRECT: Self = Self(1 << 11);

    const NAMES: [(&'static str, Self); 11] = [
        ("OPTIONS", Self::OPTIONS),
        ("DESCRIBE", Self::DESCRIBE),
        ("ANNOUNCE", Self::ANNOUNCE),
        ("SETUP", Self::SETUP),
        ("PLAY", Self::PLAY),
        ("RECORD", Self::RECORD),
        ("PAUSE", Self::PAUSE),
        ("TEARDOWN", Self::TEARDOWN),
        ("SET_PARAMETER", Self::SET_PARAMETER),
        ("GET_PARAMETER", Self::GET_PARAMETER),
        ("REDIRECT", Self::REDIRECT),
    ];

    /// Parse a comma-separated `Public` header value. Unknown method names
    /// are ignored; matching is case-insensitive.
    pub fn parse(public: &str) -> Self {
        let mut mask = Self::NONE;
        for token in public.split(',') {
            let token = token.trim();
            if let Some((_, cap)) = Self::NAMES
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(token))
            {
                mask.0 |= cap.0;
            }
        }
        mask
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(_, cap)| self.contains(*cap))
            .map(|(name, _)| *name)
            .collect();
        write!(f, "Capabilities({})", names.join("|"))
    }
}
