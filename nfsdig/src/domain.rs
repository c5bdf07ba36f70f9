use std::fmt;

/// A group of kernel hooks and maps that is enabled or disabled as a unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TraceDomain {
    Rpc,
    FileIo,
    Operations,
    Nfsd,
    Xdp,
    Error,
}

impl TraceDomain {
    pub const ALL: [TraceDomain; 6] = [
        TraceDomain::Rpc,
        TraceDomain::FileIo,
        TraceDomain::Operations,
        TraceDomain::Nfsd,
        TraceDomain::Xdp,
        TraceDomain::Error,
    ];

    /// Short name used for exporter output and log prefixes.
    pub fn name(&self) -> &'static str {
        match self {
            TraceDomain::Rpc => "rpc",
            TraceDomain::FileIo => "io",
            TraceDomain::Operations => "op",
            TraceDomain::Nfsd => "nfsd",
            TraceDomain::Xdp => "xdp",
            TraceDomain::Error => "error",
        }
    }

    pub fn always_on(&self) -> bool {
        matches!(self, TraceDomain::Error)
    }

    /// Whether an attach failure in this domain aborts setup.
    ///
    /// NFSD symbols come and go between kernel releases, so individual
    /// operations are skipped there. The other domains hook functions that
    /// every supported kernel exports.
    pub fn attach_policy(&self) -> AttachPolicy {
        match self {
            TraceDomain::Nfsd => AttachPolicy::SkipOnError,
            _ => AttachPolicy::Fatal,
        }
    }

    fn bit(&self) -> u8 {
        1 << (*self as u8)
    }
}

impl fmt::Display for TraceDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachPolicy {
    Fatal,
    SkipOnError,
}

/// Set of enabled domains. The error domain is always a member.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DomainSet(u8);

impl DomainSet {
    pub fn new() -> Self {
        Self(TraceDomain::Error.bit())
    }

    pub fn insert(&mut self, domain: TraceDomain) {
        self.0 |= domain.bit();
    }

    pub fn with(mut self, domain: TraceDomain) -> Self {
        self.insert(domain);
        self
    }

    pub fn contains(&self, domain: TraceDomain) -> bool {
        self.0 & domain.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = TraceDomain> + '_ {
        TraceDomain::ALL.into_iter().filter(|d| self.contains(*d))
    }
}

impl Default for DomainSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<TraceDomain> for DomainSet {
    fn from_iter<I: IntoIterator<Item = TraceDomain>>(iter: I) -> Self {
        let mut set = Self::new();
        for domain in iter {
            set.insert(domain);
        }
        set
    }
}

impl fmt::Debug for DomainSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_domain_always_enabled() {
        let set = DomainSet::new();
        assert!(set.contains(TraceDomain::Error));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![TraceDomain::Error]);

        let set: DomainSet = [TraceDomain::Nfsd].into_iter().collect();
        assert!(set.contains(TraceDomain::Error));
        assert!(set.contains(TraceDomain::Nfsd));
        assert!(!set.contains(TraceDomain::Rpc));
    }

    #[test]
    fn test_only_nfsd_skips_on_error() {
        for domain in TraceDomain::ALL {
            let expected = if domain == TraceDomain::Nfsd {
                AttachPolicy::SkipOnError
            } else {
                AttachPolicy::Fatal
            };
            assert_eq!(domain.attach_policy(), expected, "{domain}");
        }
    }
}
