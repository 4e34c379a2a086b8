use core::cmp::Ordering;

/// Dotted numeric firmware version, e.g. `1.10.2`.
///
/// Components are compared as integers from left to right; a shorter version
/// behaves as if padded with zeros, so `1.2` equals `1.2.0`.
#[derive(Debug, Clone)]
pub struct FirmwareVersion {
    components: Vec<u32>,
}

impl FirmwareVersion {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        if trimmed.is_empty() {
            return None;
        }

        let components = trimmed
            .split('.')
            .map(|part| part.parse::<u32>().ok())
            .collect::<Option<Vec<_>>>()?;

        Some(Self { components })
    }

    fn component(&self, index: usize) -> u32 {
        self.components.get(index).copied().unwrap_or(0)
    }
}

impl Ord for FirmwareVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        (0..len)
            .map(|index| self.component(index).cmp(&other.component(index)))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialEq for FirmwareVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FirmwareVersion {}

impl PartialOrd for FirmwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl core::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let parts = self
            .components
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>();
        f.write_str(&parts.join("."))
    }
}

/// Returns `Some(true)` when `remote` is strictly newer than `running`, or
/// `None` when either string is not a dotted numeric version.
pub fn is_newer(remote: &str, running: &str) -> Option<bool> {
    let remote = FirmwareVersion::parse(remote)?;
    let running = FirmwareVersion::parse(running)?;
    Some(remote > running)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(raw: &str) -> FirmwareVersion {
        FirmwareVersion::parse(raw).unwrap()
    }

    #[test]
    fn compares_components_numerically_not_lexically() {
        assert!(v("1.10") > v("1.9"));
        assert_eq!(is_newer("1.10", "1.9"), Some(true));
        assert_eq!(is_newer("1.9", "1.10"), Some(false));
        assert!(v("1.2") < v("1.10"));
    }

    #[test]
    fn shorter_versions_are_zero_padded() {
        assert_eq!(v("1.2").cmp(&v("1.2.0")), Ordering::Equal);
        assert!(v("1.2.1") > v("1.2"));
        assert_eq!(is_newer("1.2.0", "1.2"), Some(false));
    }

    #[test]
    fn equal_versions_are_not_newer() {
        assert_eq!(is_newer("1.1.2", "1.1.2"), Some(false));
        assert_eq!(is_newer(" 1.1.2\n", "1.1.2"), Some(false));
    }

    #[test]
    fn accepts_v_prefix_and_trailing_newline() {
        assert_eq!(v("v2.0.1\n"), v("2.0.1"));
    }

    #[test]
    fn rejects_non_numeric_versions() {
        assert_eq!(FirmwareVersion::parse(""), None);
        assert_eq!(FirmwareVersion::parse("1..2"), None);
        assert_eq!(FirmwareVersion::parse("1.2-beta"), None);
        assert_eq!(is_newer("<html>", "1.0.0"), None);
    }

    #[test]
    fn displays_normalized_components() {
        assert_eq!(v("01.002.3").to_string(), "1.2.3");
    }
}
