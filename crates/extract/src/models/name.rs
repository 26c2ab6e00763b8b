use std::convert::Infallible;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// A full package identifier such as `pkg_install-20240307`, split into the
/// base name and the version.
///
/// The split happens on the rightmost `-`, so the version never contains a
/// dash. Identifiers without a dash, or where either side of the dash would
/// be empty, keep the full name but have neither base nor version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageName {
    /// The identifier exactly as reported by the extractor.
    pub full: String,
    pub base: Option<String>,
    pub version: Option<String>,
}
impl PackageName {
    pub fn new(full: impl Into<String>) -> Self {
        let full = full.into();
        let (base, version) = match full.rsplit_once('-') {
            Some((base, version)) if !base.is_empty() && !version.is_empty() => {
                (Some(base.to_string()), Some(version.to_string()))
            },
            _ => (None, None),
        };
        Self { full, base, version }
    }

    /// Whether the identifier could be decomposed into base and version.
    pub fn is_versioned(&self) -> bool {
        self.base.is_some() && self.version.is_some()
    }
}
impl FromStr for PackageName {
    type Err = Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}
impl Display for PackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("bash-5.2.21", Some("bash"), Some("5.2.21"))]
    #[case("pkg_install-20240307", Some("pkg_install"), Some("20240307"))]
    #[case("p5-Test-Simple-1.302195", Some("p5-Test-Simple"), Some("1.302195"))]
    #[case("xz-5.4.6nb1", Some("xz"), Some("5.4.6nb1"))]
    #[case("noversion", None, None)]
    #[case("trailing-", None, None)]
    #[case("-1.0", None, None)]
    #[case("", None, None)]
    fn test_decomposition(#[case] full: &str, #[case] base: Option<&str>, #[case] version: Option<&str>) {
        let name: PackageName = full.parse().unwrap();
        assert_eq!(name.full, full);
        assert_eq!(name.base.as_deref(), base);
        assert_eq!(name.version.as_deref(), version);
        assert_eq!(name.is_versioned(), base.is_some());
    }

    #[test]
    fn test_display_is_full_identifier() {
        assert_eq!(PackageName::new("zsh-5.9").to_string(), "zsh-5.9");
    }
}
