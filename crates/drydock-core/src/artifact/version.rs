//! Build version parsing and ordering.

use std::fmt;
use std::str::FromStr;

/// A `major.minor[.build[.revision]]` build version.
///
/// Versions are parsed from directory names on the artifact server.
/// Unspecified trailing components order below zero, so `8.1.3` sorts
/// before `8.1.3.0`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildVersion {
    parts: [i64; 4],
    text: String,
}

impl BuildVersion {
    pub fn major(&self) -> i64 {
        self.parts[0]
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl FromStr for BuildVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = s.split('.').collect();
        if !(2..=4).contains(&segments.len()) {
            anyhow::bail!("Invalid version '{s}': expected 2 to 4 dot-separated components");
        }
        let mut parts = [-1i64; 4];
        for (i, segment) in segments.iter().enumerate() {
            let value: u32 = segment
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid version component '{segment}' in '{s}'"))?;
            parts[i] = i64::from(value);
        }
        Ok(Self {
            parts,
            text: s.to_string(),
        })
    }
}

impl fmt::Display for BuildVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> BuildVersion {
        s.parse().unwrap()
    }

    #[test]
    fn orders_by_numeric_components() {
        assert!(v("8.1.3.3992") > v("8.1.3.401"));
        assert!(v("8.2.0") > v("8.1.9.9999"));
        assert!(v("10.0") > v("9.9"));
    }

    #[test]
    fn shorter_prefix_sorts_first() {
        assert!(v("8.1.3") < v("8.1.3.0"));
    }

    #[test]
    fn rejects_non_numeric_and_wrong_arity() {
        assert!("latest".parse::<BuildVersion>().is_err());
        assert!("8".parse::<BuildVersion>().is_err());
        assert!("8.1.x".parse::<BuildVersion>().is_err());
        assert!("8.1.2.3.4".parse::<BuildVersion>().is_err());
    }

    #[test]
    fn display_preserves_input() {
        assert_eq!(v("8.1.3").to_string(), "8.1.3");
        assert_eq!(v("8.1.3.3992").to_string(), "8.1.3.3992");
    }
}
