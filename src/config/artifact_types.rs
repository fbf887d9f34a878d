use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Report formats an artifact can feed
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Html,
    Tsv,
    Timeline,
    Kml,
    CaseDb,
}

impl OutputKind {
    pub const ALL: [OutputKind; 5] = [
        OutputKind::Html,
        OutputKind::Tsv,
        OutputKind::Timeline,
        OutputKind::Kml,
        OutputKind::CaseDb,
    ];
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Html => write!(f, "html"),
            OutputKind::Tsv => write!(f, "tsv"),
            OutputKind::Timeline => write!(f, "timeline"),
            OutputKind::Kml => write!(f, "kml"),
            OutputKind::CaseDb => write!(f, "case_db"),
        }
    }
}

impl FromStr for OutputKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "html" => Ok(OutputKind::Html),
            "tsv" => Ok(OutputKind::Tsv),
            "timeline" => Ok(OutputKind::Timeline),
            "kml" => Ok(OutputKind::Kml),
            // "lava" is the legacy name of the case store
            "case_db" | "casedb" | "lava" => Ok(OutputKind::CaseDb),
            other => Err(anyhow!("unknown output kind '{}'", other)),
        }
    }
}

/// Set of output kinds, declared per artifact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputKinds(Vec<OutputKind>);

impl OutputKinds {
    pub fn all() -> Self {
        OutputKinds(OutputKind::ALL.to_vec())
    }

    pub fn only(kinds: &[OutputKind]) -> Self {
        let mut kinds = kinds.to_vec();
        kinds.sort();
        kinds.dedup();
        OutputKinds(kinds)
    }

    pub fn contains(&self, kind: OutputKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputKind> {
        self.0.iter()
    }
}

impl fmt::Display for OutputKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == OutputKind::ALL.len() {
            return write!(f, "all");
        }
        let names: Vec<String> = self.0.iter().map(|k| k.to_string()).collect();
        write!(f, "{}", names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_kind_display() {
        assert_eq!(OutputKind::Html.to_string(), "html");
        assert_eq!(OutputKind::CaseDb.to_string(), "case_db");
    }

    #[test]
    fn test_output_kind_from_str() {
        assert_eq!("HTML".parse::<OutputKind>().unwrap(), OutputKind::Html);
        assert_eq!("lava".parse::<OutputKind>().unwrap(), OutputKind::CaseDb);
        assert!("pdf".parse::<OutputKind>().is_err());
    }

    #[test]
    fn test_output_kinds_set() {
        let kinds = OutputKinds::only(&[OutputKind::Tsv, OutputKind::Html, OutputKind::Tsv]);
        assert!(kinds.contains(OutputKind::Html));
        assert!(!kinds.contains(OutputKind::Kml));
        assert_eq!(kinds.to_string(), "html,tsv");
        assert_eq!(OutputKinds::all().to_string(), "all");
    }

    #[test]
    fn test_yaml_serialization() {
        let yaml = serde_yaml::to_string(&OutputKind::CaseDb).unwrap();
        assert!(yaml.contains("case_db"));

        let deserialized: OutputKind = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(deserialized, OutputKind::CaseDb);
    }
}
