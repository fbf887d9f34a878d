//! Declarative code-to-label tables.
//!
//! Enumerations stored as integers in evidence databases change meaning
//! between OS releases, so every entry is scoped to a major version range.

/// Inclusive range of major OS versions; open ends are unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

impl VersionRange {
    pub const ANY: VersionRange = VersionRange { min: None, max: None };

    pub const fn since(min: u32) -> Self {
        VersionRange { min: Some(min), max: None }
    }

    pub const fn between(min: u32, max: u32) -> Self {
        VersionRange {
            min: Some(min),
            max: Some(max),
        }
    }

    /// An unknown device version is assumed to be current: it matches ranges open at the top
    pub fn contains(&self, major: Option<u32>) -> bool {
        match major {
            Some(v) => self.min.map_or(true, |min| v >= min) && self.max.map_or(true, |max| v <= max),
            None => self.max.is_none(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LabelEntry {
    pub field: &'static str,
    pub versions: VersionRange,
    pub code: i64,
    pub label: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct LabelTable {
    entries: &'static [LabelEntry],
}

impl LabelTable {
    pub const fn new(entries: &'static [LabelEntry]) -> Self {
        LabelTable { entries }
    }

    /// Label for `code` in `field` on a device of major version `os_major`.
    pub fn lookup(&self, field: &str, os_major: Option<u32>, code: i64) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|e| e.field == field && e.code == code && e.versions.contains(os_major))
            .map(|e| e.label)
    }

    /// Like [`lookup`](Self::lookup), falling back to `Unknown (<code>)`.
    pub fn label_or_code(&self, field: &str, os_major: Option<u32>, code: i64) -> String {
        match self.lookup(field, os_major, code) {
            Some(label) => label.to_string(),
            None => format!("Unknown ({})", code),
        }
    }
}

const fn entry(field: &'static str, versions: VersionRange, code: i64, label: &'static str) -> LabelEntry {
    LabelEntry {
        field,
        versions,
        code,
        label,
    }
}

/// routined location cache enumerations
pub const ROUTINED_LABELS: LabelTable = LabelTable::new(&[
    entry("ZSIGNALENVIRONMENTTYPE", VersionRange::ANY, 0, "Unavailable"),
    entry("ZSIGNALENVIRONMENTTYPE", VersionRange::since(13), 1, "Rural"),
    entry("ZSIGNALENVIRONMENTTYPE", VersionRange::since(13), 2, "Suburban"),
    entry("ZSIGNALENVIRONMENTTYPE", VersionRange::since(13), 3, "Urban"),
    entry("ZSIGNALENVIRONMENTTYPE", VersionRange::since(13), 4, "Dense Urban"),
    entry("ZSIGNALENVIRONMENTTYPE", VersionRange::between(10, 12), 1, "Weak"),
    entry("ZSIGNALENVIRONMENTTYPE", VersionRange::between(10, 12), 2, "Strong"),
]);
