//! The L/S/M/F/C priority bitset from spec.md §3 and §4.5, and its
//! arithmetic rules (a tag is either held by the Lead or by at least one
//! child, never both, never neither).

use bitflags::bitflags;
use std::fmt;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Tags: u8 {
        const LEAD   = 0b0000_0001;
        const SLOW   = 0b0000_0010;
        const MEDIUM = 0b0000_0100;
        const FAST   = 0b0000_1000;
        const CACHE  = 0b0001_0000;
    }
}

impl Tags {
    /// The four delegable tags a child queue can carry. `LEAD` is never delegated.
    pub const DELEGABLE: Tags = Tags::SLOW.union(Tags::MEDIUM).union(Tags::FAST).union(Tags::CACHE);

    pub fn label(self) -> String {
        let mut out = String::new();
        if self.contains(Tags::LEAD) {
            out.push('L');
        }
        if self.contains(Tags::SLOW) {
            out.push('S');
        }
        if self.contains(Tags::MEDIUM) {
            out.push('M');
        }
        if self.contains(Tags::FAST) {
            out.push('F');
        }
        if self.contains(Tags::CACHE) {
            out.push('C');
        }
        out
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One of the four delegable priority classes a cache entry or an explicit
/// queue-tag-override can request. `spec.md` calls this `queue_type_hint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Slow,
    Medium,
    Fast,
    Cache,
}

impl QueueKind {
    pub fn as_tag(self) -> Tags {
        match self {
            QueueKind::Slow => Tags::SLOW,
            QueueKind::Medium => Tags::MEDIUM,
            QueueKind::Fast => Tags::FAST,
            QueueKind::Cache => Tags::CACHE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QueueKind::Slow => "slow",
            QueueKind::Medium => "medium",
            QueueKind::Fast => "fast",
            QueueKind::Cache => "cache",
        }
    }
}

impl std::str::FromStr for QueueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "slow" => Ok(QueueKind::Slow),
            "medium" => Ok(QueueKind::Medium),
            "fast" => Ok(QueueKind::Fast),
            "cache" => Ok(QueueKind::Cache),
            other => Err(format!("unknown queue type hint: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_orders_ls_m_f_c() {
        let all = Tags::LEAD | Tags::MEDIUM | Tags::CACHE;
        assert_eq!(all.label(), "LMC");
    }

    #[test]
    fn delegable_excludes_lead() {
        assert!(!Tags::DELEGABLE.contains(Tags::LEAD));
        assert!(Tags::DELEGABLE.contains(Tags::FAST));
    }

    #[test]
    fn queue_kind_roundtrips_through_str() {
        for kind in [QueueKind::Slow, QueueKind::Medium, QueueKind::Fast, QueueKind::Cache] {
            let parsed: QueueKind = kind.label().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }
}
