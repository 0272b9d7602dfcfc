use crate::engine::cascade::CascadingAction;
use crate::errors::{ReposeError, Result};
use std::str::FromStr;

/// Set of cascading actions enabled on one association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CascadeStyle(u8);

impl CascadeStyle {
    pub const NONE: CascadeStyle = CascadeStyle(0);
    pub const PERSIST: CascadeStyle = CascadeStyle(1);
    pub const MERGE: CascadeStyle = CascadeStyle(1 << 1);
    pub const REMOVE: CascadeStyle = CascadeStyle(1 << 2);
    pub const REFRESH: CascadeStyle = CascadeStyle(1 << 3);
    pub const LOCK: CascadeStyle = CascadeStyle(1 << 4);
    pub const ALL: CascadeStyle = CascadeStyle(0b1_1111);

    pub fn union(self, other: CascadeStyle) -> CascadeStyle {
        CascadeStyle(self.0 | other.0)
    }

    pub fn includes(self, action: CascadingAction) -> bool {
        let required = match action {
            CascadingAction::Persist | CascadingAction::PersistOnFlush => Self::PERSIST,
            CascadingAction::Merge => Self::MERGE,
            CascadingAction::Delete => Self::REMOVE,
            CascadingAction::Refresh => Self::REFRESH,
            CascadingAction::Lock => Self::LOCK,
        };
        self.0 & required.0 != 0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for CascadeStyle {
    type Output = CascadeStyle;

    fn bitor(self, rhs: CascadeStyle) -> CascadeStyle {
        self.union(rhs)
    }
}

/// Parses a comma-separated list such as `persist,merge` or `all`
impl FromStr for CascadeStyle {
    type Err = ReposeError;

    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .try_fold(CascadeStyle::NONE, |acc, part| {
                let style = match part.to_ascii_lowercase().as_str() {
                    "none" => CascadeStyle::NONE,
                    "persist" | "save" => CascadeStyle::PERSIST,
                    "merge" => CascadeStyle::MERGE,
                    "remove" | "delete" => CascadeStyle::REMOVE,
                    "refresh" => CascadeStyle::REFRESH,
                    "lock" => CascadeStyle::LOCK,
                    "all" => CascadeStyle::ALL,
                    other => {
                        return Err(ReposeError::Configuration {
                            message: format!("unknown cascade style '{}'", other),
                        })
                    }
                };
                Ok(acc | style)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_covers_persist_on_flush() {
        assert!(CascadeStyle::PERSIST.includes(CascadingAction::Persist));
        assert!(CascadeStyle::PERSIST.includes(CascadingAction::PersistOnFlush));
        assert!(!CascadeStyle::PERSIST.includes(CascadingAction::Merge));
    }

    #[test]
    fn test_all_includes_everything() {
        for action in [
            CascadingAction::Persist,
            CascadingAction::Merge,
            CascadingAction::Delete,
            CascadingAction::Refresh,
            CascadingAction::Lock,
        ] {
            assert!(CascadeStyle::ALL.includes(action));
        }
        assert!(!CascadeStyle::NONE.includes(CascadingAction::Persist));
    }

    #[test]
    fn test_parse_list() {
        let style: CascadeStyle = "persist, remove".parse().unwrap();
        assert!(style.includes(CascadingAction::Delete));
        assert!(!style.includes(CascadingAction::Refresh));
        assert!("bogus".parse::<CascadeStyle>().is_err());
        assert!("".parse::<CascadeStyle>().unwrap().is_none());
    }
}
