use std::collections::HashSet;

use crate::db::models::TeamMember;
use crate::provider::headers::normalize_address;

/// The addresses allowed to contribute messages to a project.
///
/// An empty whitelist admits nobody.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    addresses: HashSet<String>,
}

impl Whitelist {
    pub fn from_members(members: &[TeamMember]) -> Self {
        Self::from_addresses(members.iter().map(|m| m.email_address.as_str()))
    }

    pub fn from_addresses<'a>(addresses: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            addresses: addresses.into_iter().filter_map(normalize_address).collect(),
        }
    }

    pub fn admits(&self, sender: &str) -> bool {
        normalize_address(sender).is_some_and(|address| self.addresses.contains(&address))
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::Whitelist;
    use crate::db::models::{Side, TeamMember};

    #[test]
    fn admits_display_name_forms_of_listed_addresses() {
        let whitelist = Whitelist::from_members(&[TeamMember {
            project_id: "p".to_string(),
            email_address: "Sam@Build.example".to_string(),
            display_name: None,
            side: Side::Contractor,
        }]);

        assert!(whitelist.admits("Sam Rivera <sam@build.example>"));
        assert!(whitelist.admits("SAM@BUILD.EXAMPLE"));
        assert!(!whitelist.admits("spam@offers.example"));
        assert!(!whitelist.admits("Sam Rivera"));
    }

    #[test]
    fn empty_whitelist_admits_nobody() {
        let whitelist = Whitelist::default();
        assert!(whitelist.is_empty());
        assert!(!whitelist.admits("sam@build.example"));
    }
}
