//! `PR_EC_SEARCHCRIT` persistence: an interop XML document describing a
//! search folder's scope and restriction, so a restart can re-enter
//! `rebuilding` without the client re-submitting criteria (§4.4).
//!
//! The original stores a gSOAP-serialised `searchCriteria` struct
//! (`provider/libserver/ECSearchFolders.cpp`,
//! `LoadSearchCriteria2`/`SaveSearchCriteria2`) with the folder scope,
//! a recursive flag, and the restriction tree. We keep the same shape
//! — a `SearchCriteria` root element with `recursive`, `folders`, and
//! `restriction` children — serialised with `quick-xml`'s serde support
//! instead of gSOAP.

use kopano_core::restriction::Restriction;
use kopano_core::{Error, FolderId, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "SearchCriteria")]
pub struct SearchCriteria {
    pub recursive: bool,
    pub folders: Folders,
    /// The restriction tree, carried as an embedded JSON blob rather than
    /// translated into XML elements per node — `Restriction` already has
    /// a stable `serde` shape (used for the in-memory rule condition
    /// representation too), and round-tripping it through that avoids a
    /// second, XML-specific encoding of the same algebra.
    pub restriction_json: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folders {
    #[serde(rename = "folder", default)]
    pub folder: Vec<FolderId>,
}

impl SearchCriteria {
    #[must_use]
    pub fn new(folders: Vec<FolderId>, recursive: bool, restriction: &Restriction) -> Self {
        Self {
            recursive,
            folders: Folders { folder: folders },
            restriction_json: serde_json::to_string(restriction).unwrap_or_default(),
        }
    }

    pub fn restriction(&self) -> Result<Restriction> {
        serde_json::from_str(&self.restriction_json).map_err(Error::from)
    }

    pub fn to_xml(&self) -> Result<String> {
        quick_xml::se::to_string(self).map_err(|e| Error::Xml(e.to_string()))
    }

    pub fn from_xml(xml: &str) -> Result<Self> {
        quick_xml::de::from_str(xml).map_err(|e| Error::Xml(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kopano_core::proptag::well_known::PR_SUBJECT;
    use kopano_core::restriction::FuzzyLevel;

    #[test]
    fn round_trips_through_xml() {
        let restriction = Restriction::Content {
            prop: PR_SUBJECT,
            value: "quarterly".into(),
            fuzzy: FuzzyLevel::substring_ignore_case(),
        };
        let criteria = SearchCriteria::new(vec![1, 2, 3], true, &restriction);
        let xml = criteria.to_xml().unwrap();
        let parsed = SearchCriteria::from_xml(&xml).unwrap();
        assert_eq!(parsed, criteria);
        assert_eq!(parsed.restriction().unwrap(), restriction);
    }

    #[test]
    fn empty_folder_list_round_trips() {
        let criteria = SearchCriteria::new(vec![], false, &Restriction::True);
        let xml = criteria.to_xml().unwrap();
        let parsed = SearchCriteria::from_xml(&xml).unwrap();
        assert!(parsed.folders.folder.is_empty());
    }
}
