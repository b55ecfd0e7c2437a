use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-study feature flags.
///
/// A study with no stored flags gets [`StudyModes::default`], which enables
/// everything; the first reader persists that default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyModes {
    /// When `false`, participants run in preview mode and nothing is persisted.
    pub data_collection_enabled: bool,
    pub study_navigator_enabled: bool,
    pub analytics_interface_publicly_accessible: bool,
}

impl Default for StudyModes {
    fn default() -> Self {
        Self {
            data_collection_enabled: true,
            study_navigator_enabled: true,
            analytics_interface_publicly_accessible: true,
        }
    }
}

impl StudyModes {
    pub fn get(&self, key: ModeKey) -> bool {
        match key {
            ModeKey::DataCollectionEnabled => self.data_collection_enabled,
            ModeKey::StudyNavigatorEnabled => self.study_navigator_enabled,
            ModeKey::AnalyticsInterfacePubliclyAccessible => {
                self.analytics_interface_publicly_accessible
            }
        }
    }

    pub fn set(&mut self, key: ModeKey, enabled: bool) {
        match key {
            ModeKey::DataCollectionEnabled => self.data_collection_enabled = enabled,
            ModeKey::StudyNavigatorEnabled => self.study_navigator_enabled = enabled,
            ModeKey::AnalyticsInterfacePubliclyAccessible => {
                self.analytics_interface_publicly_accessible = enabled
            }
        }
    }
}

/// Names a single flag in [`StudyModes`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModeKey {
    DataCollectionEnabled,
    StudyNavigatorEnabled,
    AnalyticsInterfacePubliclyAccessible,
}

impl fmt::Display for ModeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DataCollectionEnabled => "dataCollectionEnabled",
            Self::StudyNavigatorEnabled => "studyNavigatorEnabled",
            Self::AnalyticsInterfacePubliclyAccessible => "analyticsInterfacePubliclyAccessible",
        };
        f.write_str(name)
    }
}
