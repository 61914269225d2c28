//! Controller position classification and proximity thresholds.
//!
//! Both correlation directions resolve controller callsigns through
//! [`classify`], so a flight->controller match and the mirrored
//! controller->aircraft match always use the same threshold.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Controller position type derived from the callsign suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerType {
    Ground,
    Tower,
    Approach,
    Center,
    Fss,
}

impl ControllerType {
    pub fn as_str(self) -> &'static str {
        match self {
            ControllerType::Ground => "Ground",
            ControllerType::Tower => "Tower",
            ControllerType::Approach => "Approach",
            ControllerType::Center => "Center",
            ControllerType::Fss => "FSS",
        }
    }

    /// Map a three-letter position suffix. Unknown suffixes fall back to Ground.
    fn from_suffix(suffix: &str) -> Self {
        match suffix {
            "GND" | "DEL" => ControllerType::Ground,
            "TWR" => ControllerType::Tower,
            "APP" | "DEP" => ControllerType::Approach,
            "CTR" => ControllerType::Center,
            "FSS" => ControllerType::Fss,
            _ => ControllerType::Ground,
        }
    }
}

impl fmt::Display for ControllerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proximity thresholds in nautical miles per controller type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerTypeProfile {
    pub ground_nm: f64,
    pub tower_nm: f64,
    pub approach_nm: f64,
    pub center_nm: f64,
    pub fss_nm: f64,
    /// Used for any type without its own entry.
    pub default_nm: f64,
}

impl Default for ControllerTypeProfile {
    fn default() -> Self {
        Self {
            ground_nm: 15.0,
            tower_nm: 15.0,
            approach_nm: 60.0,
            center_nm: 400.0,
            fss_nm: 1000.0,
            default_nm: 30.0,
        }
    }
}

impl ControllerTypeProfile {
    pub fn threshold_nm(&self, controller_type: ControllerType) -> f64 {
        match controller_type {
            ControllerType::Ground => self.ground_nm,
            ControllerType::Tower => self.tower_nm,
            ControllerType::Approach => self.approach_nm,
            ControllerType::Center => self.center_nm,
            ControllerType::Fss => self.fss_nm,
        }
    }

    /// Look up a threshold by type name; unknown names get `default_nm`.
    pub fn threshold_for_name(&self, type_name: &str) -> f64 {
        match type_name.trim().to_ascii_lowercase().as_str() {
            "ground" => self.ground_nm,
            "tower" => self.tower_nm,
            "approach" => self.approach_nm,
            "center" | "centre" => self.center_nm,
            "fss" => self.fss_nm,
            _ => self.default_nm,
        }
    }
}

/// Result of classifying a controller callsign.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub controller_type: ControllerType,
    pub proximity_threshold_nm: f64,
}

/// Classify a controller callsign by its last three characters.
///
/// Case-insensitive. Callsigns shorter than three characters are matched
/// whole. Never fails: anything unrecognised, including the empty string,
/// classifies as Ground.
pub fn classify(callsign: &str, profile: &ControllerTypeProfile) -> Classification {
    let upper = callsign.trim().to_ascii_uppercase();
    let suffix = match upper.char_indices().rev().nth(2) {
        Some((idx, _)) => &upper[idx..],
        None => upper.as_str(),
    };
    let controller_type = ControllerType::from_suffix(suffix);
    Classification {
        controller_type,
        proximity_threshold_nm: profile.threshold_nm(controller_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(callsign: &str) -> (ControllerType, f64) {
        let c = classify(callsign, &ControllerTypeProfile::default());
        (c.controller_type, c.proximity_threshold_nm)
    }

    #[test]
    fn threshold_table_matches_defaults() {
        let profile = ControllerTypeProfile::default();
        assert_eq!(profile.threshold_nm(ControllerType::Ground), 15.0);
        assert_eq!(profile.threshold_nm(ControllerType::Tower), 15.0);
        assert_eq!(profile.threshold_nm(ControllerType::Approach), 60.0);
        assert_eq!(profile.threshold_nm(ControllerType::Center), 400.0);
        assert_eq!(profile.threshold_nm(ControllerType::Fss), 1000.0);
        assert_eq!(profile.default_nm, 30.0);
    }

    #[test]
    fn suffixes_map_to_types() {
        assert_eq!(kind("SY_GND"), (ControllerType::Ground, 15.0));
        assert_eq!(kind("SY_DEL"), (ControllerType::Ground, 15.0));
        assert_eq!(kind("SY_TWR"), (ControllerType::Tower, 15.0));
        assert_eq!(kind("SY_APP"), (ControllerType::Approach, 60.0));
        assert_eq!(kind("SY_DEP"), (ControllerType::Approach, 60.0));
        assert_eq!(kind("ML_CTR"), (ControllerType::Center, 400.0));
        assert_eq!(kind("AU_FSS"), (ControllerType::Fss, 1000.0));
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(kind("sy_twr"), kind("SY_TWR"));
        assert_eq!(kind("Ml_Ctr").0, ControllerType::Center);
    }

    #[test]
    fn unknown_and_short_callsigns_fall_back_to_ground() {
        assert_eq!(kind("ZZZZZZ"), (ControllerType::Ground, 15.0));
        assert_eq!(kind(""), (ControllerType::Ground, 15.0));
        assert_eq!(kind("TW"), (ControllerType::Ground, 15.0));
        assert_eq!(kind("CTR"), (ControllerType::Center, 400.0));
    }

    #[test]
    fn classify_is_deterministic() {
        for callsign in ["SY_TWR", "XX", "BN_APP", "EGLL_N_APP", "ü_GND"] {
            assert_eq!(kind(callsign), kind(callsign));
        }
        assert_eq!(kind("ü_GND").0, ControllerType::Ground);
    }

    #[test]
    fn unknown_type_names_use_default_entry() {
        let profile = ControllerTypeProfile::default();
        assert_eq!(profile.threshold_for_name("Tower"), 15.0);
        assert_eq!(profile.threshold_for_name("radar"), 30.0);
    }

    #[test]
    fn custom_profile_overrides_thresholds() {
        let profile = ControllerTypeProfile {
            tower_nm: 20.0,
            ..ControllerTypeProfile::default()
        };
        assert_eq!(classify("SY_TWR", &profile).proximity_threshold_nm, 20.0);
    }
}
