// Feature capabilities and the fixed catalog of implemented API versions.
// Each version declares the features it adds and the version it builds on;
// the capability set of a version is the union along that lineage.

use std::{collections::BTreeSet, fmt, str::FromStr};

use tracing::warn;

use crate::matrix::{
    error::MatrixError,
    version::{ApiVersion, SupportedVersion},
};

/// A named optional protocol behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Feature {
    CreateRoomV3,
    GetRoomInfoV1,
    GetRoomMembersV3,
    GetRoomPowerLevelsFromSyncV3,
    InviteMemberV3,
    RemoveMemberFromRoomV3,
    UpdateRoomAvatarV3,
    UpdateRoomNameV3,
    UpdateRoomTopicV3,
    UpdateRoomPowerLevelsV3,
    UploadContentV3,
    RefreshTokenV3,
    MediaCreateV1,
    SynapseCreateUserV2,
    SynapseGetUserInfoV2,
}

impl Feature {
    pub const ALL: [Feature; 15] = [
        Feature::CreateRoomV3,
        Feature::GetRoomInfoV1,
        Feature::GetRoomMembersV3,
        Feature::GetRoomPowerLevelsFromSyncV3,
        Feature::InviteMemberV3,
        Feature::RemoveMemberFromRoomV3,
        Feature::UpdateRoomAvatarV3,
        Feature::UpdateRoomNameV3,
        Feature::UpdateRoomTopicV3,
        Feature::UpdateRoomPowerLevelsV3,
        Feature::UploadContentV3,
        Feature::RefreshTokenV3,
        Feature::MediaCreateV1,
        Feature::SynapseCreateUserV2,
        Feature::SynapseGetUserInfoV2,
    ];

    /// Fully qualified feature name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::CreateRoomV3 => "matrix.create_room_v3",
            Feature::GetRoomInfoV1 => "matrix.get_room_info_v1",
            Feature::GetRoomMembersV3 => "matrix.get_room_members_v3",
            Feature::GetRoomPowerLevelsFromSyncV3 => "matrix.get_room_powerlevels_from_sync_v3",
            Feature::InviteMemberV3 => "matrix.invite_member_v3",
            Feature::RemoveMemberFromRoomV3 => "matrix.remove_member_from_room_v3",
            Feature::UpdateRoomAvatarV3 => "matrix.update_room_avatar_v3",
            Feature::UpdateRoomNameV3 => "matrix.update_room_name_v3",
            Feature::UpdateRoomTopicV3 => "matrix.update_room_topic_v3",
            Feature::UpdateRoomPowerLevelsV3 => "matrix.update_room_power_levels_v3",
            Feature::UploadContentV3 => "matrix.upload_content_v3",
            Feature::RefreshTokenV3 => "matrix.refresh_token_v3",
            Feature::MediaCreateV1 => "matrix.media_create_v1",
            Feature::SynapseCreateUserV2 => "synapse.create_user_v2",
            Feature::SynapseGetUserInfoV2 => "synapse.get_user_info_v2",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = MatrixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .into_iter()
            .find(|feature| feature.as_str() == s)
            .ok_or_else(|| MatrixError::Protocol(format!("unknown feature: {s}")))
    }
}

/// A feature requirement: one feature, or any one of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    One(Feature),
    AnyOf(Vec<Feature>),
}

impl Requirement {
    pub fn is_met_by(&self, capabilities: &BTreeSet<Feature>) -> bool {
        match self {
            Requirement::One(feature) => capabilities.contains(feature),
            Requirement::AnyOf(group) => group.iter().any(|f| capabilities.contains(f)),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::One(feature) => write!(f, "'{feature}'"),
            Requirement::AnyOf(group) => {
                let names: Vec<&str> = group.iter().map(Feature::as_str).collect();
                write!(f, "none of '{}'", names.join(", "))
            }
        }
    }
}

impl From<Feature> for Requirement {
    fn from(feature: Feature) -> Self {
        Requirement::One(feature)
    }
}

impl From<Vec<Feature>> for Requirement {
    fn from(group: Vec<Feature>) -> Self {
        Requirement::AnyOf(group)
    }
}

impl From<&[Feature]> for Requirement {
    fn from(group: &[Feature]) -> Self {
        Requirement::AnyOf(group.to_vec())
    }
}

impl<const N: usize> From<[Feature; N]> for Requirement {
    fn from(group: [Feature; N]) -> Self {
        Requirement::AnyOf(group.to_vec())
    }
}

/// Declaration of one implemented API version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSpec {
    /// `v<MAJOR>p<MINOR>`.
    pub identifier: &'static str,
    /// Identifier of the version whose capabilities this one inherits.
    pub inherits: Option<&'static str>,
    /// Features added by this version.
    pub features: &'static [Feature],
}

const BUILTIN: &[VersionSpec] = &[
    VersionSpec {
        identifier: "v1p1",
        inherits: None,
        features: &[
            Feature::CreateRoomV3,
            Feature::GetRoomInfoV1,
            Feature::GetRoomMembersV3,
            Feature::GetRoomPowerLevelsFromSyncV3,
            Feature::InviteMemberV3,
            Feature::RemoveMemberFromRoomV3,
            Feature::UpdateRoomAvatarV3,
            Feature::UpdateRoomNameV3,
            Feature::UpdateRoomTopicV3,
            Feature::UpdateRoomPowerLevelsV3,
            Feature::UploadContentV3,
            Feature::SynapseCreateUserV2,
            Feature::SynapseGetUserInfoV2,
        ],
    },
    VersionSpec { identifier: "v1p2", inherits: Some("v1p1"), features: &[] },
    VersionSpec {
        identifier: "v1p3",
        inherits: Some("v1p2"),
        features: &[Feature::RefreshTokenV3],
    },
    VersionSpec { identifier: "v1p4", inherits: Some("v1p3"), features: &[] },
    VersionSpec { identifier: "v1p5", inherits: Some("v1p4"), features: &[] },
    VersionSpec { identifier: "v1p6", inherits: Some("v1p5"), features: &[] },
    VersionSpec {
        identifier: "v1p7",
        inherits: Some("v1p6"),
        features: &[Feature::MediaCreateV1],
    },
];

/// Registry of implemented versions.
#[derive(Debug, Clone)]
pub struct Catalog {
    specs: Vec<VersionSpec>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Catalog {
    /// The versions this client ships with, `v1p1` through `v1p7`.
    pub fn builtin() -> Self {
        Self { specs: BUILTIN.to_vec() }
    }

    /// A catalog of caller-supplied specs. Lineage is checked on lookup.
    pub fn from_specs(specs: Vec<VersionSpec>) -> Self {
        Self { specs }
    }

    /// Supported versions in ascending order.
    ///
    /// Entries whose identifier is not `v<digits>p<digits>` are skipped. Fails
    /// if an entry inherits from a version the catalog does not declare, or if
    /// two entries share an identifier.
    pub fn list_supported_versions(&self) -> Result<Vec<SupportedVersion>, MatrixError> {
        let mut versions = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            let Some(version) = ApiVersion::from_identifier(spec.identifier) else {
                warn!("ignoring catalog entry with malformed identifier {:?}", spec.identifier);
                continue;
            };
            if let Some(parent) = spec.inherits {
                if self.find(parent).is_none() {
                    return Err(MatrixError::Catalog(format!(
                        "{} inherits from unknown version {parent}",
                        spec.identifier
                    )));
                }
            }
            if versions.iter().any(|v: &SupportedVersion| v.version == version) {
                return Err(MatrixError::Catalog(format!(
                    "duplicate version {}",
                    spec.identifier
                )));
            }
            versions.push(SupportedVersion::new(version));
        }
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    /// The capability set of `identifier`, including every inherited feature.
    pub fn capabilities(&self, identifier: &str) -> Result<BTreeSet<Feature>, MatrixError> {
        let mut features = BTreeSet::new();
        let mut visited: Vec<&str> = Vec::new();
        let mut next = Some(identifier);

        while let Some(current) = next {
            if visited.contains(&current) {
                return Err(MatrixError::Catalog(format!(
                    "inheritance cycle through {current}"
                )));
            }
            visited.push(current);

            let spec = self
                .find(current)
                .ok_or_else(|| MatrixError::Catalog(format!("unknown version {current}")))?;
            features.extend(spec.features.iter().copied());
            next = spec.inherits;
        }

        Ok(features)
    }

    fn find(&self, identifier: &str) -> Option<&VersionSpec> {
        self.specs.iter().find(|spec| spec.identifier == identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_lists_v1p1_through_v1p7() {
        let versions = Catalog::builtin().list_supported_versions().unwrap();
        let ids: Vec<&str> = versions.iter().map(|v| v.identifier.as_str()).collect();
        assert_eq!(ids, ["v1p1", "v1p2", "v1p3", "v1p4", "v1p5", "v1p6", "v1p7"]);
        assert_eq!(versions[6].version.to_string(), "1.7");
    }

    #[test]
    fn capabilities_include_inherited_features() {
        let catalog = Catalog::builtin();

        let v1p1 = catalog.capabilities("v1p1").unwrap();
        assert!(v1p1.contains(&Feature::CreateRoomV3));
        assert!(!v1p1.contains(&Feature::RefreshTokenV3));

        let v1p7 = catalog.capabilities("v1p7").unwrap();
        assert!(v1p7.contains(&Feature::CreateRoomV3));
        assert!(v1p7.contains(&Feature::RefreshTokenV3));
        assert!(v1p7.contains(&Feature::MediaCreateV1));
    }

    #[test]
    fn skips_malformed_identifiers() {
        let catalog = Catalog::from_specs(vec![
            VersionSpec { identifier: "v1p1", inherits: None, features: &[] },
            VersionSpec { identifier: "helpers", inherits: None, features: &[] },
        ]);
        let versions = catalog.list_supported_versions().unwrap();
        assert_eq!(versions.len(), 1);
    }

    #[test]
    fn rejects_dangling_inheritance() {
        let catalog = Catalog::from_specs(vec![VersionSpec {
            identifier: "v1p2",
            inherits: Some("v1p1"),
            features: &[],
        }]);
        assert!(matches!(catalog.list_supported_versions(), Err(MatrixError::Catalog(_))));
    }

    #[test]
    fn detects_inheritance_cycles() {
        let catalog = Catalog::from_specs(vec![
            VersionSpec { identifier: "v1p1", inherits: Some("v1p2"), features: &[] },
            VersionSpec { identifier: "v1p2", inherits: Some("v1p1"), features: &[] },
        ]);
        assert!(matches!(catalog.capabilities("v1p2"), Err(MatrixError::Catalog(_))));
    }

    #[test]
    fn any_of_requirement_is_logical_or() {
        let caps: BTreeSet<Feature> = [Feature::GetRoomInfoV1].into_iter().collect();
        assert!(Requirement::from([Feature::MediaCreateV1, Feature::GetRoomInfoV1]).is_met_by(&caps));
        assert!(!Requirement::from([Feature::MediaCreateV1, Feature::RefreshTokenV3]).is_met_by(&caps));
        assert!(!Requirement::AnyOf(Vec::new()).is_met_by(&caps));
    }

    #[test]
    fn feature_names_round_trip() {
        for feature in Feature::ALL {
            assert_eq!(feature.as_str().parse::<Feature>().unwrap(), feature);
        }
        assert!("matrix.nope".parse::<Feature>().is_err());
    }
}
