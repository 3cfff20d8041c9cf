//! Storage-class parameter vocabulary and placement attribute validation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ProvisionError;

/// Directory, relative to the cluster mount, that holds volume directories.
pub const VOLUME_PATH: &str = "volumePath";
/// Directory, relative to the cluster mount, that holds delta images.
pub const DELTAS_PATH: &str = "deltasPath";
/// Volume identifier recorded on the handle.
pub const VOLUME_ID: &str = "volumeID";
/// Alternate spelling of [`VOLUME_ID`] accepted on input.
pub const VOLUME_ID_ALT: &str = "volumeId";
/// Requested capacity in human-readable form.
pub const SIZE: &str = "size";
/// Name of the secret holding cluster credentials.
pub const SECRET_NAME: &str = "secretName";
/// Cluster name recorded on the handle.
pub const CLUSTER_NAME: &str = "clusterName";
/// Finalizer token recorded on the handle.
pub const FINALIZER: &str = "finalizer";
/// Prefix of platform-owned keys that are passed through untouched.
pub const PASSTHROUGH_PREFIX: &str = "kubernetes.io/";

const RESERVED: [&str; 8] = [
    VOLUME_PATH,
    DELTAS_PATH,
    VOLUME_ID,
    VOLUME_ID_ALT,
    SIZE,
    SECRET_NAME,
    CLUSTER_NAME,
    FINALIZER,
];

const MAX_REPLICAS: u8 = 64;
const MAX_TIER: u8 = 3;

/// How the engine treats parameters it does not recognise.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum UnknownParameterPolicy {
    /// Log and skip unknown keys.
    #[default]
    Ignore,
    /// Fail validation on unknown keys.
    Reject,
}

/// Placement parameters and the cluster attributes they map to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PlacementKey {
    /// `vzsReplicas` → `replicas`.
    Replicas,
    /// `vzsTier` → `tier`.
    Tier,
    /// `vzsEncoding` → `encoding`.
    Encoding,
    /// `vzsFailureDomain` → `failure-domain`.
    FailureDomain,
}

impl PlacementKey {
    /// Every placement key in the order attributes are applied.
    pub const ALL: [Self; 4] = [
        Self::Replicas,
        Self::Tier,
        Self::Encoding,
        Self::FailureDomain,
    ];

    /// Parameter name as it appears in storage-class options.
    #[must_use]
    pub const fn parameter(self) -> &'static str {
        match self {
            Self::Replicas => "vzsReplicas",
            Self::Tier => "vzsTier",
            Self::Encoding => "vzsEncoding",
            Self::FailureDomain => "vzsFailureDomain",
        }
    }

    /// Attribute name understood by `vstorage set-attr`.
    #[must_use]
    pub const fn attribute(self) -> &'static str {
        match self {
            Self::Replicas => "replicas",
            Self::Tier => "tier",
            Self::Encoding => "encoding",
            Self::FailureDomain => "failure-domain",
        }
    }

    /// Looks up a placement key by its parameter name.
    #[must_use]
    pub fn from_parameter(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.parameter() == name)
    }
}

/// Returns `true` when `key` is part of the parameter vocabulary or is a
/// platform pass-through key.
#[must_use]
pub fn is_known_parameter(key: &str) -> bool {
    RESERVED.contains(&key)
        || PlacementKey::from_parameter(key).is_some()
        || key.starts_with(PASSTHROUGH_PREFIX)
}

/// Replica policy written as `N` or `N:M` (normal and minimum replicas).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReplicaSpec {
    normal: u8,
    minimum: Option<u8>,
}

impl FromStr for ReplicaSpec {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (normal_raw, minimum_raw) = match raw.split_once(':') {
            Some((normal, minimum)) => (normal, Some(minimum)),
            None => (raw, None),
        };
        let normal = parse_bounded(normal_raw, 1, MAX_REPLICAS)
            .ok_or_else(|| format!("replica count must be between 1 and {MAX_REPLICAS}"))?;
        let minimum = minimum_raw
            .map(|value| {
                parse_bounded(value, 1, normal).ok_or_else(|| {
                    format!("minimum replicas must be between 1 and the normal count {normal}")
                })
            })
            .transpose()?;
        Ok(Self { normal, minimum })
    }
}

impl fmt::Display for ReplicaSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.minimum {
            Some(minimum) => write!(f, "{}:{minimum}", self.normal),
            None => write!(f, "{}", self.normal),
        }
    }
}

/// Erasure coding scheme written as `M+N/K`.
///
/// `M` data stripes, `N` parity stripes, tolerating `K` failures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EncodingSpec {
    data: u8,
    parity: u8,
    tolerance: u8,
}

impl FromStr for EncodingSpec {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let shape = || format!("encoding {raw:?} must look like M+N/K");
        let (data_raw, rest) = raw.split_once('+').ok_or_else(shape)?;
        let (parity_raw, tolerance_raw) = rest.split_once('/').ok_or_else(shape)?;

        let data = parse_bounded(data_raw, 1, u8::MAX).ok_or_else(shape)?;
        let parity = parse_bounded(parity_raw, 1, u8::MAX).ok_or_else(shape)?;
        let tolerance = parse_bounded(tolerance_raw, 1, parity)
            .ok_or_else(|| format!("encoding {raw:?} tolerance must be between 1 and {parity}"))?;
        Ok(Self {
            data,
            parity,
            tolerance,
        })
    }
}

impl fmt::Display for EncodingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}/{}", self.data, self.parity, self.tolerance)
    }
}

/// Failure domain used when spreading replicas.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureDomain {
    /// Spread across disks.
    Disk,
    /// Spread across hosts.
    Host,
    /// Spread across racks.
    Rack,
    /// Spread across rows.
    Row,
    /// Spread across rooms.
    Room,
}

impl FromStr for FailureDomain {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "disk" => Ok(Self::Disk),
            "host" => Ok(Self::Host),
            "rack" => Ok(Self::Rack),
            "row" => Ok(Self::Row),
            "room" => Ok(Self::Room),
            other => Err(format!(
                "failure domain {other:?} must be one of disk, host, rack, row, room"
            )),
        }
    }
}

impl fmt::Display for FailureDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disk => "disk",
            Self::Host => "host",
            Self::Rack => "rack",
            Self::Row => "row",
            Self::Room => "room",
        })
    }
}

/// Storage tier, `0` through `3`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tier(u8);

impl FromStr for Tier {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_bounded(raw, 0, MAX_TIER)
            .map(Self)
            .ok_or_else(|| format!("tier {raw:?} must be between 0 and {MAX_TIER}"))
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validated placement attributes for one volume.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PlacementAttributes {
    replicas: Option<ReplicaSpec>,
    tier: Option<Tier>,
    encoding: Option<EncodingSpec>,
    failure_domain: Option<FailureDomain>,
}

impl PlacementAttributes {
    /// Extracts and validates placement parameters from `options`. Absent
    /// keys leave the cluster default in place.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Validation`] naming the offending parameter
    /// when a value is malformed.
    pub fn from_options(options: &BTreeMap<String, String>) -> Result<Self, ProvisionError> {
        Ok(Self {
            replicas: parse_option(options, PlacementKey::Replicas)?,
            tier: parse_option(options, PlacementKey::Tier)?,
            encoding: parse_option(options, PlacementKey::Encoding)?,
            failure_domain: parse_option(options, PlacementKey::FailureDomain)?,
        })
    }

    /// Returns `true` when no placement attribute was requested.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.replicas.is_none()
            && self.tier.is_none()
            && self.encoding.is_none()
            && self.failure_domain.is_none()
    }

    /// Returns `(attribute, value)` pairs in application order.
    #[must_use]
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        PlacementKey::ALL
            .into_iter()
            .filter_map(|key| {
                let value = match key {
                    PlacementKey::Replicas => self.replicas.map(|value| value.to_string()),
                    PlacementKey::Tier => self.tier.map(|value| value.to_string()),
                    PlacementKey::Encoding => self.encoding.map(|value| value.to_string()),
                    PlacementKey::FailureDomain => {
                        self.failure_domain.map(|value| value.to_string())
                    }
                }?;
                Some((key.attribute(), value))
            })
            .collect()
    }
}

fn parse_option<T>(
    options: &BTreeMap<String, String>,
    key: PlacementKey,
) -> Result<Option<T>, ProvisionError>
where
    T: FromStr<Err = String>,
{
    options
        .get(key.parameter())
        .map(|raw| raw.trim().parse::<T>())
        .transpose()
        .map_err(|message| ProvisionError::validation(key.parameter(), message))
}

fn parse_bounded(raw: &str, min: u8, max: u8) -> Option<u8> {
    raw.trim()
        .parse::<u8>()
        .ok()
        .filter(|value| (min..=max).contains(value))
}
