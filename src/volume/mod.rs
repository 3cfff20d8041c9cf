//! Creation and removal of ploop volumes inside a mounted cluster.
//!
//! A volume lives at `<mount>/<volumePath>/<volumeID>` with its delta image
//! at `<mount>/<deltasPath>/<volumeID>.image`. A small JSON record written
//! next to the volume directory makes repeated creation requests
//! recognisable.

mod attributes;
mod ploop;

use std::collections::BTreeMap;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::ProvisionError;
use crate::fs;
use crate::params::{self, PlacementAttributes};
use crate::size::size_in_kib;

pub use attributes::{AttributeSetter, VstorageAttributes};
pub use ploop::{PloopCli, PloopDriver};

/// File whose presence marks a directory as a ploop volume.
pub const DESCRIPTOR_FILE: &str = "DiskDescriptor.xml";
/// Suffix of the provisioning record written next to each volume.
pub const MANIFEST_SUFFIX: &str = ".vstorage-provisioner.json";
const IMAGE_SUFFIX: &str = ".image";

/// Where a volume lives relative to the cluster mount.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeLocation {
    volume_id: String,
    volume_path: Utf8PathBuf,
    deltas_path: Utf8PathBuf,
}

impl VolumeLocation {
    /// Reads `volumePath`, `deltasPath` and `volumeID` (or `volumeId`).
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Validation`] when a required key is missing
    /// or a path would escape the cluster mount.
    pub fn from_options(options: &BTreeMap<String, String>) -> Result<Self, ProvisionError> {
        let volume_path =
            relative_path(params::VOLUME_PATH, required(options, params::VOLUME_PATH)?)?;
        let deltas_path = match options.get(params::DELTAS_PATH) {
            Some(raw) if !raw.trim().is_empty() => relative_path(params::DELTAS_PATH, raw)?,
            _ => volume_path.clone(),
        };
        let volume_id = options
            .get(params::VOLUME_ID)
            .or_else(|| options.get(params::VOLUME_ID_ALT))
            .map(|raw| raw.trim())
            .filter(|raw| !raw.is_empty())
            .ok_or_else(|| {
                ProvisionError::validation(params::VOLUME_ID, "volume identifier is required")
            })?;
        if !is_single_component(volume_id) {
            return Err(ProvisionError::validation(
                params::VOLUME_ID,
                format!("{volume_id:?} must be a single path component"),
            ));
        }

        Ok(Self {
            volume_id: volume_id.to_owned(),
            volume_path,
            deltas_path,
        })
    }

    /// Volume identifier.
    #[must_use]
    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }

    /// Volume directory below `mount`.
    #[must_use]
    pub fn volume_dir(&self, mount: &Utf8Path) -> Utf8PathBuf {
        mount.join(&self.volume_path).join(&self.volume_id)
    }

    /// Delta image path below `mount`.
    #[must_use]
    pub fn image_path(&self, mount: &Utf8Path) -> Utf8PathBuf {
        mount
            .join(&self.deltas_path)
            .join(format!("{}{IMAGE_SUFFIX}", self.volume_id))
    }

    /// Provisioning record path below `mount`.
    #[must_use]
    pub fn manifest_path(&self, mount: &Utf8Path) -> Utf8PathBuf {
        mount
            .join(&self.volume_path)
            .join(format!("{}{MANIFEST_SUFFIX}", self.volume_id))
    }
}

/// Validated request to create one volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeSpec {
    /// Location of the volume.
    pub location: VolumeLocation,
    /// Size in KiB.
    pub size_kib: u64,
    /// Placement attributes to apply after creation.
    pub placement: PlacementAttributes,
}

impl VolumeSpec {
    /// Builds a spec from handle options. Unknown keys are ignored here.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Validation`] when the location, the size, or
    /// a placement attribute is invalid.
    pub fn from_options(options: &BTreeMap<String, String>) -> Result<Self, ProvisionError> {
        let location = VolumeLocation::from_options(options)?;
        let size_kib = size_in_kib(required(options, params::SIZE)?)?;
        let placement = PlacementAttributes::from_options(options)?;
        Ok(Self {
            location,
            size_kib,
            placement,
        })
    }

    fn manifest(&self) -> Manifest {
        Manifest {
            volume_id: self.location.volume_id.clone(),
            size_kib: self.size_kib,
            deltas_path: self.location.deltas_path.to_string(),
            attributes: self
                .placement
                .attributes()
                .into_iter()
                .map(|(name, value)| (name.to_owned(), value))
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
struct Manifest {
    volume_id: String,
    size_kib: u64,
    deltas_path: String,
    attributes: BTreeMap<String, String>,
}

/// Volume produced by [`VolumeStore::create_volume`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreatedVolume {
    /// Volume directory.
    pub path: Utf8PathBuf,
    /// Delta image.
    pub image: Utf8PathBuf,
    /// Size in KiB.
    pub size_kib: u64,
    /// `true` when this call found the ploop volume already in place.
    pub replayed: bool,
}

/// Outcome of a deletion.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeleteOutcome {
    /// The volume existed and was removed.
    Deleted,
    /// Nothing was there to remove.
    AlreadyAbsent,
}

/// Creates and deletes volumes through the ploop driver and attribute
/// setter capabilities.
#[derive(Clone, Debug)]
pub struct VolumeStore<D, A> {
    driver: D,
    attributes: A,
}

impl<D, A> VolumeStore<D, A>
where
    D: PloopDriver,
    A: AttributeSetter,
{
    /// Creates a store from its capabilities.
    #[must_use]
    pub const fn new(driver: D, attributes: A) -> Self {
        Self { driver, attributes }
    }

    /// Creates the volume and applies its placement attributes.
    ///
    /// The provisioning record is claimed exclusively before the driver
    /// runs, so a request that finds a matching record finishes whatever an
    /// earlier or concurrent call left undone instead of failing. Only what
    /// this call created is rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Conflict`] when a different volume already
    /// occupies the location, [`ProvisionError::Attribute`] when an attribute
    /// is rejected (after removing a volume this call created), and
    /// [`ProvisionError::Volume`] for driver or filesystem failures.
    #[instrument(skip_all, fields(volume_id = %spec.location.volume_id))]
    pub fn create_volume(
        &self,
        mount: &Utf8Path,
        spec: &VolumeSpec,
    ) -> Result<CreatedVolume, ProvisionError> {
        let location = &spec.location;
        let volume_id = location.volume_id.as_str();
        let dir = location.volume_dir(mount);
        let image = location.image_path(mount);
        let manifest_path = location.manifest_path(mount);

        let claimed = if fs::exists(&manifest_path)
            .map_err(|err| io_failure(volume_id, &manifest_path, &err))?
        {
            false
        } else {
            if fs::exists(&dir).map_err(|err| io_failure(volume_id, &dir, &err))? {
                return Err(ProvisionError::Conflict {
                    volume_id: volume_id.to_owned(),
                    message: format!("{dir} exists but was not created by this provisioner"),
                });
            }
            claim(mount, spec)?
        };
        if !claimed {
            check_manifest(mount, spec)?;
        }

        for parent in [image.parent(), dir.parent()].into_iter().flatten() {
            fs::create_dir_all(parent).map_err(|err| io_failure(volume_id, parent, &err))?;
        }

        let created = self.ensure_volume(mount, spec, claimed)?;
        for (attribute, value) in spec.placement.attributes() {
            debug!(attribute, value = %value, "applying attribute");
            if let Err(err) = self.attributes.set_attribute(&dir, attribute, &value) {
                let primary = ProvisionError::Attribute {
                    volume_id: volume_id.to_owned(),
                    attribute: attribute.to_owned(),
                    value,
                    message: err.to_string(),
                };
                if !created {
                    warn!(attribute, error = %err, "attribute rejected on existing volume");
                    return Err(primary);
                }
                warn!(attribute, error = %err, "attribute rejected; rolling back volume");
                return Err(primary.with_cleanup(discard(mount, location).err()));
            }
        }

        Ok(CreatedVolume {
            path: dir,
            image,
            size_kib: spec.size_kib,
            replayed: !created,
        })
    }

    /// Makes sure a ploop volume exists at the location. Returns `true` when
    /// this call created it.
    fn ensure_volume(
        &self,
        mount: &Utf8Path,
        spec: &VolumeSpec,
        claimed: bool,
    ) -> Result<bool, ProvisionError> {
        let location = &spec.location;
        let volume_id = location.volume_id.as_str();
        let dir = location.volume_dir(mount);
        let image = location.image_path(mount);
        let descriptor = dir.join(DESCRIPTOR_FILE);
        let has_descriptor =
            || fs::exists(&descriptor).map_err(|err| io_failure(volume_id, &descriptor, &err));

        if has_descriptor()? {
            info!(path = %dir, "identical volume already present");
            return Ok(false);
        }
        if !claimed {
            warn!(path = %dir, "resuming interrupted volume creation");
            for removed in [fs::remove_tree(&dir), fs::remove_file(&image)] {
                removed.map_err(|err| io_failure(volume_id, &dir, &err))?;
            }
        }

        info!(path = %dir, size_kib = spec.size_kib, "creating ploop volume");
        let Err(err) = self.driver.create(&dir, spec.size_kib, &image) else {
            return Ok(true);
        };
        if has_descriptor()? {
            warn!(path = %dir, error = %err, "volume was created concurrently");
            return Ok(false);
        }
        let primary = ProvisionError::volume(volume_id, format!("ploop create failed: {err}"));
        if claimed {
            return Err(primary.with_cleanup(discard(mount, location).err()));
        }
        Err(primary)
    }

    /// Deletes the volume at `location`. An absent volume is success.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Volume`] when the driver or the filesystem
    /// fails.
    #[instrument(skip_all, fields(volume_id = %location.volume_id))]
    pub fn delete_volume(
        &self,
        mount: &Utf8Path,
        location: &VolumeLocation,
    ) -> Result<DeleteOutcome, ProvisionError> {
        let volume_id = location.volume_id.as_str();
        let dir = location.volume_dir(mount);

        if !fs::exists(&dir).map_err(|err| io_failure(volume_id, &dir, &err))? {
            remove_leftovers(mount, location);
            info!(path = %dir, "volume already absent");
            return Ok(DeleteOutcome::AlreadyAbsent);
        }

        let descriptor = dir.join(DESCRIPTOR_FILE);
        if fs::exists(&descriptor).map_err(|err| io_failure(volume_id, &descriptor, &err))? {
            self.driver.delete(&dir).map_err(|err| {
                ProvisionError::volume(volume_id, format!("ploop delete failed: {err}"))
            })?;
        } else {
            warn!(path = %dir, "no ploop descriptor; removing directory as leftover");
        }

        fs::remove_tree(&dir).map_err(|err| io_failure(volume_id, &dir, &err))?;
        remove_leftovers(mount, location);
        info!(path = %dir, "volume deleted");
        Ok(DeleteOutcome::Deleted)
    }
}

fn check_manifest(mount: &Utf8Path, spec: &VolumeSpec) -> Result<(), ProvisionError> {
    let volume_id = spec.location.volume_id.as_str();
    let conflict = |message: String| ProvisionError::Conflict {
        volume_id: volume_id.to_owned(),
        message,
    };

    let manifest_path = spec.location.manifest_path(mount);
    let raw = fs::read_to_string(&manifest_path)
        .map_err(|err| conflict(format!("unreadable provisioning record: {err}")))?;
    let recorded: Manifest = serde_json::from_str(&raw)
        .map_err(|err| conflict(format!("unreadable provisioning record: {err}")))?;

    if recorded != spec.manifest() {
        return Err(conflict(format!(
            "existing volume has size {}KiB and attributes {:?}",
            recorded.size_kib, recorded.attributes
        )));
    }
    Ok(())
}

/// Writes the provisioning record unless one exists. Returns `true` when
/// this call wrote it.
fn claim(mount: &Utf8Path, spec: &VolumeSpec) -> Result<bool, ProvisionError> {
    let volume_id = spec.location.volume_id.as_str();
    let path = spec.location.manifest_path(mount);
    let rendered = serde_json::to_string_pretty(&spec.manifest()).map_err(|err| {
        ProvisionError::volume(volume_id, format!("failed to render provisioning record: {err}"))
    })?;
    fs::create_new(&path, rendered).map_err(|err| io_failure(volume_id, &path, &err))
}

fn discard(mount: &Utf8Path, location: &VolumeLocation) -> Result<(), ProvisionError> {
    let volume_id = location.volume_id.as_str();
    let dir = location.volume_dir(mount);
    fs::remove_tree(&dir).map_err(|err| io_failure(volume_id, &dir, &err))?;
    for path in [location.image_path(mount), location.manifest_path(mount)] {
        fs::remove_file(&path).map_err(|err| io_failure(volume_id, &path, &err))?;
    }
    Ok(())
}

fn remove_leftovers(mount: &Utf8Path, location: &VolumeLocation) {
    for path in [location.image_path(mount), location.manifest_path(mount)] {
        match fs::remove_file(&path) {
            Ok(true) => debug!(path = %path, "removed leftover file"),
            Ok(false) => {}
            Err(err) => warn!(path = %path, error = %err, "failed to remove leftover file"),
        }
    }
}

fn required<'a>(
    options: &'a BTreeMap<String, String>,
    key: &str,
) -> Result<&'a str, ProvisionError> {
    options
        .get(key)
        .map(|raw| raw.trim())
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| ProvisionError::validation(key, format!("{key} is required")))
}

/// Interprets `raw` as a path inside the cluster mount. Leading slashes are
/// dropped; parent components are refused.
fn relative_path(field: &str, raw: &str) -> Result<Utf8PathBuf, ProvisionError> {
    let mut relative = Utf8PathBuf::new();
    for component in Utf8Path::new(raw.trim()).components() {
        match component {
            Utf8Component::Normal(part) => relative.push(part),
            Utf8Component::RootDir | Utf8Component::CurDir => {}
            Utf8Component::ParentDir | Utf8Component::Prefix(_) => {
                return Err(ProvisionError::validation(
                    field,
                    format!("{raw:?} must stay inside the cluster mount"),
                ));
            }
        }
    }
    if relative.as_str().is_empty() {
        return Err(ProvisionError::validation(
            field,
            format!("{raw:?} does not name a directory"),
        ));
    }
    Ok(relative)
}

fn is_single_component(raw: &str) -> bool {
    matches!(
        Utf8Path::new(raw).components().collect::<Vec<_>>().as_slice(),
        [Utf8Component::Normal(_)]
    )
}

fn io_failure(volume_id: &str, path: &Utf8Path, err: &std::io::Error) -> ProvisionError {
    ProvisionError::volume(volume_id, format!("{path}: {err}"))
}
