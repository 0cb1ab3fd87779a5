//! Filesystem-backed profile storage.
//!
//! Layout: `<root>/<id>/profile.json` plus `<root>/<id>/photo.<ext>`.
//! Uploads are written to the staging directory first and only moved into a
//! profile directory once it exists. `profile.json` is always written last
//! and replaced atomically, so readers never see a record whose photo has
//! not landed yet.

use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

use crate::model::profile::{PhotoUpload, Profile, ProfileFields, ProfileSummary};

pub const METADATA_FILE: &str = "profile.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("profile not found")]
    NotFound,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupted metadata: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ProfileStore {
    root: PathBuf,
    staging: PathBuf,
    #[cfg(test)]
    fail_commits: bool,
}

impl ProfileStore {
    pub fn new(root: impl Into<PathBuf>, staging: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            staging: staging.into(),
            #[cfg(test)]
            fail_commits: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging(&self) -> &Path {
        &self.staging
    }

    /// Creates the profiles and staging directories if they are missing.
    pub async fn init(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).await?;
        fs::create_dir_all(&self.staging).await?;
        Ok(())
    }

    /// Removes staged uploads older than `max_age`, left behind by an
    /// interrupted create or update. Returns how many files were removed.
    pub async fn sweep_staging(&self, max_age: Duration) -> Result<usize, StorageError> {
        let mut entries = match fs::read_dir(&self.staging).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            let age = meta
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }

            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Could not remove stale upload {:?}: {}", entry.path(), e),
            }
        }
        Ok(removed)
    }

    pub async fn create(
        &self,
        fields: ProfileFields,
        photo: &PhotoUpload,
    ) -> Result<Profile, StorageError> {
        let id = Uuid::new_v4();
        let staged = self.stage(photo).await?;

        let dir = self.profile_dir(&id);
        if let Err(e) = fs::create_dir_all(&dir).await {
            discard(&staged).await;
            return Err(e.into());
        }

        let photo_name = photo.stored_name();
        let result = async {
            move_file(&staged, &dir.join(&photo_name)).await?;
            let profile = Profile::new(id, fields, photo_name, Utc::now());
            self.commit(&dir, &profile).await?;
            Ok::<_, StorageError>(profile)
        }
        .await;

        if result.is_err() {
            discard(&staged).await;
            if let Err(e) = fs::remove_dir_all(&dir).await {
                tracing::warn!("Could not clean up partial profile {}: {}", id, e);
            }
        }
        result
    }

    /// Scans every profile directory. Entries without a readable record or
    /// whose photo is missing are skipped, not reported.
    pub async fn list(&self) -> Result<Vec<ProfileSummary>, StorageError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut profiles = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }

            let dir = entry.path();
            let profile = match read_metadata(&dir).await {
                Ok(profile) => profile,
                Err(StorageError::NotFound) => {
                    tracing::debug!("Skipping {:?}: no metadata", dir);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Skipping {:?}: {}", dir, e);
                    continue;
                }
            };

            if !fs::try_exists(dir.join(&profile.photo)).await.unwrap_or(false) {
                tracing::debug!("Skipping {}: photo {} missing", profile.id, profile.photo);
                continue;
            }
            profiles.push(profile);
        }

        profiles.sort_by(|a, b| compare_dates(&b.date, &a.date));
        Ok(profiles.iter().map(Profile::summary).collect())
    }

    pub async fn get(&self, id: &str) -> Result<Profile, StorageError> {
        let id = parse_id(id)?;
        read_metadata(&self.profile_dir(&id)).await
    }

    /// Rewrites every text field and optionally swaps the photo. The new
    /// photo is moved in before the record is committed; the old one is
    /// removed only after the record points away from it. If the commit
    /// fails, a newly named photo is taken out again so the directory keeps
    /// only the file the record names.
    pub async fn update(
        &self,
        id: &str,
        fields: ProfileFields,
        photo: Option<&PhotoUpload>,
    ) -> Result<Profile, StorageError> {
        let id = parse_id(id)?;
        let dir = self.profile_dir(&id);
        let mut profile = read_metadata(&dir).await?;

        profile.apply(fields);

        let mut stale_photo = None;
        if let Some(photo) = photo {
            let staged = self.stage(photo).await?;
            let new_name = photo.stored_name();
            if let Err(e) = move_file(&staged, &dir.join(&new_name)).await {
                discard(&staged).await;
                return Err(vanished_as_not_found(&dir, e.into()).await);
            }
            if new_name != profile.photo {
                stale_photo = Some(std::mem::replace(&mut profile.photo, new_name));
            }
        }

        profile.updated_at = next_timestamp(profile.updated_at);
        if let Err(e) = self.commit(&dir, &profile).await {
            if stale_photo.is_some() {
                discard(&dir.join(&profile.photo)).await;
            }
            return Err(vanished_as_not_found(&dir, e).await);
        }

        if let Some(old) = stale_photo {
            match fs::remove_file(dir.join(&old)).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Could not remove old photo {} of {}: {}", old, id, e),
            }
        }
        Ok(profile)
    }

    pub async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let id = parse_id(id)?;
        match fs::remove_dir_all(self.profile_dir(&id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    fn profile_dir(&self, id: &Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    async fn commit(&self, dir: &Path, profile: &Profile) -> Result<(), StorageError> {
        #[cfg(test)]
        {
            if self.fail_commits {
                return Err(io::Error::new(io::ErrorKind::Other, "metadata write refused").into());
            }
        }
        write_metadata(dir, profile).await
    }

    async fn stage(&self, photo: &PhotoUpload) -> Result<PathBuf, StorageError> {
        fs::create_dir_all(&self.staging).await?;
        let path = self.staging.join(format!("{}.upload", Uuid::new_v4()));
        if let Err(e) = fs::write(&path, &photo.bytes).await {
            discard(&path).await;
            return Err(e.into());
        }
        Ok(path)
    }
}

// A profile deleted mid-update reads as missing, not as an I/O failure
async fn vanished_as_not_found(dir: &Path, err: StorageError) -> StorageError {
    match err {
        StorageError::Io(ref e) if e.kind() == io::ErrorKind::NotFound => {
            if fs::try_exists(dir).await.unwrap_or(true) {
                err
            } else {
                StorageError::NotFound
            }
        }
        other => other,
    }
}

// Ids that are not UUIDs can't name a profile, and must never reach a path
fn parse_id(id: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(id).map_err(|_| StorageError::NotFound)
}

async fn read_metadata(dir: &Path) -> Result<Profile, StorageError> {
    let raw = match fs::read(dir.join(METADATA_FILE)).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StorageError::NotFound),
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&raw)?)
}

async fn write_metadata(dir: &Path, profile: &Profile) -> Result<(), StorageError> {
    let body = serde_json::to_vec_pretty(profile)?;
    let tmp = dir.join(format!(".{}.{}.tmp", METADATA_FILE, Uuid::new_v4()));
    fs::write(&tmp, body).await?;
    if let Err(e) = fs::rename(&tmp, dir.join(METADATA_FILE)).await {
        discard(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

// rename, falling back to copy + remove when staging sits on another filesystem
async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    fs::copy(from, to).await?;
    fs::remove_file(from).await
}

async fn discard(path: &Path) {
    let _ = fs::remove_file(path).await;
}

fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::milliseconds(1)
    }
}

// Local date-times as sent by date/datetime-local inputs and hand-written JSON
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
];

fn date_key(date: &str) -> Option<NaiveDateTime> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(date, fmt).ok())
        })
        .or_else(|| DateTime::parse_from_rfc3339(date).ok().map(|dt| dt.naive_utc()))
}

/// Chronological where both dates parse; unparseable dates order below
/// parseable ones and fall back to plain string comparison.
pub fn compare_dates(a: &str, b: &str) -> Ordering {
    match (date_key(a), date_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}
