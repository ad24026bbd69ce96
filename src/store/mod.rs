//! The IP data store.
//!
//! [`IpStore`] owns the primary map, the write-ahead overlay, and the
//! snapshot phase that routes writes between them. Store operations are
//! synchronous and hold no lock across socket I/O; snapshot file I/O runs on
//! the caller's (blocking) thread.
//!
//! Write routing by phase:
//! - `Idle`: straight to the primary.
//! - `Writing`: the touched IP is copied into the overlay (unless already
//!   shadowed) and updated there, so the encoder sees a frozen primary.
//! - `Draining`: the overlay is tried first; IPs it does not hold are
//!   updated in the primary while the drain moves the rest back.

pub mod backup;
pub mod codec;
pub mod record;
mod wal;

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::info;

use crate::error::StoreError;
use codec::{SnapshotDecoder, SnapshotEncoder};
use record::{FlagModifier, ImpactRecord, ImpactTriple};
use wal::{lock_record, RecordHandle, RecordMap, SnapshotPhase};

/// Snapshot file name inside the data directory.
pub const KDB_FILE: &str = "kawana.kdb";

/// Suffix of the temporary file the encoder writes before the atomic rename.
const PART_SUFFIX: &str = ".part";

/// The process-wide IP reputation store.
pub struct IpStore {
    primary: RecordMap,
    overlay: RecordMap,
    phase: RwLock<SnapshotPhase>,
    data_dir: PathBuf,
}

impl IpStore {
    /// Opens the store rooted at `data_dir`, creating the directory if
    /// needed and seeding the primary map from an existing snapshot file.
    ///
    /// A missing snapshot yields an empty store; a snapshot that exists but
    /// fails to decode is an error the caller must treat as fatal.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;

        let path = data_dir.join(KDB_FILE);
        let primary = match File::open(&path) {
            Ok(file) => {
                info!(path = %path.display(), "loading snapshot");
                let records = SnapshotDecoder::new(BufReader::new(file)).decode()?;
                info!(records = records.len(), "snapshot loaded");
                RecordMap::from_records(records)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => RecordMap::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            primary,
            overlay: RecordMap::default(),
            phase: RwLock::new(SnapshotPhase::Idle),
            data_dir,
        })
    }

    /// Adds `amount` to the IP's time windows and applies the flag
    /// modifier, creating the record on first touch. Returns the record
    /// state after the update.
    pub fn log_ip(&self, ip: u32, amount: u32, modifier: FlagModifier, now: u32) -> ImpactRecord {
        let phase = self.phase.read().unwrap_or_else(PoisonError::into_inner);

        match *phase {
            SnapshotPhase::Idle => update_or_insert(&self.primary, ip, amount, modifier, now),
            SnapshotPhase::Writing => {
                self.shadow_into_overlay(ip);
                update_or_insert(&self.overlay, ip, amount, modifier, now)
            }
            SnapshotPhase::Draining => {
                match update_existing(&self.overlay, ip, amount, modifier, now) {
                    Some(record) => record,
                    None => update_or_insert(&self.primary, ip, amount, modifier, now),
                }
            }
        }
    }

    /// Subtracts the given amounts from the IP's window maximums. An IP
    /// present in neither map is left uncreated and a zero record is
    /// returned.
    pub fn forgive_ip(&self, ip: u32, amounts: ImpactTriple) -> ImpactRecord {
        let phase = self.phase.read().unwrap_or_else(PoisonError::into_inner);

        match *phase {
            SnapshotPhase::Idle => forgive_existing(&self.primary, ip, amounts),
            SnapshotPhase::Writing => {
                self.shadow_into_overlay(ip);
                forgive_existing(&self.overlay, ip, amounts)
            }
            SnapshotPhase::Draining => match forgive_in(&self.overlay, ip, amounts) {
                Some(record) => record,
                None => forgive_existing(&self.primary, ip, amounts),
            },
        }
    }

    /// Serializes the primary map to `<data_dir>/kawana.kdb`.
    ///
    /// The overlay absorbs writes while the encoder runs; afterwards it is
    /// drained back into the primary. The phase always returns to `Idle`,
    /// even when the file write fails, so the store is never stuck.
    pub fn persist(&self) -> Result<(), StoreError> {
        self.set_phase(SnapshotPhase::Writing);
        let result = self.write_snapshot();
        self.set_phase(SnapshotPhase::Draining);
        self.drain_overlay();
        self.set_phase(SnapshotPhase::Idle);
        result
    }

    /// Number of tracked IPs across both maps.
    pub fn tracked_ips(&self) -> usize {
        self.primary.len() + self.overlay.len()
    }

    /// Path of the snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(KDB_FILE)
    }

    /// Copies the IP's record from the primary into the overlay so later
    /// updates land on the copy. Skipped when the overlay already shadows
    /// the IP: overwriting would clobber updates newer than the primary's
    /// stale value.
    fn shadow_into_overlay(&self, ip: u32) {
        // Lock order: overlay before primary, matching the drain.
        let mut overlay = self.overlay.write();
        if overlay.contains_key(&ip) {
            return;
        }

        let primary = self.primary.read();
        if let Some(handle) = primary.get(&ip) {
            let copy = *lock_record(handle);
            overlay.insert(ip, Arc::new(Mutex::new(copy)));
        }
    }

    /// Moves every overlay entry into the primary, one IP at a time. The
    /// handle itself is transferred, so the overlay's record replaces the
    /// primary's for that IP.
    fn drain_overlay(&self) {
        for ip in self.overlay.keys() {
            let mut overlay = self.overlay.write();
            let mut primary = self.primary.write();
            if let Some(handle) = overlay.remove(&ip) {
                primary.insert(ip, handle);
            }
        }
    }

    fn set_phase(&self, phase: SnapshotPhase) {
        // Exclusive acquisition waits for in-flight writes holding the
        // shared lock, so no operation straddles a regime change.
        *self.phase.write().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    fn write_snapshot(&self) -> Result<(), StoreError> {
        let final_path = self.snapshot_path();
        let mut part_path = final_path.clone().into_os_string();
        part_path.push(PART_SUFFIX);
        let part_path = PathBuf::from(part_path);

        let file = File::create(&part_path)?;
        let mut writer = BufWriter::new(file);

        let mut encoder = SnapshotEncoder::new(&mut writer);
        encoder.write_header()?;
        {
            let primary = self.primary.read();
            for (&ip, handle) in primary.iter() {
                let record = *lock_record(handle);
                encoder.write_record(ip, &record)?;
            }
        }

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        fs::rename(&part_path, &final_path)?;
        Ok(())
    }

    #[cfg(test)]
    fn overlay_len(&self) -> usize {
        self.overlay.len()
    }

    #[cfg(test)]
    fn force_phase(&self, phase: SnapshotPhase) {
        self.set_phase(phase);
    }

    #[cfg(test)]
    fn force_drain(&self) {
        self.drain_overlay();
    }
}

/// Updates the IP's record in place if the map holds it. Returns `None`
/// otherwise.
fn update_existing(
    map: &RecordMap,
    ip: u32,
    amount: u32,
    modifier: FlagModifier,
    now: u32,
) -> Option<ImpactRecord> {
    let handle = map.get(ip)?;
    Some(apply_impact(&handle, amount, modifier, now))
}

/// Updates the IP's record, inserting a fresh one first when absent.
fn update_or_insert(
    map: &RecordMap,
    ip: u32,
    amount: u32,
    modifier: FlagModifier,
    now: u32,
) -> ImpactRecord {
    let handle = map.get_or_insert(ip);
    apply_impact(&handle, amount, modifier, now)
}

fn apply_impact(handle: &RecordHandle, amount: u32, modifier: FlagModifier, now: u32) -> ImpactRecord {
    let mut record = lock_record(handle);
    record.impact(amount, modifier, now);
    *record
}

/// Forgives the IP in this map if present. Returns `None` otherwise.
fn forgive_in(map: &RecordMap, ip: u32, amounts: ImpactTriple) -> Option<ImpactRecord> {
    let handle = map.get(ip)?;
    let mut record = lock_record(&handle);
    record.forgive(amounts);
    Some(*record)
}

/// Forgives the IP in this map, returning a zero record without creating
/// anything when absent.
fn forgive_existing(map: &RecordMap, ip: u32, amounts: ImpactTriple) -> ImpactRecord {
    forgive_in(map, ip, amounts).unwrap_or_default()
}
