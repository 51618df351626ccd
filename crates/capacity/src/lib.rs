use rackforge_core::Disk;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("size must not be negative")]
    Negative,
    #[error("size must be at least {minimum}")]
    BelowMinimum { minimum: u64 },
    #[error("not a valid number")]
    Malformed,
    #[error("volumes exceed disk capacity by {excess}")]
    OverCapacity { excess: u64 },
}

/// A disk plus transient validity marks. The marks are UI state, not
/// persisted state, so they are excluded from serialization and a
/// snapshot of an allocation compares on the disk contents alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskAllocation {
    pub disk: Disk,
    #[serde(skip)]
    volume_errors: BTreeMap<String, ValidationError>,
    #[serde(skip)]
    disk_error: Option<ValidationError>,
}

impl DiskAllocation {
    pub fn new(disk: Disk) -> Self {
        Self {
            disk,
            volume_errors: BTreeMap::new(),
            disk_error: None,
        }
    }

    /// Per-volume minimum check, the first phase of the two-phase
    /// validation. Accepts iff candidate >= max(0, minimum) and stores
    /// the value, clearing any prior mark for that volume. Rejection
    /// records a mark and keeps the previous size. Disk capacity is
    /// deliberately not checked here; see [`DiskAllocation::validate`].
    pub fn set_volume_size(&mut self, name: &str, candidate: i64, minimum: u64) -> bool {
        if self.disk.volume(name).is_none() {
            debug_assert!(false, "unknown volume {name}");
            return false;
        }
        if candidate < 0 {
            self.volume_errors
                .insert(name.to_string(), ValidationError::Negative);
            return false;
        }
        let candidate = candidate as u64;
        if candidate < minimum {
            self.volume_errors
                .insert(name.to_string(), ValidationError::BelowMinimum { minimum });
            return false;
        }
        if let Some(volume) = self.disk.volumes.iter_mut().find(|v| v.name == name) {
            volume.size = candidate;
        }
        self.volume_errors.remove(name);
        true
    }

    /// Text-input path: parses comma-grouped numeric text before
    /// delegating to [`DiskAllocation::set_volume_size`]. Unparseable
    /// input marks the volume malformed; it is never treated as zero.
    pub fn apply_size_text(&mut self, name: &str, text: &str, minimum: u64) -> bool {
        if self.disk.volume(name).is_none() {
            debug_assert!(false, "unknown volume {name}");
            return false;
        }
        match parse_grouped_int(text) {
            Some(candidate) => self.set_volume_size(name, candidate, minimum),
            None => {
                self.volume_errors
                    .insert(name.to_string(), ValidationError::Malformed);
                false
            }
        }
    }

    /// Whole-disk capacity check, the second phase. Marks or clears the
    /// disk-level error only; per-volume marks from prior edits stand
    /// until those volumes are edited again.
    pub fn validate(&mut self) {
        let total: u64 = self.disk.volumes.iter().map(|v| v.size).sum();
        if total > self.disk.size {
            self.disk_error = Some(ValidationError::OverCapacity {
                excess: total - self.disk.size,
            });
        } else {
            self.disk_error = None;
        }
    }

    /// Disk size minus the sizes of all volumes not named in `skip`.
    /// Negative while over-allocated; callers clamp before applying.
    pub fn unallocated_space(&self, skip: &[&str]) -> i64 {
        let allocated: u64 = self
            .disk
            .volumes
            .iter()
            .filter(|v| !skip.contains(&v.name.as_str()))
            .map(|v| v.size)
            .sum();
        self.disk.size as i64 - allocated as i64
    }

    /// "Use all remaining space": grows the named volume to consume the
    /// unallocated remainder, clamped to [minimum, ∞).
    pub fn grow_volume_to_fill(&mut self, name: &str, minimum: u64) -> bool {
        if self.disk.volume(name).is_none() {
            debug_assert!(false, "unknown volume {name}");
            return false;
        }
        let free = self.unallocated_space(&[name]);
        let target = free.max(0).max(minimum as i64);
        let accepted = self.set_volume_size(name, target, minimum);
        self.validate();
        accepted
    }

    pub fn volume_error(&self, name: &str) -> Option<&ValidationError> {
        self.volume_errors.get(name)
    }

    pub fn disk_error(&self) -> Option<&ValidationError> {
        self.disk_error.as_ref()
    }

    pub fn has_errors(&self) -> bool {
        self.disk_error.is_some() || !self.volume_errors.is_empty()
    }
}

pub fn has_validation_errors(disks: &[DiskAllocation]) -> bool {
    disks.iter().any(DiskAllocation::has_errors)
}

/// Parses comma-grouped numeric text ("1,024") into a signed integer.
/// Groups after the first must be exactly three digits. Whitespace at
/// the ends is tolerated; anything else is None.
pub fn parse_grouped_int(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    if digits.is_empty() {
        return None;
    }
    let mut groups = digits.split(',');
    let first = groups.next()?;
    if first.is_empty() || (digits.contains(',') && first.len() > 3) {
        return None;
    }
    if !first.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    for group in groups {
        if group.len() != 3 || !group.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
    }
    let joined: String = digits.chars().filter(|c| *c != ',').collect();
    let value: i64 = joined.parse().ok()?;
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rackforge_core::Volume;

    fn disk(size: u64, volumes: &[(&str, u64)]) -> DiskAllocation {
        DiskAllocation::new(Disk {
            id: "sda".to_string(),
            size,
            volumes: volumes
                .iter()
                .map(|(name, size)| Volume {
                    name: name.to_string(),
                    size: *size,
                })
                .collect(),
        })
    }

    #[test]
    fn empty_disk_is_valid_and_fully_unallocated() {
        let mut alloc = disk(512, &[]);
        alloc.validate();
        assert!(!alloc.has_errors());
        assert_eq!(alloc.unallocated_space(&[]), 512);
    }

    #[test]
    fn boundary_minimum_is_accepted() {
        let mut alloc = disk(100, &[("swap", 10)]);
        assert!(alloc.set_volume_size("swap", 5, 5));
        assert_eq!(alloc.disk.volume("swap").unwrap().size, 5);
        assert!(alloc.volume_error("swap").is_none());
    }

    #[test]
    fn below_minimum_and_negative_are_rejected() {
        let mut alloc = disk(100, &[("swap", 10)]);
        assert!(!alloc.set_volume_size("swap", 4, 5));
        assert_eq!(
            alloc.volume_error("swap"),
            Some(&ValidationError::BelowMinimum { minimum: 5 })
        );
        // rejected edit keeps the previous size
        assert_eq!(alloc.disk.volume("swap").unwrap().size, 10);

        assert!(!alloc.set_volume_size("swap", -1, 0));
        assert_eq!(alloc.volume_error("swap"), Some(&ValidationError::Negative));
    }

    #[test]
    fn accepted_edit_clears_prior_mark() {
        let mut alloc = disk(100, &[("swap", 10)]);
        alloc.set_volume_size("swap", 2, 5);
        assert!(alloc.has_errors());
        alloc.set_volume_size("swap", 8, 5);
        assert!(!alloc.has_errors());
    }

    #[test]
    fn capacity_check_is_independent_of_volume_order() {
        for volumes in [
            &[("os", 20), ("swap", 95)][..],
            &[("swap", 95), ("os", 20)][..],
        ] {
            let mut alloc = disk(100, volumes);
            alloc.validate();
            assert_eq!(
                alloc.disk_error(),
                Some(&ValidationError::OverCapacity { excess: 15 })
            );
        }
    }

    #[test]
    fn capacity_fix_leaves_stale_volume_marks() {
        let mut alloc = disk(100, &[("os", 20), ("swap", 10)]);
        alloc.set_volume_size("os", 3, 5); // stale mark on os
        alloc.set_volume_size("swap", 95, 5);
        alloc.validate();
        assert!(alloc.disk_error().is_some());
        alloc.set_volume_size("swap", 40, 5);
        alloc.validate();
        assert!(alloc.disk_error().is_none());
        // capacity-only fix does not clear the earlier os mark
        assert!(alloc.volume_error("os").is_some());
    }

    #[test]
    fn overallocate_then_fix_scenario() {
        let mut alloc = disk(100, &[("system", 20), ("swap", 10)]);
        assert_eq!(alloc.unallocated_space(&[]), 70);

        assert!(alloc.set_volume_size("swap", 95, 5));
        alloc.validate();
        assert_eq!(
            alloc.disk_error(),
            Some(&ValidationError::OverCapacity { excess: 15 })
        );

        assert!(alloc.set_volume_size("swap", 75, 5));
        alloc.validate();
        assert!(alloc.disk_error().is_none());
        assert_eq!(alloc.unallocated_space(&[]), 5);
    }

    #[test]
    fn grow_to_fill_consumes_remainder() {
        let mut alloc = disk(100, &[("os", 20), ("vm", 10)]);
        assert!(alloc.grow_volume_to_fill("vm", 5));
        assert_eq!(alloc.disk.volume("vm").unwrap().size, 80);
        assert_eq!(alloc.unallocated_space(&[]), 0);
        assert!(!alloc.has_errors());
    }

    #[test]
    fn grow_to_fill_clamps_at_minimum_when_overallocated() {
        let mut alloc = disk(100, &[("os", 120), ("vm", 10)]);
        assert!(alloc.grow_volume_to_fill("vm", 5));
        // remainder is negative, so the volume lands on its minimum
        assert_eq!(alloc.disk.volume("vm").unwrap().size, 5);
        assert!(alloc.disk_error().is_some());
    }

    #[test]
    fn malformed_text_marks_not_zeroes() {
        let mut alloc = disk(100, &[("swap", 10)]);
        assert!(!alloc.apply_size_text("swap", "12abc", 5));
        assert_eq!(alloc.volume_error("swap"), Some(&ValidationError::Malformed));
        assert_eq!(alloc.disk.volume("swap").unwrap().size, 10);
    }

    #[test]
    fn grouped_text_parses() {
        let mut alloc = disk(5000, &[("vm", 10)]);
        assert!(alloc.apply_size_text("vm", "1,024", 5));
        assert_eq!(alloc.disk.volume("vm").unwrap().size, 1024);
    }

    #[test]
    fn parse_grouped_int_cases() {
        assert_eq!(parse_grouped_int("0"), Some(0));
        assert_eq!(parse_grouped_int(" 42 "), Some(42));
        assert_eq!(parse_grouped_int("1,024"), Some(1024));
        assert_eq!(parse_grouped_int("12,345,678"), Some(12_345_678));
        assert_eq!(parse_grouped_int("-7"), Some(-7));
        assert_eq!(parse_grouped_int(""), None);
        assert_eq!(parse_grouped_int("1,02"), None);
        assert_eq!(parse_grouped_int("1,0245"), None);
        assert_eq!(parse_grouped_int(",100"), None);
        assert_eq!(parse_grouped_int("12abc"), None);
    }

    #[test]
    fn marks_are_excluded_from_serialization() {
        let mut alloc = disk(100, &[("swap", 10)]);
        let clean = serde_json::to_value(&alloc).unwrap();
        alloc.set_volume_size("swap", 2, 5);
        let marked = serde_json::to_value(&alloc).unwrap();
        assert_eq!(clean, marked);
    }

    #[test]
    fn collection_error_scan() {
        let mut a = disk(100, &[("os", 20)]);
        let b = disk(100, &[("os", 20)]);
        a.validate();
        assert!(!has_validation_errors(&[a.clone(), b.clone()]));
        a.set_volume_size("os", 1, 5);
        assert!(has_validation_errors(&[a, b]));
    }
}
