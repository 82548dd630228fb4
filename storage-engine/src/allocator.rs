// SPDX-License-Identifier: GPL-3.0-only

//! Extent bookkeeping for volume groups.
//!
//! The pool tracks free extents per physical volume. Logical volumes record
//! which PVs their extents came from in a pe map, so freeing and
//! redistributing can walk back to the right counters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::PeError;

/// Metadata area reserved at the start of every physical volume.
pub const PV_METADATA_K: u64 = 500;

/// PV device → extents taken from it.
pub type PeMap = BTreeMap<String, u64>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalVolume {
    pub device: String,
    pub pe_count: u64,
    pub pe_free: u64,
}

impl PhysicalVolume {
    pub fn new(device: impl Into<String>, pe_count: u64) -> Self {
        Self {
            device: device.into(),
            pe_count,
            pe_free: pe_count,
        }
    }

    pub fn used(&self) -> u64 {
        self.pe_count - self.pe_free
    }
}

/// Extent layout of one logical volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvExtents {
    pub le: u64,
    pub stripes: u32,
    pub pe_map: PeMap,
}

/// A volume that holds extents of a pool.
pub trait ExtentUser {
    fn created(&self) -> bool;
    fn deleted(&self) -> bool;
    fn size_k(&self) -> u64;
    fn orig_size_k(&self) -> u64;
    fn set_size_k(&mut self, size_k: u64);
    fn extents(&self) -> Option<&LvExtents>;
    fn extents_mut(&mut self) -> Option<&mut LvExtents>;
}

/// Extents a PV of `size_k` contributes.
pub fn pv_extents(size_k: u64, pe_size_k: u64) -> u64 {
    if pe_size_k == 0 {
        return 0;
    }
    size_k.saturating_sub(PV_METADATA_K) / pe_size_k
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentPool {
    pub pe_size_k: u64,
    pub pe_count: u64,
    pub pe_free: u64,
    pub pvs: Vec<PhysicalVolume>,
    pub pvs_add: Vec<PhysicalVolume>,
    pub pvs_remove: Vec<PhysicalVolume>,
}

impl ExtentPool {
    pub fn new(pe_size_k: u64) -> Self {
        Self {
            pe_size_k,
            ..Self::default()
        }
    }

    pub fn size_to_le(&self, size_k: u64) -> u64 {
        if self.pe_size_k == 0 {
            return 0;
        }
        size_k.div_ceil(self.pe_size_k)
    }

    pub fn size_k(&self) -> u64 {
        self.pe_count * self.pe_size_k
    }

    pub fn free_k(&self) -> u64 {
        self.pe_free * self.pe_size_k
    }

    /// Current and pending-add PVs, in allocation order.
    pub fn members(&self) -> impl Iterator<Item = &PhysicalVolume> {
        self.pvs.iter().chain(self.pvs_add.iter())
    }

    fn members_mut(&mut self) -> impl Iterator<Item = &mut PhysicalVolume> {
        self.pvs.iter_mut().chain(self.pvs_add.iter_mut())
    }

    pub fn find_pv(&self, device: &str) -> Option<&PhysicalVolume> {
        self.members().find(|pv| pv.device == device)
    }

    fn find_pv_mut(&mut self, device: &str) -> Option<&mut PhysicalVolume> {
        self.members_mut().find(|pv| pv.device == device)
    }

    pub fn contains(&self, device: &str) -> bool {
        self.find_pv(device).is_some()
    }

    /// Change the extent size and rescale every counter. Only meaningful
    /// before the group exists on disk.
    pub fn set_pe_size(&mut self, pe_size_k: u64) -> Result<(), PeError> {
        if pe_size_k == 0 || !pe_size_k.is_power_of_two() {
            return Err(PeError::PeSizeInvalid(pe_size_k));
        }
        let old = self.pe_size_k;
        if old == pe_size_k {
            return Ok(());
        }
        self.pe_size_k = pe_size_k;
        if old == 0 {
            return Ok(());
        }
        let rescale = |count: u64| count * old / pe_size_k;
        self.pe_count = rescale(self.pe_count);
        self.pe_free = rescale(self.pe_free);
        for pv in self
            .pvs
            .iter_mut()
            .chain(self.pvs_add.iter_mut())
            .chain(self.pvs_remove.iter_mut())
        {
            pv.pe_count = rescale(pv.pe_count);
            pv.pe_free = rescale(pv.pe_free);
        }
        Ok(())
    }

    /// Take `le` extents for a volume with `stripes` stripes and record them
    /// in `pe_map`. Nothing changes on failure.
    pub fn add_distribution(
        &mut self,
        le: u64,
        stripes: u32,
        pe_map: &mut PeMap,
    ) -> Result<(), PeError> {
        if stripes <= 1 {
            let available: u64 = self.members().map(|pv| pv.pe_free).sum();
            if available < le {
                return Err(PeError::NoSpaceSingle);
            }
            let mut rest = le;
            for pv in self.members_mut() {
                if rest == 0 {
                    break;
                }
                let take = rest.min(pv.pe_free);
                if take > 0 {
                    pv.pe_free -= take;
                    rest -= take;
                    *pe_map.entry(pv.device.clone()).or_default() += take;
                }
            }
            return Ok(());
        }

        let stripes = stripes as usize;
        let by_free_desc = |a: &(String, u64), b: &(String, u64)| b.1.cmp(&a.1);
        let mut candidates: Vec<(String, u64)> = self
            .members()
            .filter(|pv| pv.pe_free > 0)
            .map(|pv| (pv.device.clone(), pv.pe_free))
            .collect();
        candidates.sort_by(by_free_desc);

        let mut need = le.div_ceil(stripes as u64);
        let mut taken = PeMap::new();
        while need > 0 && candidates.len() >= stripes {
            let smallest = candidates[..stripes].iter().map(|c| c.1).min().unwrap_or(0);
            let amount = need.min(smallest);
            for (device, free) in candidates[..stripes].iter_mut() {
                *free -= amount;
                *taken.entry(device.clone()).or_default() += amount;
            }
            need -= amount;
            candidates.retain(|c| c.1 > 0);
            candidates.sort_by(by_free_desc);
        }
        if need > 0 {
            tracing::debug!("striped allocation of {le} extents over {stripes} PVs does not fit");
            return Err(PeError::NoSpaceStriped);
        }

        for (device, amount) in taken {
            if let Some(pv) = self.find_pv_mut(&device) {
                pv.pe_free -= amount;
            }
            *pe_map.entry(device).or_default() += amount;
        }
        Ok(())
    }

    /// Give `le` extents recorded in `pe_map` back to their PVs. Restores
    /// made before an unknown PV is hit stay applied.
    pub fn remove_distribution(&mut self, le: u64, pe_map: &mut PeMap) -> Result<(), PeError> {
        let mut rest = le;
        let mut result = Ok(());
        for (device, count) in pe_map.iter_mut() {
            if rest == 0 {
                break;
            }
            let Some(pv) = self.find_pv_mut(device) else {
                result = Err(PeError::PeDevNotFound(device.clone()));
                break;
            };
            let give = rest.min(*count);
            pv.pe_free += give;
            *count -= give;
            rest -= give;
        }
        pe_map.retain(|_, count| *count > 0);
        result
    }

    /// Drop `device` from the pool, moving extents of not-yet-created
    /// volumes to the remaining PVs. Returns the extents the pool lost.
    pub fn try_unuse_pe<U: ExtentUser>(
        &mut self,
        device: &str,
        users: &mut [U],
    ) -> Result<u64, PeError> {
        let pending_add = self.pvs_add.iter().any(|pv| pv.device == device);
        let pv = self
            .find_pv(device)
            .cloned()
            .ok_or_else(|| PeError::PvNotFound(device.to_string()))?;

        let on_pv = |user: &U| {
            !user.deleted()
                && user
                    .extents()
                    .and_then(|e| e.pe_map.get(device))
                    .is_some_and(|n| *n > 0)
        };

        if pv.used() > 0 {
            if users.iter().any(|u| !u.created() && on_pv(u)) {
                return Err(PeError::RemovePvInUse(device.to_string()));
            }
            let mut pool = self.clone();
            let mut moved: Vec<(usize, LvExtents)> = users
                .iter()
                .enumerate()
                .filter(|(_, u)| on_pv(*u))
                .filter_map(|(i, u)| u.extents().cloned().map(|e| (i, e)))
                .collect();
            for (_, extents) in moved.iter_mut() {
                pool.remove_distribution(extents.le, &mut extents.pe_map)?;
            }
            pool.forget(device);
            for (_, extents) in moved.iter_mut() {
                pool.add_distribution(extents.le, extents.stripes, &mut extents.pe_map)
                    .map_err(|_| PeError::RemovePvSizeNeeded(device.to_string()))?;
            }
            *self = pool;
            for (index, extents) in moved {
                if let Some(target) = users[index].extents_mut() {
                    *target = extents;
                }
            }
        } else {
            self.forget(device);
        }

        if !pending_add {
            self.pvs_remove.push(pv.clone());
        }
        self.pe_count -= pv.pe_count;
        self.pe_free = self.pe_free.saturating_sub(pv.pe_count);
        Ok(pv.pe_count)
    }

    fn forget(&mut self, device: &str) {
        self.pvs.retain(|pv| pv.device != device);
        self.pvs_add.retain(|pv| pv.device != device);
    }

    /// Shrink pending creates and extends that overshoot the pool by a
    /// small margin. Returns true when anything was cut.
    pub fn check_create_constraints<U: ExtentUser>(&mut self, users: &mut [U]) -> bool {
        let mut increase = 0;
        let mut current = 0;
        let mut requests: Vec<(u64, usize)> = Vec::new();
        for (index, user) in users.iter().enumerate() {
            if user.deleted() || user.size_k() < user.orig_size_k() {
                continue;
            }
            if user.created() || user.size_k() > user.orig_size_k() {
                let wanted = if user.created() {
                    self.size_to_le(user.size_k())
                } else {
                    self.size_to_le(user.size_k() - user.orig_size_k())
                };
                if !user.created() {
                    current += self.size_to_le(user.orig_size_k());
                }
                requests.push((wanted, index));
                increase += wanted;
            } else {
                current += self.size_to_le(user.size_k());
            }
        }

        if increase + current <= self.pe_count {
            return false;
        }
        let mut diff = increase + current - self.pe_count;
        if diff > 5 && diff > self.pvs.len() as u64 * 2 {
            tracing::warn!("overcommit of {diff} extents is too large to recover");
            return false;
        }

        requests.sort();
        let mut cut_any = false;
        for (wanted, index) in requests {
            if increase == 0 {
                break;
            }
            let cut = (diff * wanted + wanted / 2) / increase;
            diff -= cut;
            increase -= wanted;
            if cut == 0 {
                continue;
            }
            let pe_size_k = self.pe_size_k;
            let user = &mut users[index];
            let Some(extents) = user.extents_mut() else {
                continue;
            };
            if let Err(error) = self.remove_distribution(cut, &mut extents.pe_map) {
                tracing::warn!("overcommit recovery: {error}");
            }
            extents.le = extents.le.saturating_sub(cut);
            let size_k = extents.le * pe_size_k;
            tracing::debug!("cut {cut} extents, size now {size_k}k");
            user.set_size_k(size_k);
            cut_any = true;
        }
        // Cut extents covered the overshoot; only what the maps no longer
        // claim is free.
        let mut claimed: BTreeMap<String, u64> = BTreeMap::new();
        for extents in users.iter().filter(|u| !u.deleted()).filter_map(|u| u.extents()) {
            for (device, count) in &extents.pe_map {
                *claimed.entry(device.clone()).or_default() += count;
            }
        }
        for pv in self.members_mut() {
            let held = claimed.get(&pv.device).copied().unwrap_or(0);
            pv.pe_free = pv.pe_count.saturating_sub(held);
        }
        self.pe_free = self.members().map(|pv| pv.pe_free).sum();
        cut_any
    }

    /// Compare per-PV usage with what the volumes' pe maps claim.
    /// Mismatches are logged, not fatal.
    pub fn check_consistency<U: ExtentUser>(&self, users: &[U]) -> bool {
        let mut used: BTreeMap<&str, u64> = BTreeMap::new();
        for extents in users.iter().filter(|u| !u.deleted()).filter_map(|u| u.extents()) {
            for (device, count) in &extents.pe_map {
                *used.entry(device.as_str()).or_default() += count;
            }
        }

        let mut ok = true;
        for pv in self.members() {
            let claimed = used.remove(pv.device.as_str()).unwrap_or(0);
            if claimed != pv.used() {
                tracing::warn!(
                    "{}: volumes claim {claimed} extents, pv has {} in use",
                    pv.device,
                    pv.used()
                );
                ok = false;
            }
        }
        for (device, count) in used {
            tracing::warn!("{count} extents mapped to unknown pv {device}");
            ok = false;
        }

        let free: u64 = self.members().map(|pv| pv.pe_free).sum();
        let total: u64 = self.members().map(|pv| pv.pe_count).sum();
        if free != self.pe_free || total != self.pe_count {
            tracing::warn!(
                "pool counts {}/{} disagree with pvs {free}/{total}",
                self.pe_free,
                self.pe_count
            );
            ok = false;
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Lv {
        created: bool,
        size_k: u64,
        orig_size_k: u64,
        extents: LvExtents,
    }

    impl Lv {
        fn existing(pe_map: &[(&str, u64)]) -> Self {
            let le = pe_map.iter().map(|(_, n)| n).sum();
            Self {
                created: false,
                size_k: le * 4,
                orig_size_k: le * 4,
                extents: LvExtents {
                    le,
                    stripes: 1,
                    pe_map: pe_map.iter().map(|(d, n)| (d.to_string(), *n)).collect(),
                },
            }
        }
    }

    impl ExtentUser for Lv {
        fn created(&self) -> bool {
            self.created
        }
        fn deleted(&self) -> bool {
            false
        }
        fn size_k(&self) -> u64 {
            self.size_k
        }
        fn orig_size_k(&self) -> u64 {
            self.orig_size_k
        }
        fn set_size_k(&mut self, size_k: u64) {
            self.size_k = size_k;
        }
        fn extents(&self) -> Option<&LvExtents> {
            Some(&self.extents)
        }
        fn extents_mut(&mut self) -> Option<&mut LvExtents> {
            Some(&mut self.extents)
        }
    }

    fn pool(frees: &[(&str, u64)]) -> ExtentPool {
        let mut pool = ExtentPool::new(4);
        for (device, free) in frees {
            pool.pvs.push(PhysicalVolume::new(*device, *free));
            pool.pe_count += free;
            pool.pe_free += free;
        }
        pool
    }

    fn frees(pool: &ExtentPool) -> Vec<u64> {
        pool.members().map(|pv| pv.pe_free).collect()
    }

    #[test]
    fn single_stripe_is_first_fit() {
        let mut pool = pool(&[("/dev/sda1", 10), ("/dev/sdb1", 50)]);
        let mut map = PeMap::new();
        pool.add_distribution(25, 1, &mut map).expect("fits");
        assert_eq!(frees(&pool), vec![0, 35]);
        assert_eq!(map.get("/dev/sda1"), Some(&10));
        assert_eq!(map.get("/dev/sdb1"), Some(&15));
    }

    #[test]
    fn single_stripe_shortage_changes_nothing() {
        let mut pool = pool(&[("/dev/sda1", 10), ("/dev/sdb1", 5)]);
        let mut map = PeMap::new();
        assert_eq!(pool.add_distribution(16, 1, &mut map), Err(PeError::NoSpaceSingle));
        assert_eq!(frees(&pool), vec![10, 5]);
        assert!(map.is_empty());
    }

    #[test]
    fn striped_takes_evenly_from_largest() {
        let mut pool = pool(&[("/dev/sda1", 10), ("/dev/sdb1", 40), ("/dev/sdc1", 30)]);
        let mut map = PeMap::new();
        pool.add_distribution(40, 2, &mut map).expect("fits");
        assert_eq!(map.get("/dev/sdb1"), Some(&20));
        assert_eq!(map.get("/dev/sdc1"), Some(&20));
        assert_eq!(frees(&pool), vec![10, 20, 10]);
    }

    #[test]
    fn striped_moves_on_when_a_pv_runs_dry() {
        let mut pool = pool(&[("/dev/sda1", 20), ("/dev/sdb1", 40), ("/dev/sdc1", 30)]);
        let mut map = PeMap::new();
        pool.add_distribution(70, 2, &mut map).expect("fits");
        let taken: u64 = map.values().sum();
        assert_eq!(taken, 70);
        assert_eq!(frees(&pool), vec![15, 5, 0]);
    }

    #[test]
    fn striped_shortage_leaves_counters() {
        let mut pool = pool(&[("/dev/sda1", 100), ("/dev/sdb1", 5)]);
        let mut map = PeMap::new();
        assert_eq!(pool.add_distribution(20, 2, &mut map), Err(PeError::NoSpaceStriped));
        assert_eq!(frees(&pool), vec![100, 5]);
        assert!(map.is_empty());
    }

    #[test]
    fn freeing_unknown_pv_keeps_earlier_restores() {
        let mut pool = pool(&[("/dev/sda1", 10)]);
        pool.pvs[0].pe_free = 0;
        let mut map: PeMap = [("/dev/sda1".to_string(), 10), ("/dev/zzz".to_string(), 5)]
            .into_iter()
            .collect();
        assert_eq!(
            pool.remove_distribution(15, &mut map),
            Err(PeError::PeDevNotFound("/dev/zzz".to_string()))
        );
        assert_eq!(pool.pvs[0].pe_free, 10);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn extent_size_must_be_power_of_two() {
        let mut pool = pool(&[("/dev/sda1", 100)]);
        assert_eq!(pool.set_pe_size(3000), Err(PeError::PeSizeInvalid(3000)));
        pool.set_pe_size(8).expect("power of two");
        assert_eq!(pool.pe_count, 50);
        assert_eq!(pool.pvs[0].pe_free, 50);
    }

    #[test]
    fn size_to_le_rounds_up() {
        let pool = ExtentPool::new(4096);
        assert_eq!(pool.size_to_le(4096), 1);
        assert_eq!(pool.size_to_le(4097), 2);
        assert_eq!(pv_extents(4096 * 10 + 500, 4096), 10);
    }

    #[test]
    fn unuse_refuses_pv_of_existing_volume() {
        let mut pool = pool(&[("/dev/sda1", 10), ("/dev/sdb1", 10)]);
        pool.pvs[0].pe_free = 5;
        pool.pe_free = 15;
        let mut users = vec![Lv::existing(&[("/dev/sda1", 5)])];
        assert_eq!(
            pool.try_unuse_pe("/dev/sda1", &mut users),
            Err(PeError::RemovePvInUse("/dev/sda1".to_string()))
        );
    }

    #[test]
    fn unuse_moves_created_volume() {
        let mut pool = pool(&[("/dev/sda1", 10), ("/dev/sdb1", 10)]);
        let mut lv = Lv::existing(&[]);
        lv.created = true;
        lv.extents.le = 6;
        pool.add_distribution(6, 1, &mut lv.extents.pe_map).expect("fits");
        pool.pe_free -= 6;
        let mut users = vec![lv];

        assert_eq!(pool.try_unuse_pe("/dev/sda1", &mut users), Ok(10));
        assert_eq!(users[0].extents.pe_map.get("/dev/sdb1"), Some(&6));
        assert_eq!(pool.pe_count, 10);
        assert_eq!(pool.pe_free, 4);
        assert_eq!(pool.pvs_remove.len(), 1);
        assert!(pool.check_consistency(&users));
    }

    #[test]
    fn unuse_fails_when_volume_does_not_fit_elsewhere() {
        let mut pool = pool(&[("/dev/sda1", 10), ("/dev/sdb1", 3)]);
        let mut lv = Lv::existing(&[]);
        lv.created = true;
        lv.extents.le = 8;
        pool.add_distribution(8, 1, &mut lv.extents.pe_map).expect("fits");
        pool.pe_free -= 8;
        let before = pool.clone();
        let mut users = vec![lv];
        assert_eq!(
            pool.try_unuse_pe("/dev/sda1", &mut users),
            Err(PeError::RemovePvSizeNeeded("/dev/sda1".to_string()))
        );
        assert_eq!(pool, before);
    }

    #[test]
    fn small_overcommit_is_cut_proportionally() {
        let mut pool = pool(&[("/dev/sda1", 100)]);
        let mut a = Lv::existing(&[("/dev/sda1", 60)]);
        a.created = true;
        a.orig_size_k = 0;
        let mut b = Lv::existing(&[("/dev/sda1", 40)]);
        b.created = true;
        b.orig_size_k = 0;
        pool.pvs[0].pe_free = 0;
        pool.pe_free = 0;
        // the group turned out three extents smaller than planned
        pool.pvs[0].pe_count = 97;
        pool.pe_count = 97;
        let mut users = vec![a, b];

        assert!(pool.check_create_constraints(&mut users));
        let les: Vec<u64> = users.iter().map(|u| u.extents.le).collect();
        assert_eq!(les.iter().sum::<u64>(), 97);
        assert_eq!(users[0].size_k, users[0].extents.le * 4);
        assert_eq!((pool.pvs[0].pe_free, pool.pe_free), (0, 0));
        assert!(pool.check_consistency(&users));
    }

    #[test]
    fn large_overcommit_is_left_alone() {
        let mut pool = pool(&[("/dev/sda1", 50)]);
        let mut a = Lv::existing(&[("/dev/sda1", 60)]);
        a.created = true;
        a.orig_size_k = 0;
        let mut users = vec![a];
        assert!(!pool.check_create_constraints(&mut users));
        assert_eq!(users[0].extents.le, 60);
    }

    #[test]
    fn consistency_detects_drift() {
        let mut pool = pool(&[("/dev/sda1", 10)]);
        pool.pvs[0].pe_free = 4;
        pool.pe_free = 4;
        let users = vec![Lv::existing(&[("/dev/sda1", 6)])];
        assert!(pool.check_consistency(&users));
        let users = vec![Lv::existing(&[("/dev/sda1", 5)])];
        assert!(!pool.check_consistency(&users));
    }
}
