//! Plug-and-play id matching.
//!
//! A driver declares the ids it is willing to bind to as an ordered list;
//! [`best_match`] walks a device's candidate ids against every registered
//! driver's list and returns the highest-priority match. Priority is
//! `Hid > Cid > Class`: an exact hardware id always wins over a compatible
//! id, which always wins over a bare class-code fallback.

use alloc::{string::String, vec::Vec};

/// One entry in a driver's supported-id list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PnpId {
    /// Exact hardware id (PCI vendor:device, USB HID report id, ACPI _HID).
    Hid(String),
    /// Compatible id (ACPI _CID, PCI subsystem id) — a looser match than
    /// `Hid` but still device-specific.
    Cid(String),
    /// Bare device class, matches any device of that class with no other
    /// candidate.
    Class(u8),
}

impl PnpId {
    fn priority(&self) -> u8 {
        match self {
            PnpId::Hid(_) => 2,
            PnpId::Cid(_) => 1,
            PnpId::Class(_) => 0,
        }
    }
}

/// The ids a discovered device can be matched against, most specific first.
/// A real device usually offers all three: its exact hardware id, one or
/// more compatible ids, and a class-code fallback.
#[derive(Debug, Clone, Default)]
pub struct DeviceIdSet {
    pub hid: Option<String>,
    pub cids: Vec<String>,
    pub class: Option<u8>,
}

/// A registered driver's match table: name plus the ids it claims support
/// for.
pub struct DriverMatchTable {
    pub driver_name: String,
    pub ids: Vec<PnpId>,
}

/// Find the highest-priority id a driver's match table shares with a
/// device's id set, or `None` if nothing matches.
fn best_id_for(table: &DriverMatchTable, device: &DeviceIdSet) -> Option<PnpId> {
    table
        .ids
        .iter()
        .filter(|id| match id {
            PnpId::Hid(h) => device.hid.as_deref() == Some(h.as_str()),
            PnpId::Cid(c) => device.cids.iter().any(|dc| dc == c),
            PnpId::Class(class) => device.class == Some(*class),
        })
        .max_by_key(|id| id.priority())
        .cloned()
}

/// Walk every driver's match table against a device and return the name of
/// the driver with the highest-priority match, breaking ties by whichever
/// driver was registered first (stable order of `tables`).
pub fn best_match<'a>(tables: &'a [DriverMatchTable], device: &DeviceIdSet) -> Option<&'a str> {
    tables
        .iter()
        .filter_map(|table| best_id_for(table, device).map(|id| (table, id.priority())))
        .max_by_key(|(_, prio)| *prio)
        .map(|(table, _)| table.driver_name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, ids: Vec<PnpId>) -> DriverMatchTable {
        DriverMatchTable {
            driver_name: name.into(),
            ids,
        }
    }

    #[test]
    fn hid_beats_class_match() {
        let tables = [
            table("generic-storage", alloc::vec![PnpId::Class(0x01)]),
            table("nvme-exact", alloc::vec![PnpId::Hid("PCI\\VEN_144D&DEV_A808".into())]),
        ];
        let device = DeviceIdSet {
            hid: Some("PCI\\VEN_144D&DEV_A808".into()),
            cids: Vec::new(),
            class: Some(0x01),
        };
        assert_eq!(best_match(&tables, &device), Some("nvme-exact"));
    }

    #[test]
    fn cid_beats_class_but_loses_to_hid() {
        let tables = [
            table("generic-net", alloc::vec![PnpId::Class(0x02)]),
            table("family-net", alloc::vec![PnpId::Cid("PCI\\CC_0200".into())]),
        ];
        let device = DeviceIdSet {
            hid: None,
            cids: alloc::vec!["PCI\\CC_0200".into()],
            class: Some(0x02),
        };
        assert_eq!(best_match(&tables, &device), Some("family-net"));
    }

    #[test]
    fn no_match_returns_none() {
        let tables = [table("nvme-exact", alloc::vec![PnpId::Hid("X".into())])];
        let device = DeviceIdSet {
            hid: Some("Y".into()),
            cids: Vec::new(),
            class: None,
        };
        assert_eq!(best_match(&tables, &device), None);
    }
}
