//! IRQ vector allocation, sharing, and forced migration.
//!
//! Complements [`super::IrqManager`]'s simple one-handler-per-`IrqNumber`
//! table with the shared-vector model PCI MSI-X/MSI/legacy-pin interop
//! needs: several `Irq` objects can ride the same hardware vector (useful
//! when vectors are scarcer than devices), dispatch walks the vector's
//! `Irq` list asking each one's `checker` whether it was the source, and
//! a vector can be forced exclusive by relocating its other occupants
//! elsewhere at the same IRQL.

#![allow(dead_code)]

extern crate alloc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

use super::irql;
use super::IrqNumber;

/// One IRQL's slice of the 256-entry hardware vector space. `GPE`-level
/// device interrupts get the bulk of the range; `IPI`/`TIMER` get small,
/// fixed slices near the top, mirroring the convention
/// `arch::x86_64::apic` already uses for its own fixed vectors (e.g. the
/// TLB shootdown vector at `0xFD`).
fn irql_vector_range(level: u8) -> core::ops::Range<u8> {
    match level {
        irql::GPE => 0x40..0xE0,
        irql::IPI => 0xE0..0xF0,
        irql::TIMER => 0xF0..0xFC,
        _ => 0x20..0x40,
    }
}

/// A checker function: returns true if `irq` is the one that actually
/// fired, given whatever device-specific status register it reads.
pub type IrqChecker = fn(&Irq) -> bool;
/// The handler invoked for the `Irq` whose checker matched.
pub type IrqHandlerFn = fn(&Irq);
/// Invoked when an `Irq` is relocated to a new vector; must reprogram the
/// owning device's hardware (I/O-APIC redirection entry, MSI
/// address/data pair, PCI pin mapping) before the new vector can fire.
pub type MoveCallback = fn(irq: &Irq, old_vector: u8, new_vector: u8);

/// One interrupt source registered with the vector engine.
#[derive(Clone)]
pub struct Irq {
    pub id: u64,
    pub irql: u8,
    pub checker: IrqChecker,
    pub handler: IrqHandlerFn,
    pub move_cb: Option<MoveCallback>,
    /// If true, this `Irq` refuses to be relocated by a forced migration
    /// (e.g. a legacy pin interrupt whose routing cannot be reprogrammed).
    pub pinned: bool,
}

/// How a caller wants its [`Irq`] placed.
pub enum VectorRequest {
    /// Let the engine pick a vector within `irql`'s range. If `shareable`,
    /// join an existing shareable vector with spare capacity before
    /// allocating a new one.
    ByIrql { irql: u8, shareable: bool },
    /// Request a specific vector. If it already has occupants and
    /// `shareable` is false, `force` controls whether those occupants are
    /// forcibly relocated (`true`) or the request fails (`false`).
    ByVector {
        vector: u8,
        shareable: bool,
        force: bool,
    },
}

struct Vector {
    id: u8,
    irql: u8,
    shareable: bool,
    capacity: usize,
    irqs: Vec<Irq>,
}

impl Vector {
    fn new(id: u8, irql: u8, shareable: bool, capacity: usize) -> Self {
        Self {
            id,
            irql,
            shareable,
            capacity,
            irqs: Vec::new(),
        }
    }
}

/// Default number of `Irq`s a freshly allocated shared vector can hold
/// before it is considered full.
const DEFAULT_SHARED_CAPACITY: usize = 4;

pub struct VectorTable {
    vectors: Vec<Vector>,
    next_id: u64,
}

impl VectorTable {
    pub const fn new() -> Self {
        Self {
            vectors: Vec::new(),
            next_id: 1,
        }
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn find_vector_mut(&mut self, id: u8) -> Option<&mut Vector> {
        self.vectors.iter_mut().find(|v| v.id == id)
    }

    /// Pick an unused vector id within `irql`'s range.
    fn next_free_id(&self, irql: u8) -> KernelResult<u8> {
        let range = irql_vector_range(irql);
        range
            .clone()
            .find(|candidate| !self.vectors.iter().any(|v| v.id == *candidate))
            .ok_or(KernelError::ResourceExhausted {
                resource: "IRQ vector",
            })
    }

    /// Register `irq` per `request`, returning the vector id it landed on.
    pub fn allocate(&mut self, mut irq: Irq, request: VectorRequest) -> KernelResult<u8> {
        match request {
            VectorRequest::ByIrql { irql: level, shareable } => {
                irq.irql = level;
                if shareable {
                    if let Some(vector) = self
                        .vectors
                        .iter_mut()
                        .find(|v| v.irql == level && v.shareable && v.irqs.len() < v.capacity)
                    {
                        let id = vector.id;
                        vector.irqs.push(irq);
                        return Ok(id);
                    }
                }
                let id = self.next_free_id(level)?;
                let capacity = if shareable { DEFAULT_SHARED_CAPACITY } else { 1 };
                let mut vector = Vector::new(id, level, shareable, capacity);
                vector.irqs.push(irq);
                self.vectors.push(vector);
                Ok(id)
            }
            VectorRequest::ByVector {
                vector: wanted,
                shareable,
                force,
            } => {
                let level = irq.irql;
                if self.find_vector_mut(wanted).is_none() {
                    let capacity = if shareable { DEFAULT_SHARED_CAPACITY } else { 1 };
                    self.vectors.push(Vector::new(wanted, level, shareable, capacity));
                }

                if !shareable {
                    let occupied = self
                        .find_vector_mut(wanted)
                        .map(|v| !v.irqs.is_empty())
                        .unwrap_or(false);
                    if occupied {
                        if !force {
                            return Err(KernelError::AlreadyExists {
                                resource: "IRQ vector",
                                id: wanted as u64,
                            });
                        }
                        self.migrate_off(wanted)?;
                    }
                }

                let vector = self.find_vector_mut(wanted).expect("just inserted above");
                vector.irqs.push(irq);
                Ok(wanted)
            }
        }
    }

    /// Relocate every `Irq` currently on `vector` to some other vector at
    /// the same IRQL, expanding the destination's capacity if needed.
    /// Fails without moving anything if any occupant is pinned.
    fn migrate_off(&mut self, vector_id: u8) -> KernelResult<()> {
        let level = match self.find_vector_mut(vector_id) {
            Some(v) => v.irql,
            None => return Ok(()),
        };

        {
            let vector = self.find_vector_mut(vector_id).unwrap();
            if vector.irqs.iter().any(|i| i.pinned) {
                return Err(KernelError::OperationNotSupported {
                    operation: "migrate a pinned IRQ off its vector",
                });
            }
        }

        let occupants: Vec<Irq> = self
            .find_vector_mut(vector_id)
            .map(|v| core::mem::take(&mut v.irqs))
            .unwrap_or_default();

        for occupant in occupants {
            let destination = self
                .vectors
                .iter_mut()
                .find(|v| v.id != vector_id && v.irql == level && v.shareable)
                .map(|v| v.id);

            let dest_id = match destination {
                Some(id) => id,
                None => {
                    let id = self.next_free_id(level)?;
                    self.vectors
                        .push(Vector::new(id, level, true, DEFAULT_SHARED_CAPACITY));
                    id
                }
            };

            {
                let dest = self.find_vector_mut(dest_id).unwrap();
                if dest.irqs.len() >= dest.capacity {
                    dest.capacity += 1;
                }
            }

            if let Some(cb) = occupant.move_cb {
                cb(&occupant, vector_id, dest_id);
            }

            self.find_vector_mut(dest_id).unwrap().irqs.push(occupant);
        }

        Ok(())
    }

    /// Hardware delivery on `vector`: walk its `Irq` list, invoking the
    /// handler for the first one whose checker claims the interrupt, then
    /// signal end-of-interrupt. Returns `false` if nothing claimed it
    /// (spurious).
    pub fn dispatch(&mut self, vector: u8) -> bool {
        let level = match self.find_vector_mut(vector) {
            Some(v) => v.irql,
            None => return false,
        };
        let guard = irql::raise_guarded(level);

        let claimed = if let Some(v) = self.find_vector_mut(vector) {
            let hit = v.irqs.iter().find(|i| (i.checker)(i)).cloned();
            if let Some(irq) = hit {
                (irq.handler)(&irq);
                true
            } else {
                false
            }
        } else {
            false
        };

        drop(guard);
        super::eoi(IrqNumber::new(vector as u32)).ok();
        claimed
    }

    pub fn vector_count(&self) -> usize {
        self.vectors.len()
    }

    pub fn irqs_on(&self, vector: u8) -> usize {
        self.vectors
            .iter()
            .find(|v| v.id == vector)
            .map(|v| v.irqs.len())
            .unwrap_or(0)
    }
}

pub static VECTOR_TABLE: Mutex<VectorTable> = Mutex::new(VectorTable::new());

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_checker(_: &Irq) -> bool {
        true
    }
    fn noop_handler(_: &Irq) {}

    fn make_irq(id: u64, pinned: bool) -> Irq {
        Irq {
            id,
            irql: irql::GPE,
            checker: noop_checker,
            handler: noop_handler,
            move_cb: None,
            pinned,
        }
    }

    #[test]
    fn shareable_requests_join_one_vector() {
        let mut table = VectorTable::new();
        let v1 = table
            .allocate(
                make_irq(1, false),
                VectorRequest::ByIrql {
                    irql: irql::GPE,
                    shareable: true,
                },
            )
            .unwrap();
        let v2 = table
            .allocate(
                make_irq(2, false),
                VectorRequest::ByIrql {
                    irql: irql::GPE,
                    shareable: true,
                },
            )
            .unwrap();
        assert_eq!(v1, v2);
        assert_eq!(table.irqs_on(v1), 2);
    }

    #[test]
    fn non_shareable_requests_get_separate_vectors() {
        let mut table = VectorTable::new();
        let v1 = table
            .allocate(
                make_irq(1, false),
                VectorRequest::ByIrql {
                    irql: irql::GPE,
                    shareable: false,
                },
            )
            .unwrap();
        let v2 = table
            .allocate(
                make_irq(2, false),
                VectorRequest::ByIrql {
                    irql: irql::GPE,
                    shareable: false,
                },
            )
            .unwrap();
        assert_ne!(v1, v2);
    }

    #[test]
    fn forced_exclusive_request_migrates_existing_occupant() {
        let mut table = VectorTable::new();
        let shared = table
            .allocate(
                make_irq(1, false),
                VectorRequest::ByIrql {
                    irql: irql::GPE,
                    shareable: true,
                },
            )
            .unwrap();
        assert_eq!(table.irqs_on(shared), 1);

        let mut exclusive_irq = make_irq(2, false);
        exclusive_irq.irql = irql::GPE;
        let placed = table
            .allocate(
                exclusive_irq,
                VectorRequest::ByVector {
                    vector: shared,
                    shareable: false,
                    force: true,
                },
            )
            .unwrap();
        assert_eq!(placed, shared);
        assert_eq!(table.irqs_on(shared), 1); // only the forced IRQ remains
    }

    #[test]
    fn forced_migration_fails_on_pinned_occupant() {
        let mut table = VectorTable::new();
        let shared = table
            .allocate(
                make_irq(1, true),
                VectorRequest::ByIrql {
                    irql: irql::GPE,
                    shareable: true,
                },
            )
            .unwrap();

        let mut exclusive_irq = make_irq(2, false);
        exclusive_irq.irql = irql::GPE;
        let result = table.allocate(
            exclusive_irq,
            VectorRequest::ByVector {
                vector: shared,
                shareable: false,
                force: true,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn non_forced_request_on_occupied_exclusive_vector_fails() {
        let mut table = VectorTable::new();
        let exclusive = table
            .allocate(
                make_irq(1, false),
                VectorRequest::ByIrql {
                    irql: irql::GPE,
                    shareable: false,
                },
            )
            .unwrap();

        let mut other = make_irq(2, false);
        other.irql = irql::GPE;
        let result = table.allocate(
            other,
            VectorRequest::ByVector {
                vector: exclusive,
                shareable: false,
                force: false,
            },
        );
        assert!(result.is_err());
    }
}
