//! A single bounds-checked Modbus data table.
//!
//! Every bank owns a dense vector of cells starting at `offset`. All access goes
//! through one mutex per bank, so each `get`, `set` and `update` is atomic with
//! respect to every other operation on the same bank.

use log::trace;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Mutex;

use super::TableKind;
use crate::utils::error::{SlaveError, SlaveResult};

/// Value stored in a table: `bool` for bit tables, `u16` for word tables.
pub trait Cell: Copy + Debug + PartialEq + Send + Serialize + 'static {
    /// Cell built from a configured fill value.
    fn from_fill(fill: u16) -> Self;
}

impl Cell for bool {
    fn from_fill(fill: u16) -> Self {
        fill != 0
    }
}

impl Cell for u16 {
    fn from_fill(fill: u16) -> Self {
        fill
    }
}

/// Rejects empty banks and banks reaching past address 0xFFFF.
fn check_extent(kind: TableKind, offset: u16, extent: u64) -> SlaveResult<u32> {
    if extent == 0 {
        return Err(SlaveError::ConfigError(format!("{} bank must not be empty", kind)));
    }
    if offset as u64 + extent > 0x1_0000 {
        return Err(SlaveError::ConfigError(format!(
            "{} bank at offset {} with extent {} exceeds the 16-bit address space",
            kind, offset, extent
        )));
    }
    Ok(extent as u32)
}

#[derive(Debug)]
pub struct RegisterBank<T: Cell> {
    kind: TableKind,
    offset: u16,
    extent: u32,
    cells: Mutex<Vec<T>>,
}

impl<T: Cell> RegisterBank<T> {
    /// Create a bank holding `values`, the first of which lives at `offset`.
    pub fn new(kind: TableKind, offset: u16, values: Vec<T>) -> SlaveResult<Self> {
        let extent = check_extent(kind, offset, values.len() as u64)?;
        Ok(Self {
            kind,
            offset,
            extent,
            cells: Mutex::new(values),
        })
    }

    /// Create a bank of `extent` cells all set to `fill`. The extent is
    /// checked before anything is allocated.
    pub fn filled(kind: TableKind, offset: u16, extent: u32, fill: T) -> SlaveResult<Self> {
        let extent = check_extent(kind, offset, extent as u64)?;
        Self::new(kind, offset, vec![fill; extent as usize])
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn offset(&self) -> u16 {
        self.offset
    }

    pub fn extent(&self) -> u32 {
        self.extent
    }

    /// Maps `[address, address + count)` onto vector indices or rejects it.
    fn index_range(&self, address: u16, count: usize) -> SlaveResult<std::ops::Range<usize>> {
        let start = address as u64;
        let end = start + count as u64;
        let lower = self.offset as u64;
        let upper = lower + self.extent as u64;

        if count == 0 || start < lower || end > upper {
            return Err(SlaveError::IllegalAddress {
                kind: self.kind,
                address,
                count: count.min(u16::MAX as usize) as u16,
                offset: self.offset,
                extent: self.extent,
            });
        }

        let first = (start - lower) as usize;
        Ok(first..first + count)
    }

    pub fn get(&self, address: u16, count: u16) -> SlaveResult<Vec<T>> {
        let range = self.index_range(address, count as usize)?;
        let cells = self.cells.lock().map_err(|_| SlaveError::LockError)?;
        Ok(cells[range].to_vec())
    }

    /// Overwrite cells starting at `address`. Nothing is written unless the
    /// whole range is valid.
    pub fn set(&self, address: u16, values: &[T]) -> SlaveResult<()> {
        let range = self.index_range(address, values.len())?;
        let mut cells = self.cells.lock().map_err(|_| SlaveError::LockError)?;
        cells[range].copy_from_slice(values);
        trace!("{} set {} cell(s) at {}", self.kind, values.len(), address);
        Ok(())
    }

    /// Read-modify-write of a window under one lock acquisition. Returns the
    /// values as written.
    pub fn update<F>(&self, address: u16, count: u16, transform: F) -> SlaveResult<Vec<T>>
    where
        F: Fn(T) -> T,
    {
        let range = self.index_range(address, count as usize)?;
        let mut cells = self.cells.lock().map_err(|_| SlaveError::LockError)?;
        for cell in cells[range.clone()].iter_mut() {
            *cell = transform(*cell);
        }
        Ok(cells[range].to_vec())
    }

    /// Every cell paired with its address, copied under a single lock so a
    /// concurrent `set` is seen either entirely or not at all.
    pub fn entries(&self) -> SlaveResult<Vec<(u16, T)>> {
        let cells = self.cells.lock().map_err(|_| SlaveError::LockError)?.clone();
        // offset + extent <= 0x10000, so every address fits in u16.
        Ok((self.offset..=u16::MAX).zip(cells).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn holding() -> RegisterBank<u16> {
        RegisterBank::filled(TableKind::HoldingRegisters, 1, 20, 17).unwrap()
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let bank = holding();
        bank.set(5, &[1, 2, 3]).unwrap();
        assert_eq!(bank.get(5, 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(bank.get(4, 1).unwrap(), vec![17]);
        assert_eq!(bank.get(8, 1).unwrap(), vec![17]);
    }

    #[test]
    fn test_bounds_are_inclusive_of_last_cell() {
        let bank = holding();
        assert_eq!(bank.get(1, 20).unwrap().len(), 20);
        assert_eq!(bank.get(20, 1).unwrap(), vec![17]);
    }

    #[test]
    fn test_rejects_below_offset() {
        let bank = holding();
        let err = bank.get(0, 5).unwrap_err();
        assert!(matches!(err, SlaveError::IllegalAddress { address: 0, count: 5, .. }));
    }

    #[test]
    fn test_rejects_past_extent_without_partial_write() {
        let bank = holding();
        let err = bank.set(19, &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, SlaveError::IllegalAddress { .. }));
        assert_eq!(bank.get(19, 2).unwrap(), vec![17, 17]);
    }

    #[test]
    fn test_rejects_zero_count() {
        let bank = holding();
        assert!(bank.get(1, 0).is_err());
        assert!(bank.set(1, &[]).is_err());
    }

    #[test]
    fn test_top_of_address_space() {
        let bank = RegisterBank::filled(TableKind::Coils, 0xFFFF, 1, true).unwrap();
        assert_eq!(bank.get(0xFFFF, 1).unwrap(), vec![true]);
        assert!(bank.get(0xFFFF, 2).is_err());
        assert!(RegisterBank::filled(TableKind::Coils, 0xFFFF, 2, true).is_err());
    }

    #[test]
    fn test_update_wraps_and_returns_written_values() {
        let bank = RegisterBank::new(TableKind::HoldingRegisters, 0, vec![65535, 7]).unwrap();
        let written = bank.update(0, 2, |v: u16| v.wrapping_add(1)).unwrap();
        assert_eq!(written, vec![0, 8]);
        assert_eq!(bank.get(0, 2).unwrap(), vec![0, 8]);
    }

    #[test]
    fn test_entries_cover_full_extent() {
        let bank = RegisterBank::filled(TableKind::HoldingRegisters, 1, 3, 9u16).unwrap();
        assert_eq!(bank.entries().unwrap(), vec![(1, 9), (2, 9), (3, 9)]);
    }

    #[test]
    fn test_entries_of_full_address_space() {
        let bank = RegisterBank::filled(TableKind::Coils, 0, 0x1_0000, false).unwrap();
        let entries = bank.entries().unwrap();
        assert_eq!(entries.len(), 0x1_0000);
        assert_eq!(entries.first(), Some(&(0, false)));
        assert_eq!(entries.last(), Some(&(0xFFFF, false)));
    }

    #[test]
    fn test_entries_never_see_half_a_write() {
        let bank = Arc::new(RegisterBank::filled(TableKind::HoldingRegisters, 0, 0x1_0000, 0u16).unwrap());
        let writer = {
            let bank = Arc::clone(&bank);
            thread::spawn(move || {
                for round in 1..=2000u16 {
                    bank.set(0x7FFF, &[round, round]).unwrap();
                    bank.set(0xFFFE, &[round, round]).unwrap();
                }
            })
        };
        for _ in 0..50 {
            let entries = bank.entries().unwrap();
            assert_eq!(entries[0x7FFF].1, entries[0x8000].1);
            assert_eq!(entries[0xFFFE].1, entries[0xFFFF].1);
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_oversized_extent_is_config_error() {
        let err = RegisterBank::filled(TableKind::HoldingRegisters, 1, u32::MAX, 0u16).unwrap_err();
        assert!(matches!(err, SlaveError::ConfigError(_)));
        let err = RegisterBank::filled(TableKind::HoldingRegisters, 0, u32::MAX, 0u16).unwrap_err();
        assert!(matches!(err, SlaveError::ConfigError(_)));
        assert!(RegisterBank::filled(TableKind::HoldingRegisters, 0, 0, 0u16).is_err());
    }

    #[test]
    fn test_concurrent_disjoint_writes_are_not_lost() {
        let bank = Arc::new(RegisterBank::filled(TableKind::HoldingRegisters, 0, 64, 0u16).unwrap());
        let handles: Vec<_> = (0..8u16)
            .map(|t| {
                let bank = Arc::clone(&bank);
                thread::spawn(move || {
                    for round in 0..200u16 {
                        bank.set(t * 8, &[round; 8]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(bank.get(0, 64).unwrap(), vec![199; 64]);
    }

    #[test]
    fn test_concurrent_overlapping_writes_never_tear() {
        let bank = Arc::new(RegisterBank::filled(TableKind::HoldingRegisters, 0, 10, 0u16).unwrap());
        let writers: Vec<_> = [0x1111u16, 0x2222]
            .into_iter()
            .map(|pattern| {
                let bank = Arc::clone(&bank);
                thread::spawn(move || {
                    for _ in 0..500 {
                        bank.set(0, &[pattern; 10]).unwrap();
                    }
                })
            })
            .collect();
        for _ in 0..500 {
            let values = bank.get(0, 10).unwrap();
            assert!(values.iter().all(|v| *v == values[0]));
        }
        for writer in writers {
            writer.join().unwrap();
        }
    }

    #[test]
    fn test_concurrent_updates_serialize() {
        let bank = Arc::new(RegisterBank::filled(TableKind::HoldingRegisters, 0, 4, 0u16).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let bank = Arc::clone(&bank);
                thread::spawn(move || {
                    for _ in 0..250 {
                        bank.update(0, 4, |v| v.wrapping_add(1)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(bank.get(0, 4).unwrap(), vec![1000; 4]);
    }
}
