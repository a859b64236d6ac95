// SPDX-License-Identifier: MIT

//! Boot settings block: layout, accessors, redundancy and the slot-mask
//! selector.

mod common;

use common::MockFramChip;
use cubeboot_common::fram::RedundantFram;
use cubeboot_common::layout::{
    DEFAULT_BOOT_COUNTER, SAFE_MODE_MARK, SETTINGS_MAGIC, UPPER_MARK,
};
use cubeboot_common::settings::{BootSettings, SlotSelection};

fn settings() -> BootSettings<MockFramChip> {
    BootSettings::new(RedundantFram::new([
        MockFramChip::new(),
        MockFramChip::new(),
        MockFramChip::new(),
    ]))
}

/// Settings an operator would leave behind: magic, primary 0,1,2, failsafe
/// 3,4,5, full counter.
fn provisioned() -> BootSettings<MockFramChip> {
    let mut s = settings();
    s.mark_as_valid().unwrap();
    s.set_boot_slots(0b0000_0111).unwrap();
    s.set_failsafe_boot_slots(0b0011_1000).unwrap();
    s.set_boot_counter(DEFAULT_BOOT_COUNTER).unwrap();
    s.confirm_boot().unwrap();
    s
}

// =============================================================================
// accessors
// =============================================================================

#[test]
fn test_fresh_block_has_no_magic() {
    let mut s = settings();
    assert!(!s.check_magic_number());
}

#[test]
fn test_mark_as_valid_sets_magic() {
    let mut s = settings();
    s.mark_as_valid().unwrap();

    assert!(s.check_magic_number());
    assert_eq!(s.snapshot().unwrap().magic, SETTINGS_MAGIC);
}

#[test]
fn test_slot_masks_round_trip() {
    let mut s = provisioned();

    assert_eq!(s.boot_slots().unwrap(), 0b0000_0111);
    assert_eq!(s.failsafe_boot_slots().unwrap(), 0b0011_1000);
}

#[test]
fn test_counter_decrement_saturates_at_zero() {
    let mut s = provisioned();

    for expected in [2, 1, 0, 0] {
        s.dec_boot_counter().unwrap();
        assert_eq!(s.boot_counter().unwrap(), expected);
    }
}

#[test]
fn test_reset_boot_counter() {
    let mut s = provisioned();
    s.set_boot_counter(0).unwrap();

    s.reset_boot_counter().unwrap();

    assert_eq!(s.boot_counter().unwrap(), DEFAULT_BOOT_COUNTER);
}

#[test]
fn test_confirm_boot_snapshots_counter() {
    let mut s = provisioned();
    s.set_boot_counter(2).unwrap();

    s.confirm_boot().unwrap();

    assert_eq!(s.last_confirmed_boot_counter().unwrap(), 2);
}

#[test]
fn test_snapshot_reads_whole_block() {
    let mut s = provisioned();
    let snapshot = s.snapshot().unwrap();

    assert!(snapshot.magic_valid());
    assert_eq!(snapshot.boot_slots, 0b0000_0111);
    assert_eq!(snapshot.failsafe_slots, 0b0011_1000);
    assert_eq!(snapshot.boot_counter, DEFAULT_BOOT_COUNTER);
    assert_eq!(snapshot.last_confirmed_boot_counter, DEFAULT_BOOT_COUNTER);
}

// =============================================================================
// binary layout
// =============================================================================

#[test]
fn test_block_layout_on_chip() {
    let mut s = provisioned();
    s.set_boot_counter(0x0403_0201).unwrap();

    let raw = &s.fram().chips_mut()[0].data;

    assert_eq!(&raw[0..4], &SETTINGS_MAGIC.to_le_bytes());
    assert_eq!(raw[4], 0b0000_0111);
    assert_eq!(raw[5], 0b0011_1000);
    assert_eq!(&raw[6..10], &[0x01, 0x02, 0x03, 0x04]);
}

// =============================================================================
// redundancy
// =============================================================================

#[test]
fn test_single_corrupted_chip_is_outvoted() {
    let mut s = provisioned();

    // Stray bit flip in one chip's copy of the magic.
    s.fram().chips_mut()[0].data[0] ^= 0x40;

    assert!(s.check_magic_number());
}

#[test]
fn test_two_identically_corrupted_chips_win_the_vote() {
    let mut s = provisioned();

    // Two chips agreeing on garbage outvote the good one; the block no
    // longer checks out.
    s.fram().chips_mut()[0].data[0] = 0x00;
    s.fram().chips_mut()[1].data[0] = 0x00;

    assert!(!s.check_magic_number());
}

#[test]
fn test_three_way_disagreement_is_unreadable() {
    let mut s = provisioned();

    s.fram().chips_mut()[0].data[4] = 0x01;
    s.fram().chips_mut()[1].data[4] = 0x02;
    s.fram().chips_mut()[2].data[4] = 0x04;

    assert!(s.snapshot().is_err());
    assert!(s.boot_slots().is_err());
}

#[test]
fn test_setter_write_reaches_every_chip() {
    let mut s = settings();
    s.set_boot_slots(0b0101_0001).unwrap();

    for chip in s.fram().chips_mut() {
        assert_eq!(chip.data[4], 0b0101_0001);
    }
}

// =============================================================================
// slot selection decode
// =============================================================================

#[test]
fn test_decode_ordinary_mask_lsb_first() {
    let selection = SlotSelection::decode(0b0000_0111);
    assert_eq!(selection, SlotSelection::Slots([0, 1, 2].iter().copied().collect()));

    let selection = SlotSelection::decode(0b1010_0010);
    assert_eq!(selection, SlotSelection::Slots([1, 5, 7].iter().copied().collect()));
}

#[test]
fn test_decode_sentinels() {
    assert_eq!(SlotSelection::decode(SAFE_MODE_MARK), SlotSelection::SafeMode);
    assert_eq!(SlotSelection::decode(UPPER_MARK), SlotSelection::Upper);
}

#[test]
fn test_decode_wrong_popcount_is_invalid() {
    assert_eq!(SlotSelection::decode(0b0000_0000), SlotSelection::Invalid);
    assert_eq!(SlotSelection::decode(0b0000_0011), SlotSelection::Invalid);
    assert_eq!(SlotSelection::decode(0b0001_1111), SlotSelection::Invalid);
    assert_eq!(SlotSelection::decode(0xFF), SlotSelection::Invalid);
}
