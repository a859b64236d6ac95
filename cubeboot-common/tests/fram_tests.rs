// SPDX-License-Identifier: MIT

//! Majority-vote behaviour of the triple-redundant FRAM wrapper.

mod common;

use common::MockFramChip;
use cubeboot_common::fram::{FramError, RedundantFram};

fn fram_with(data: [u8; 4]) -> RedundantFram<MockFramChip> {
    let mut chips = [MockFramChip::new(), MockFramChip::new(), MockFramChip::new()];
    for chip in &mut chips {
        chip.data[..4].copy_from_slice(&data);
    }
    RedundantFram::new(chips)
}

// =============================================================================
// read tests
// =============================================================================

#[test]
fn test_read_all_chips_agree() {
    let mut fram = fram_with([0xA, 0xB, 0xC, 0xD]);

    let mut buf = [0u8; 4];
    fram.read(0, &mut buf).unwrap();

    assert_eq!(buf, [0xA, 0xB, 0xC, 0xD]);
    assert_eq!(fram.mismatch_count(), 0);
}

#[test]
fn test_read_single_chip_corrupted() {
    let mut fram = fram_with([0xA, 0xB, 0xC, 0xD]);

    // One chip flips a byte; the other two outvote it.
    fram.chips_mut()[1].data[2] = 0x77;

    let mut buf = [0u8; 4];
    fram.read(0, &mut buf).unwrap();

    assert_eq!(buf, [0xA, 0xB, 0xC, 0xD]);
    assert_eq!(fram.mismatch_count(), 1);
}

#[test]
fn test_read_each_chip_position_can_be_outvoted() {
    for corrupted in 0..3 {
        let mut fram = fram_with([0x55; 4]);
        fram.chips_mut()[corrupted].data[0] = 0xAA;

        let mut buf = [0u8; 4];
        fram.read(0, &mut buf).unwrap();

        assert_eq!(buf[0], 0x55, "chip {} should be outvoted", corrupted);
    }
}

#[test]
fn test_read_three_way_disagreement_fails() {
    let mut fram = fram_with([0x00; 4]);
    fram.chips_mut()[0].data[1] = 0x11;
    fram.chips_mut()[1].data[1] = 0x22;
    fram.chips_mut()[2].data[1] = 0x33;

    let mut buf = [0u8; 4];
    assert_eq!(fram.read(0, &mut buf), Err(FramError::NoMajority));
}

#[test]
fn test_read_with_one_dead_chip() {
    let mut fram = fram_with([0xA, 0xB, 0xC, 0xD]);
    fram.chips_mut()[0].fail_reads = true;

    let mut buf = [0u8; 4];
    fram.read(0, &mut buf).unwrap();

    assert_eq!(buf, [0xA, 0xB, 0xC, 0xD]);
}

#[test]
fn test_read_with_two_dead_chips_fails() {
    let mut fram = fram_with([0xA, 0xB, 0xC, 0xD]);
    fram.chips_mut()[0].fail_reads = true;
    fram.chips_mut()[2].fail_reads = true;

    let mut buf = [0u8; 4];
    assert_eq!(fram.read(0, &mut buf), Err(FramError::NoMajority));
}

#[test]
fn test_read_too_long_rejected() {
    let mut fram = fram_with([0; 4]);

    let mut buf = [0u8; 33];
    assert_eq!(fram.read(0, &mut buf), Err(FramError::TransferTooLong));
}

// =============================================================================
// write tests
// =============================================================================

#[test]
fn test_write_reaches_all_three_chips() {
    let mut fram = fram_with([0; 4]);

    fram.write(2, &[0xDE, 0xAD]).unwrap();

    for chip in fram.chips_mut() {
        assert_eq!(&chip.data[2..4], &[0xDE, 0xAD]);
    }
}

#[test]
fn test_write_succeeds_with_one_failing_chip() {
    let mut fram = fram_with([0; 4]);
    fram.chips_mut()[1].fail_writes = true;

    assert!(fram.write(0, &[0x42]).is_ok());
}

#[test]
fn test_write_fails_with_two_failing_chips() {
    let mut fram = fram_with([0; 4]);
    fram.chips_mut()[0].fail_writes = true;
    fram.chips_mut()[1].fail_writes = true;

    assert_eq!(fram.write(0, &[0x42]), Err(FramError::WriteFailed));
}

#[test]
fn test_write_repairs_corrupted_chip() {
    let mut fram = fram_with([0x55; 4]);
    fram.chips_mut()[2].data[0] = 0xAA;

    // The next write overwrites the stray value on all chips.
    fram.write(0, &[0x66]).unwrap();

    let mut buf = [0u8; 1];
    fram.read(0, &mut buf).unwrap();
    assert_eq!(buf[0], 0x66);
    assert_eq!(fram.chips_mut()[2].data[0], 0x66);
}

// =============================================================================
// status tests
// =============================================================================

#[test]
fn test_status_majority() {
    let mut fram = fram_with([0; 4]);
    assert_eq!(fram.read_status(), Some(0x02));
}

#[test]
fn test_status_none_without_majority() {
    let mut fram = fram_with([0; 4]);
    fram.chips_mut()[0].fail_reads = true;
    fram.chips_mut()[1].fail_reads = true;

    assert_eq!(fram.read_status(), None);
}
