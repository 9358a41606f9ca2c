// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service levels for circuit receive threads.
//!
//! Channel priorities (0-99) select a circuit; each circuit's receive thread
//! runs at a service level picked from a fixed ladder so that higher
//! priority traffic is serviced by a higher level thread. Messages within a
//! circuit are never reordered.

/// Highest service level.
pub const MAX_PRIORITY_LEVEL: u8 = 99;

/// Lowest service level.
pub const MIN_PRIORITY_LEVEL: u8 = 0;

/// Discrete levels available to receive threads.
pub const PRIORITY_LEVELS: [u8; 10] = [0, 10, 20, 40, 50, 60, 70, 90, 91, 99];

/// Lowest level at or above `priority`, or `None` if every level is lower.
pub fn lowest_priority_level_above(priority: u8) -> Option<u8> {
    PRIORITY_LEVELS.iter().copied().find(|&level| level >= priority)
}

/// Highest level at or below `priority`, or `None` if every level is higher.
pub fn highest_priority_level_below(priority: u8) -> Option<u8> {
    PRIORITY_LEVELS
        .iter()
        .rev()
        .copied()
        .find(|&level| level <= priority)
}

/// Receive thread level for a circuit serving `channel_priority`.
///
/// Channel priorities map linearly onto the range above `base`, then snap
/// up to the next available level.
pub fn service_level(base: u8, channel_priority: u8) -> u8 {
    let base = base.min(MAX_PRIORITY_LEVEL);
    let span = u32::from(MAX_PRIORITY_LEVEL - base);
    let offset = span * u32::from(channel_priority.min(MAX_PRIORITY_LEVEL))
        / u32::from(MAX_PRIORITY_LEVEL);
    let target = base + offset as u8;
    lowest_priority_level_above(target).unwrap_or(MAX_PRIORITY_LEVEL)
}

/// Nice adjustment for a receive thread at `level`, relative to the
/// process. Each ten levels above `base` is one step more urgent.
pub fn nice_offset(base: u8, level: u8) -> i32 {
    -(i32::from(level.saturating_sub(base)) / 10)
}

/// Apply `level` to the calling thread.
///
/// Raising urgency usually needs privileges; a refusal leaves the thread
/// at the process priority.
pub(crate) fn apply_to_current_thread(base: u8, level: u8) -> std::io::Result<()> {
    let offset = nice_offset(base, level);
    if offset == 0 {
        return Ok(());
    }
    set_thread_nice(offset)
}

#[cfg(target_os = "linux")]
fn set_thread_nice(offset: i32) -> std::io::Result<()> {
    // SAFETY:
    // - gettid has no preconditions and always succeeds
    // - getpriority/setpriority with PRIO_PROCESS and a thread id act on
    //   that thread only on Linux
    // - errno is cleared first so a legitimate -1 nice value is told apart
    //   from a failure
    unsafe {
        let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
        *libc::__errno_location() = 0;
        let current = libc::getpriority(libc::PRIO_PROCESS, tid);
        if current == -1 && *libc::__errno_location() != 0 {
            return Err(std::io::Error::last_os_error());
        }
        let target = (current + offset).clamp(-20, 19);
        if libc::setpriority(libc::PRIO_PROCESS, tid, target) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_thread_nice(_offset: i32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "per-thread priority not available on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacent_levels() {
        assert_eq!(lowest_priority_level_above(0), Some(0));
        assert_eq!(lowest_priority_level_above(41), Some(50));
        assert_eq!(lowest_priority_level_above(99), Some(99));
        assert_eq!(highest_priority_level_below(41), Some(40));
        assert_eq!(highest_priority_level_below(95), Some(91));
        assert_eq!(highest_priority_level_below(0), Some(0));
    }

    #[test]
    fn test_service_level_is_monotonic() {
        let mut last = 0;
        for p in 0..=99 {
            let level = service_level(50, p);
            assert!(level >= last);
            assert!(PRIORITY_LEVELS.contains(&level));
            last = level;
        }
        assert_eq!(service_level(50, 0), 50);
        assert_eq!(service_level(50, 99), 99);
    }

    #[test]
    fn test_nice_offset_grows_with_level() {
        assert_eq!(nice_offset(50, 50), 0);
        assert_eq!(nice_offset(50, 60), -1);
        assert_eq!(nice_offset(50, 99), -4);
        assert_eq!(nice_offset(50, 0), 0);
        let mut last = 0;
        for level in PRIORITY_LEVELS {
            let offset = nice_offset(0, level);
            assert!(offset <= last);
            last = offset;
        }
    }

    #[test]
    fn test_base_level_leaves_thread_alone() {
        assert!(apply_to_current_thread(50, 50).is_ok());
    }
}
