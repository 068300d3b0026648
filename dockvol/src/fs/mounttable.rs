//! `/proc/self/mountinfo` parsing.
//!
//! The OS mount table is the daemon's ground truth for what is actually
//! mounted; reconciliation and mounted-checks both read it through here.

use std::path::PathBuf;

use dockvol_shared::errors::{DockvolError, DockvolResult};

/// One mount-table entry, reduced to the fields the daemon uses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub source: String,
}

/// Parse mountinfo-formatted text into [`MountEntry`] records.
///
/// Each line has the shape
/// `36 25 8:2 / /mnt rw,relatime shared:1 - ext4 /dev/sda1 rw`
/// with optional fields before the ` - ` separator and octal-escaped
/// characters in path fields.
pub fn parse_mountinfo(input: &str) -> DockvolResult<Vec<MountEntry>> {
    let mut entries = Vec::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        let (left, right) = line.split_once(" - ").ok_or_else(|| {
            DockvolError::Storage(format!("invalid mountinfo line: {line}"))
        })?;

        let mount_point = left
            .split_whitespace()
            .nth(4)
            .ok_or_else(|| DockvolError::Storage(format!("invalid mountinfo line: {line}")))?;

        let mut right_fields = right.split_whitespace();
        let fs_type = right_fields
            .next()
            .ok_or_else(|| DockvolError::Storage(format!("invalid mountinfo line: {line}")))?;
        let source = right_fields.next().unwrap_or_default();

        entries.push(MountEntry {
            mount_point: PathBuf::from(unescape_mount_field(mount_point)),
            fs_type: fs_type.to_string(),
            source: unescape_mount_field(source),
        });
    }

    Ok(entries)
}

/// Undo the `\0dd` octal escaping the kernel applies to spaces, tabs and
/// backslashes in mountinfo path fields.
fn unescape_mount_field(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let bytes = value.as_bytes();
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1].is_ascii_digit()
            && bytes[index + 2].is_ascii_digit()
            && bytes[index + 3].is_ascii_digit()
        {
            let octal = &value[index + 1..index + 4];
            if let Ok(num) = u8::from_str_radix(octal, 8) {
                output.push(num as char);
                index += 4;
                continue;
            }
        }

        output.push(bytes[index] as char);
        index += 1;
    }

    output
}
