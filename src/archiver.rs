use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tar::Builder;

use crate::filter::ExcludeFilter;

/// Recursively add the tree under `origin` to the archive as
/// `arcname`, skipping anything the exclusion filter matches.
///
/// The directory entry itself goes in first (with `recursive` walking
/// done by hand) so empty directories survive the round trip.
/// Children are visited in filesystem enumeration order; symlinked
/// directories are added as link entries and never followed. The
/// builder is expected to have `follow_symlinks(false)` set, which
/// the session layer does on open.
pub fn add_dir_contents<W: Write>(
    tar: &mut Builder<W>,
    origin: &Path,
    arcname: &Path,
    excludes: &ExcludeFilter,
) -> io::Result<()> {
    if excludes.is_excluded(origin) {
        return Ok(());
    }

    tar.append_dir(arcname, origin)?;

    for item in fs::read_dir(origin)? {
        let item = item?;
        let path = item.path();
        if excludes.is_excluded(&path) {
            continue;
        }

        let arcpath = arcname.join(item.file_name());
        let file_type = item.file_type()?;
        if file_type.is_dir() && !file_type.is_symlink() {
            add_dir_contents(tar, &path, &arcpath, excludes)?;
        } else {
            tar.append_path_with_name(&path, &arcpath)?;
        }
    }

    Ok(())
}
