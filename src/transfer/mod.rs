//! Remote object store transfers.
//!
//! Each operation is a single pass/fail call with no retry and no progress
//! reporting. A `false` result is treated as "nothing changed" even though a
//! failed transfer may leave partial files behind; integrity is not verified.

mod rclone;

use std::path::Path;

pub use rclone::RcloneGateway;

/// Copy, mkdir, and move primitives over remote storage.
pub trait TransferGateway {
    /// Copy a remote file into a local directory.
    fn copy(&mut self, remote_source: &str, local_dest: &Path) -> bool;

    /// Create a remote directory. Succeeds if it already exists.
    fn mkdir(&mut self, remote_path: &str) -> bool;

    /// Move a remote file to a new remote path.
    fn move_to(&mut self, remote_source: &str, remote_dest: &str) -> bool;
}

impl<T: TransferGateway + ?Sized> TransferGateway for Box<T> {
    fn copy(&mut self, remote_source: &str, local_dest: &Path) -> bool {
        (**self).copy(remote_source, local_dest)
    }

    fn mkdir(&mut self, remote_path: &str) -> bool {
        (**self).mkdir(remote_path)
    }

    fn move_to(&mut self, remote_source: &str, remote_dest: &str) -> bool {
        (**self).move_to(remote_source, remote_dest)
    }
}

/// Join a remote path and a child segment with exactly one `/`.
///
/// A bare remote root such as `gdrive:` is joined without a separator.
pub fn remote_join(base: &str, child: &str) -> String {
    let child = child.trim_start_matches('/');
    if base.is_empty() {
        return child.to_string();
    }
    if base.ends_with(':') {
        return format!("{}{}", base, child);
    }
    format!("{}/{}", base.trim_end_matches('/'), child)
}
