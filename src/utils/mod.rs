pub mod host;
pub mod logging;

use std::path::Path;

/// Restricts a freshly written artifact to owner read/write.
/// Failures are reported but never fatal.
pub fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
            tracing::warn!(path = %path.display(), error = %e, "Could not restrict artifact permissions");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}
