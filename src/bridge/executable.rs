//! Resolution of the configured worker executable to a local program.

use crate::config::keys;
use crate::error::{ErrorCode, PipesError, Result};
use crate::subprocess::WorkerCommand;
use std::path::{Path, PathBuf};

/// Map an executable URI onto a path the task can run.
///
/// Accepts `file:///abs/path`, a bare path, or either followed by
/// `#link-name`; a link name refers to the localized copy in `work_dir`.
pub fn resolve_executable(uri: &str, work_dir: &Path) -> Result<PathBuf> {
    let (location, link) = match uri.split_once('#') {
        Some((location, link)) if !link.is_empty() => (location, Some(link)),
        Some((location, _)) => (location, None),
        None => (uri, None),
    };

    let local = if let Some(path) = location.strip_prefix("file://") {
        PathBuf::from(path)
    } else if let Some((scheme, _)) = location.split_once("://") {
        return Err(PipesError::config_with_code(
            ErrorCode::CONFIG_UNSUPPORTED_SCHEME,
            format!("Cannot run a worker from a '{}' location: {}", scheme, uri),
            Some(keys::EXECUTABLE.to_string()),
        ));
    } else {
        PathBuf::from(location)
    };

    let resolved = match link {
        Some(link) => work_dir.join(link),
        None if local.is_relative() => work_dir.join(local),
        None => local,
    };
    Ok(resolved)
}

/// Set the user execute bit when the file exists.
pub async fn make_executable(path: &Path) -> Result<()> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = metadata.permissions();
        let mode = permissions.mode();
        if mode & 0o100 == 0 {
            permissions.set_mode(mode | 0o700);
            tokio::fs::set_permissions(path, permissions).await?;
            tracing::debug!("Made {} executable", path.display());
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;

    Ok(())
}

/// Command that starts the worker in `work_dir`, run through `interpreter`
/// when one is configured. The worker finds the host through the command
/// port and secret location variables.
pub fn worker_command(
    executable: &Path,
    interpreter: Option<&str>,
    work_dir: &Path,
    port: u16,
    secret_file: &Path,
) -> WorkerCommand {
    let executable = executable.to_string_lossy().into_owned();
    let mut command = match interpreter {
        Some(interpreter) => WorkerCommand {
            args: vec![executable],
            ..WorkerCommand::new(interpreter)
        },
        None => WorkerCommand::new(executable),
    };
    command.working_dir = Some(work_dir.to_path_buf());
    command
        .env
        .insert(keys::ENV_COMMAND_PORT.to_string(), port.to_string());
    command.env.insert(
        keys::ENV_SECRET_LOCATION.to_string(),
        secret_file.to_string_lossy().into_owned(),
    );
    command
}

/// Human-readable form used in log lines.
pub fn describe(command: &WorkerCommand) -> String {
    if command.args.is_empty() {
        command.program.clone()
    } else {
        format!("{} {}", command.program, command.args.join(" "))
    }
}
