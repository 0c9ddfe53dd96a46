//! Managed child processes for the external tools we depend on.

use std::path::Path;
use std::process::{Child, Command, Stdio};

use exn::{Exn, ResultExt as _};
use tracing::{debug, trace};

use crate::error::ErrorMessage;

/// External programs that may be spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// The proprietary `rar` archiver, the only way to write RAR archives.
    Rar,
}

impl Tool {
    /// The name of the executable.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rar => "rar",
        }
    }

    /// Check if the tool can be found on `PATH`.
    pub fn available(self) -> bool {
        let found = which::which(self.name());
        trace!("lookup for {self}: {found:?}");
        found.is_ok()
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Child process that gets killed on drop.
#[derive(Debug)]
pub struct ManagedChild {
    /// The running process, taken out once we waited on it.
    child: Option<Child>,
    /// The tool running in the process.
    tool: Tool,
}

impl ManagedChild {
    /// Take ownership of a freshly spawned process.
    const fn new(child: Child, tool: Tool) -> Self {
        Self {
            child: Some(child),
            tool,
        }
    }

    /// Wait for the process to exit, failing on a non-zero exit status.
    pub fn wait(mut self) -> Result<(), Exn<ErrorMessage>> {
        let tool = self.tool;
        let Some(child) = self.child.take() else {
            return Ok(());
        };

        let output = child
            .wait_with_output()
            .or_raise(|| ErrorMessage::new(format!("Could not wait on a process for '{tool}'")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let status = output.status;
            let msg = format!("Process for '{tool}' exited with {status}:\n{stderr}");
            return Err(Exn::new(ErrorMessage::new(msg)));
        }
        Ok(())
    }
}

impl Drop for ManagedChild {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            trace!("drop {child:?}");
            // ignore errors
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Pack everything below `source_dir` into a RAR archive at `output`.
///
/// Entry names are relative to `source_dir`, because the process runs inside that directory.
/// `output` must therefore be an absolute path.
pub fn compress_rar(source_dir: &Path, output: &Path) -> Result<ManagedChild, Exn<ErrorMessage>> {
    const TOOL: Tool = Tool::Rar;

    debug!("spawn {TOOL} for {source_dir:?} into {output:?}");
    let mut cmd = Command::new(TOOL.name());
    cmd.current_dir(source_dir)
        .arg("a") // add files to archive
        .arg("-r") // recurse subdirectories
        .arg("-idq") // quiet mode
        .arg("-y") // assume yes on all queries
        .arg(output)
        .arg("*");
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .or_raise(|| ErrorMessage::new(format!("Could not spawn a process for the tool '{TOOL}'")))
        .map(|c| ManagedChild::new(c, TOOL))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_names() {
        assert_eq!(Tool::Rar.name(), "rar");
        assert_eq!(Tool::Rar.to_string(), "rar");
    }
}
