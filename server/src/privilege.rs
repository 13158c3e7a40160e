//! Credential transition applied to the child process between fork and exec.
//!
//! The transition runs inside `pre_exec`, after the fork, where exactly one
//! thread exists and nothing can preempt it. Only raw syscalls are allowed
//! there, so the plan is fully materialized (including the C strings) before
//! the closure is built.

use std::ffi::CStr;
use std::ffi::CString;
use std::path::Path;
use std::path::PathBuf;

use launch_protocol::ExecDescriptor;

/// The syscalls the transition is made of. Factored out so the ordering rules
/// can be checked without actually changing process credentials.
pub(crate) trait CredentialOps {
    fn raise_nofile_limit(&self, limit: u64) -> std::io::Result<()>;
    fn set_supplementary_groups(&self, groups: &[libc::gid_t]) -> std::io::Result<()>;
    fn set_gid(&self, gid: libc::gid_t) -> std::io::Result<()>;
    fn set_uid(&self, uid: libc::uid_t) -> std::io::Result<()>;
    fn change_dir(&self, dir: &CStr) -> std::io::Result<()>;
}

pub(crate) struct HostCredentialOps;

impl CredentialOps for HostCredentialOps {
    fn raise_nofile_limit(&self, limit: u64) -> std::io::Result<()> {
        let mut lim = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        lim.rlim_cur = limit;
        if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &lim) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_supplementary_groups(&self, groups: &[libc::gid_t]) -> std::io::Result<()> {
        if unsafe { libc::setgroups(groups.len(), groups.as_ptr()) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_gid(&self, gid: libc::gid_t) -> std::io::Result<()> {
        if unsafe { libc::setgid(gid) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_uid(&self, uid: libc::uid_t) -> std::io::Result<()> {
        if unsafe { libc::setuid(uid) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    fn change_dir(&self, dir: &CStr) -> std::io::Result<()> {
        if unsafe { libc::chdir(dir.as_ptr()) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Pre-computed transition, safe to apply post-fork.
#[derive(Debug)]
pub(crate) struct TransitionPlan {
    nofile_limit: u64,
    groups: Vec<libc::gid_t>,
    gid: libc::gid_t,
    uid: libc::uid_t,
    workdir: Option<CString>,
}

impl TransitionPlan {
    pub(crate) fn from_descriptor(descriptor: &ExecDescriptor) -> std::io::Result<Self> {
        // The original working directory only matters when a program was
        // named; bare-argv requests run wherever the server runs.
        let workdir = if !descriptor.program.is_empty() && !descriptor.dir.is_empty() {
            Some(
                CString::new(descriptor.dir.as_str())
                    .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?,
            )
        } else {
            None
        };
        Ok(Self {
            nofile_limit: descriptor.nofile_limit,
            groups: descriptor.groups.iter().map(|g| *g as libc::gid_t).collect(),
            gid: descriptor.gid as libc::gid_t,
            uid: descriptor.uid as libc::uid_t,
            workdir,
        })
    }

    /// Applies the transition in its fixed order: file limit, supplementary
    /// groups, gid, uid, working directory. Zero values are skipped. A
    /// setgroups failure is tolerated; at this point there is no tty or log
    /// sink to report it to, and the primary gid still gets set next.
    pub(crate) fn apply<O: CredentialOps>(&self, ops: &O) -> std::io::Result<()> {
        if self.nofile_limit != 0 {
            ops.raise_nofile_limit(self.nofile_limit)?;
        }
        if !self.groups.is_empty() {
            let _ = ops.set_supplementary_groups(&self.groups);
        }
        if self.gid != 0 {
            ops.set_gid(self.gid)?;
        }
        if self.uid != 0 {
            ops.set_uid(self.uid)?;
        }
        if let Some(dir) = &self.workdir {
            ops.change_dir(dir)?;
        }
        Ok(())
    }
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// Resolves a bare program name against the PATH carried in the request
/// environment. Names containing a slash pass through untouched, as does
/// anything that cannot be resolved; exec reports those properly.
pub(crate) fn resolve_program(program: &str, path_entry: Option<&str>) -> PathBuf {
    if program.contains('/') {
        return PathBuf::from(program);
    }
    if let Some(paths) = path_entry {
        for dir in paths.split(':').filter(|dir| !dir.is_empty()) {
            let candidate = Path::new(dir).join(program);
            if is_executable(&candidate) {
                return candidate;
            }
        }
    }
    PathBuf::from(program)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct RecordingOps {
        calls: RefCell<Vec<String>>,
        fail_groups: bool,
        fail_gid: bool,
    }

    impl RecordingOps {
        fn record(&self, call: String) {
            self.calls.borrow_mut().push(call);
        }
    }

    impl CredentialOps for RecordingOps {
        fn raise_nofile_limit(&self, limit: u64) -> std::io::Result<()> {
            self.record(format!("nofile({limit})"));
            Ok(())
        }

        fn set_supplementary_groups(&self, groups: &[libc::gid_t]) -> std::io::Result<()> {
            self.record(format!("groups({groups:?})"));
            if self.fail_groups {
                return Err(std::io::Error::from_raw_os_error(libc::EPERM));
            }
            Ok(())
        }

        fn set_gid(&self, gid: libc::gid_t) -> std::io::Result<()> {
            self.record(format!("gid({gid})"));
            if self.fail_gid {
                return Err(std::io::Error::from_raw_os_error(libc::EPERM));
            }
            Ok(())
        }

        fn set_uid(&self, uid: libc::uid_t) -> std::io::Result<()> {
            self.record(format!("uid({uid})"));
            Ok(())
        }

        fn change_dir(&self, dir: &CStr) -> std::io::Result<()> {
            self.record(format!("chdir({})", dir.to_string_lossy()));
            Ok(())
        }
    }

    fn descriptor() -> ExecDescriptor {
        ExecDescriptor {
            uid: 1000,
            gid: 100,
            groups: vec![4, 27],
            program: "/bin/bash".to_string(),
            env: Vec::new(),
            argv: vec!["/bin/bash".to_string()],
            dir: "/home/user".to_string(),
            nofile_limit: 4096,
        }
    }

    #[test]
    fn applies_in_fixed_order() {
        let plan = TransitionPlan::from_descriptor(&descriptor()).unwrap();
        let ops = RecordingOps::default();
        plan.apply(&ops).unwrap();
        assert_eq!(
            *ops.calls.borrow(),
            vec![
                "nofile(4096)".to_string(),
                "groups([4, 27])".to_string(),
                "gid(100)".to_string(),
                "uid(1000)".to_string(),
                "chdir(/home/user)".to_string(),
            ]
        );
    }

    #[test]
    fn zero_fields_are_skipped() {
        let plan = TransitionPlan::from_descriptor(&ExecDescriptor {
            argv: vec!["/bin/true".to_string()],
            program: "/bin/true".to_string(),
            ..Default::default()
        })
        .unwrap();
        let ops = RecordingOps::default();
        plan.apply(&ops).unwrap();
        assert!(ops.calls.borrow().is_empty());
    }

    #[test]
    fn setgroups_failure_is_tolerated() {
        let plan = TransitionPlan::from_descriptor(&descriptor()).unwrap();
        let ops = RecordingOps {
            fail_groups: true,
            ..Default::default()
        };
        plan.apply(&ops).unwrap();
        // gid/uid/chdir still happened.
        assert_eq!(ops.calls.borrow().len(), 5);
    }

    #[test]
    fn setgid_failure_aborts_before_setuid() {
        let plan = TransitionPlan::from_descriptor(&descriptor()).unwrap();
        let ops = RecordingOps {
            fail_gid: true,
            ..Default::default()
        };
        assert!(plan.apply(&ops).is_err());
        assert_eq!(
            *ops.calls.borrow(),
            vec![
                "nofile(4096)".to_string(),
                "groups([4, 27])".to_string(),
                "gid(100)".to_string(),
            ]
        );
    }

    #[test]
    fn workdir_requires_a_program() {
        let plan = TransitionPlan::from_descriptor(&ExecDescriptor {
            argv: vec!["true".to_string()],
            dir: "/tmp".to_string(),
            ..Default::default()
        })
        .unwrap();
        let ops = RecordingOps::default();
        plan.apply(&ops).unwrap();
        assert!(ops.calls.borrow().is_empty());
    }

    #[test]
    fn resolves_bare_names_through_the_request_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("empty");
        std::fs::create_dir(&first).unwrap();
        let target = dir.path().join("bin").join("tool");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755)).unwrap();

        let path = format!("{}:{}", first.display(), target.parent().unwrap().display());
        assert_eq!(resolve_program("tool", Some(&path)), target);
    }

    #[test]
    fn absolute_and_unresolvable_names_pass_through() {
        assert_eq!(
            resolve_program("/bin/bash", Some("/nowhere")),
            PathBuf::from("/bin/bash")
        );
        assert_eq!(
            resolve_program("no-such-tool", Some("/nowhere")),
            PathBuf::from("no-such-tool")
        );
        assert_eq!(resolve_program("tool", None), PathBuf::from("tool"));
    }

    #[test]
    fn non_executable_files_are_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("tool");
        std::fs::write(&target, "data").unwrap();
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o644)).unwrap();

        let path = dir.path().display().to_string();
        assert_eq!(resolve_program("tool", Some(&path)), PathBuf::from("tool"));
    }
}
