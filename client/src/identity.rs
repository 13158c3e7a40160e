//! Captures the caller's identity and environment into an exec descriptor so
//! the server can rebuild the same execution context around the remote
//! process.

use launch_protocol::ExecDescriptor;

fn supplementary_groups() -> Vec<u32> {
    let count = unsafe { libc::getgroups(0, std::ptr::null_mut()) };
    if count <= 0 {
        return Vec::new();
    }
    let mut groups = vec![0 as libc::gid_t; count as usize];
    let written = unsafe { libc::getgroups(count, groups.as_mut_ptr()) };
    if written < 0 {
        return Vec::new();
    }
    groups.truncate(written as usize);
    groups.into_iter().map(u32::from).collect()
}

fn nofile_limit() -> u64 {
    let mut lim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) } != 0 {
        return 0;
    }
    lim.rlim_cur
}

/// Builds the descriptor for running `program` remotely as the local user:
/// current uid/gid/groups, the full environment plus `extra_env`, the current
/// working directory and the soft NOFILE limit.
pub fn local_descriptor(program: &str, args: &[String], extra_env: &[String]) -> ExecDescriptor {
    let mut env: Vec<String> = std::env::vars_os()
        .map(|(key, value)| {
            format!("{}={}", key.to_string_lossy(), value.to_string_lossy())
        })
        .collect();
    env.extend(extra_env.iter().cloned());

    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(program.to_string());
    argv.extend(args.iter().cloned());

    ExecDescriptor {
        uid: unsafe { libc::getuid() },
        gid: unsafe { libc::getgid() },
        groups: supplementary_groups(),
        program: program.to_string(),
        env,
        argv,
        dir: std::env::current_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default(),
        nofile_limit: nofile_limit(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn captures_the_calling_identity() {
        let descriptor = local_descriptor("/bin/bash", &[], &[]);
        assert_eq!(descriptor.uid, unsafe { libc::getuid() });
        assert_eq!(descriptor.gid, unsafe { libc::getgid() });
        assert_eq!(descriptor.argv, vec!["/bin/bash".to_string()]);
        assert_eq!(descriptor.program, "/bin/bash");
        descriptor.validate().unwrap();
    }

    #[test]
    fn argv_keeps_program_first() {
        let args = vec!["-c".to_string(), "true".to_string()];
        let descriptor = local_descriptor("/bin/sh", &args, &[]);
        assert_eq!(
            descriptor.argv,
            vec!["/bin/sh".to_string(), "-c".to_string(), "true".to_string()]
        );
    }

    #[test]
    fn extra_env_rides_along() {
        let descriptor = local_descriptor("/bin/true", &[], &["LAUNCH_MARK=1".to_string()]);
        assert!(descriptor.env.iter().any(|e| e == "LAUNCH_MARK=1"));
    }

    #[test]
    fn nofile_limit_is_nonzero_here() {
        assert!(local_descriptor("/bin/true", &[], &[]).nofile_limit > 0);
    }
}
