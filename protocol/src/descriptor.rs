use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("argv must not be empty")]
    EmptyArgv,
    #[error("argv[0] {argv0:?} does not match program {program:?}")]
    Argv0Mismatch { argv0: String, program: String },
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid descriptor payload: {0}")]
    Binary(#[from] bincode::Error),
}

/// The identity/environment/limits payload carried inside an exec request.
///
/// Built once by the client per exec, encoded with [`ExecDescriptor::encode`],
/// decoded exactly once on the server and consumed immediately to transition
/// process credentials and build the child command. Never persisted.
///
/// A zero `uid`, `gid` or `nofile_limit` means "leave unchanged"; uid/gid 0 is
/// never a meaningful non-root target in this protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecDescriptor {
    pub uid: u32,
    pub gid: u32,
    /// Supplementary group ids, in order. May be empty.
    pub groups: Vec<u32>,
    pub program: String,
    /// `KEY=VALUE` entries passed to the child verbatim.
    pub env: Vec<String>,
    /// Must be non-empty, with `argv[0] == program` when `program` is set.
    pub argv: Vec<String>,
    pub dir: String,
    /// New soft NOFILE rlimit for the child, or 0 to not change it.
    pub nofile_limit: u64,
}

impl ExecDescriptor {
    pub fn validate(&self) -> Result<(), DescriptorError> {
        let Some(argv0) = self.argv.first() else {
            return Err(DescriptorError::EmptyArgv);
        };
        if !self.program.is_empty() && *argv0 != self.program {
            return Err(DescriptorError::Argv0Mismatch {
                argv0: argv0.clone(),
                program: self.program.clone(),
            });
        }
        Ok(())
    }

    /// Serializes the descriptor to the text form carried as the exec
    /// "command" string: base64 over the binary encoding.
    pub fn encode(&self) -> Result<String, DescriptorError> {
        self.validate()?;
        let bytes = bincode::serialize(self)?;
        Ok(BASE64.encode(bytes))
    }

    /// Parses the exec "command" string back into a descriptor.
    pub fn decode(payload: &str) -> Result<Self, DescriptorError> {
        let bytes = BASE64.decode(payload.trim())?;
        let descriptor: Self = bincode::deserialize(&bytes)?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// PATH entry from the descriptor environment, if any. Used by the server
    /// for binary resolution; the full environment still reaches the child
    /// untouched.
    pub fn path_entry(&self) -> Option<&str> {
        self.env
            .iter()
            .find_map(|entry| entry.strip_prefix("PATH="))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample() -> ExecDescriptor {
        ExecDescriptor {
            uid: 1000,
            gid: 1000,
            groups: vec![4, 24, 27],
            program: "/bin/bash".to_string(),
            env: vec!["PATH=/usr/bin:/bin".to_string(), "TERM=xterm".to_string()],
            argv: vec!["/bin/bash".to_string(), "-l".to_string()],
            dir: "/home/user".to_string(),
            nofile_limit: 1024,
        }
    }

    #[test]
    fn round_trips_exactly() {
        let descriptor = sample();
        let encoded = descriptor.encode().unwrap();
        assert_eq!(ExecDescriptor::decode(&encoded).unwrap(), descriptor);
    }

    #[test]
    fn round_trips_minimal_descriptor() {
        let descriptor = ExecDescriptor {
            argv: vec!["/bin/echo".to_string(), "hi".to_string()],
            program: "/bin/echo".to_string(),
            ..Default::default()
        };
        let encoded = descriptor.encode().unwrap();
        assert_eq!(ExecDescriptor::decode(&encoded).unwrap(), descriptor);
    }

    #[test]
    fn rejects_empty_argv() {
        let descriptor = ExecDescriptor::default();
        assert!(matches!(
            descriptor.validate(),
            Err(DescriptorError::EmptyArgv)
        ));
    }

    #[test]
    fn rejects_argv0_mismatch() {
        let mut descriptor = sample();
        descriptor.argv[0] = "/bin/sh".to_string();
        assert!(matches!(
            descriptor.encode(),
            Err(DescriptorError::Argv0Mismatch { .. })
        ));
    }

    #[test]
    fn empty_program_allows_any_argv0() {
        let descriptor = ExecDescriptor {
            argv: vec!["anything".to_string()],
            ..Default::default()
        };
        descriptor.validate().unwrap();
    }

    #[test]
    fn rejects_garbage_payloads() {
        assert!(matches!(
            ExecDescriptor::decode("not//valid//base64!!"),
            Err(DescriptorError::Base64(_))
        ));
        // Valid base64, but not a descriptor underneath.
        let payload = BASE64.encode(b"payload of the wrong shape");
        assert!(ExecDescriptor::decode(&payload).is_err());
    }

    #[test]
    fn path_entry_is_extracted() {
        assert_eq!(sample().path_entry(), Some("/usr/bin:/bin"));
        let descriptor = ExecDescriptor {
            argv: vec!["x".to_string()],
            ..Default::default()
        };
        assert_eq!(descriptor.path_entry(), None);
    }
}
