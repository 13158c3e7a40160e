//! Fixed mapping between the host signals the client forwards and the signal
//! names carried on a session channel. Signals outside this table are not
//! propagated.

use russh::Sig;

const USR2_NAME: &str = "USR2";
const TSTP_NAME: &str = "TSTP";

/// Wire signal for a raw host signal number, or `None` when the signal is not
/// part of the forwarded set.
///
/// USR2 and TSTP have no dedicated [`Sig`] variant; they travel as custom
/// names, which the transport carries verbatim.
pub fn sig_from_raw(raw: libc::c_int) -> Option<Sig> {
    match raw {
        libc::SIGHUP => Some(Sig::HUP),
        libc::SIGINT => Some(Sig::INT),
        libc::SIGQUIT => Some(Sig::QUIT),
        libc::SIGTERM => Some(Sig::TERM),
        libc::SIGUSR1 => Some(Sig::USR1),
        libc::SIGUSR2 => Some(Sig::Custom(USR2_NAME.to_string())),
        libc::SIGTSTP => Some(Sig::Custom(TSTP_NAME.to_string())),
        _ => None,
    }
}

/// Raw signal number for a wire signal, or `None` for names outside the
/// forwarded set.
pub fn raw_from_sig(sig: &Sig) -> Option<libc::c_int> {
    match sig {
        Sig::HUP => Some(libc::SIGHUP),
        Sig::INT => Some(libc::SIGINT),
        Sig::QUIT => Some(libc::SIGQUIT),
        Sig::TERM => Some(libc::SIGTERM),
        Sig::USR1 => Some(libc::SIGUSR1),
        Sig::Custom(name) if name == USR2_NAME => Some(libc::SIGUSR2),
        Sig::Custom(name) if name == TSTP_NAME => Some(libc::SIGTSTP),
        _ => None,
    }
}

/// Raw signal numbers of the forwarded set, for installing listeners.
pub fn forwarded_raw_signals() -> [libc::c_int; 7] {
    [
        libc::SIGHUP,
        libc::SIGINT,
        libc::SIGQUIT,
        libc::SIGTERM,
        libc::SIGUSR1,
        libc::SIGUSR2,
        libc::SIGTSTP,
    ]
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn raw_round_trips_through_wire_names() {
        for raw in forwarded_raw_signals() {
            let sig = sig_from_raw(raw).unwrap();
            assert_eq!(raw_from_sig(&sig), Some(raw));
        }
    }

    #[test]
    fn unsupported_signals_are_dropped() {
        assert!(sig_from_raw(libc::SIGKILL).is_none());
        assert!(sig_from_raw(libc::SIGCHLD).is_none());
        assert!(raw_from_sig(&Sig::KILL).is_none());
        assert!(raw_from_sig(&Sig::Custom("NOPE".to_string())).is_none());
    }

    #[test]
    fn nameless_signals_use_custom_wire_names() {
        assert!(matches!(
            sig_from_raw(libc::SIGUSR2),
            Some(Sig::Custom(name)) if name == "USR2"
        ));
        assert!(matches!(
            sig_from_raw(libc::SIGTSTP),
            Some(Sig::Custom(name)) if name == "TSTP"
        ));
    }
}
