//! Pseudo-terminal allocation for interactive sessions. One `Pty` is created
//! per `pty-req`; the slave end is handed to the child process and the master
//! end stays here for forwarding and resizes.

use std::fs::File;
use std::os::fd::AsRawFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;

use launch_protocol::WindowChange;

#[derive(Debug)]
pub(crate) struct Pty {
    master: OwnedFd,
    slave: Option<OwnedFd>,
}

fn winsize(size: WindowChange) -> libc::winsize {
    libc::winsize {
        ws_row: size.rows as u16,
        ws_col: size.columns as u16,
        ws_xpixel: size.width_pixels as u16,
        ws_ypixel: size.height_pixels as u16,
    }
}

impl Pty {
    pub(crate) fn open(size: WindowChange) -> std::io::Result<Self> {
        let mut master: libc::c_int = -1;
        let mut slave: libc::c_int = -1;
        let ws = winsize(size);
        let rc = unsafe {
            libc::openpty(
                &mut master,
                &mut slave,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                &ws,
            )
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self {
            master: unsafe { OwnedFd::from_raw_fd(master) },
            slave: Some(unsafe { OwnedFd::from_raw_fd(slave) }),
        })
    }

    pub(crate) fn resize(&self, size: WindowChange) -> std::io::Result<()> {
        let ws = winsize(size);
        let rc = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    /// The slave end, available exactly once. The caller wires it to the
    /// child's stdio; afterwards only the master side remains open here, so
    /// child exit shows up as EOF on the master.
    pub(crate) fn take_slave(&mut self) -> Option<OwnedFd> {
        self.slave.take()
    }

    pub(crate) fn master_reader(&self) -> std::io::Result<File> {
        Ok(self.master.try_clone()?.into())
    }

    pub(crate) fn master_writer(&self) -> std::io::Result<File> {
        Ok(self.master.try_clone()?.into())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn current_size(fd: &OwnedFd) -> libc::winsize {
        let mut ws = libc::winsize {
            ws_row: 0,
            ws_col: 0,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let rc = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCGWINSZ, &mut ws) };
        assert_eq!(rc, 0);
        ws
    }

    #[test]
    fn opens_with_requested_size() {
        let pty = Pty::open(WindowChange::new(80, 24)).unwrap();
        let slave = pty.slave.as_ref().unwrap();
        let ws = current_size(slave);
        assert_eq!((ws.ws_col, ws.ws_row), (80, 24));
    }

    #[test]
    fn resize_is_visible_on_the_slave() {
        let pty = Pty::open(WindowChange::new(80, 24)).unwrap();
        pty.resize(WindowChange::new(132, 43)).unwrap();
        let slave = pty.slave.as_ref().unwrap();
        let ws = current_size(slave);
        assert_eq!((ws.ws_col, ws.ws_row), (132, 43));
    }

    #[test]
    fn slave_is_handed_out_once() {
        let mut pty = Pty::open(WindowChange::new(80, 24)).unwrap();
        assert!(pty.take_slave().is_some());
        assert!(pty.take_slave().is_none());
    }

    #[test]
    fn master_round_trips_bytes() {
        use std::io::Read;
        use std::io::Write;

        let mut pty = Pty::open(WindowChange::new(80, 24)).unwrap();
        let slave = pty.take_slave().unwrap();
        let mut slave: File = slave.into();
        let mut writer = pty.master_writer().unwrap();

        writer.write_all(b"ping\n").unwrap();
        let mut buf = [0u8; 5];
        slave.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping\n");
    }
}
