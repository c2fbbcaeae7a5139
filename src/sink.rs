//! Best-effort actuator signal transmission.
//!
//! The sink writes one byte per control signal. It never retries and never queues:
//! a signal that cannot be written is dropped, because the next loop iteration
//! produces a fresher one. Without a connection every `send` is a no-op.

use anyhow::Result;
use std::io::Write;

use crate::config::SerialSettings;
use crate::control::ControlSignal;

/// Byte transport the sink writes to.
pub type SerialLink = Box<dyn Write + Send>;

/// Opens a link for the given settings.
pub type LinkOpener = Box<dyn FnMut(&SerialSettings) -> Result<SerialLink> + Send>;

pub struct SignalSink {
    settings: SerialSettings,
    opener: LinkOpener,
    link: Option<SerialLink>,
}

impl SignalSink {
    /// Sink backed by the serial port named in `settings`.
    pub fn new(settings: SerialSettings) -> Self {
        Self::with_opener(settings, Box::new(|settings: &SerialSettings| serial::open(settings)))
    }

    pub fn with_opener(settings: SerialSettings, opener: LinkOpener) -> Self {
        Self {
            settings,
            opener,
            link: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Open the transport. Failure is logged and leaves the sink in degraded mode.
    pub fn connect(&mut self) -> bool {
        if self.link.is_some() {
            return true;
        }
        match (self.opener)(&self.settings) {
            Ok(link) => {
                self.link = Some(link);
                log::info!(
                    "SignalSink: connected to serial port {} at {} baud",
                    self.settings.port,
                    self.settings.baud_rate
                );
                true
            }
            Err(err) => {
                log::warn!(
                    "SignalSink: failed to connect to serial port {}: {:#}",
                    self.settings.port,
                    err
                );
                false
            }
        }
    }

    /// Write one signal byte if connected. Write errors are logged and dropped.
    pub fn send(&mut self, signal: ControlSignal) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let byte = signal.as_byte();
        if let Err(err) = link.write_all(&[byte]).and_then(|()| link.flush()) {
            log::warn!(
                "SignalSink: failed to write {} to {}: {}",
                signal.label(),
                self.settings.port,
                err
            );
        }
    }

    /// Send the fail-safe `Move` byte and close the transport, if connected.
    pub fn disconnect(&mut self) {
        if self.link.is_none() {
            return;
        }
        self.send(ControlSignal::Move);
        self.link = None;
        log::info!("SignalSink: serial port {} closed", self.settings.port);
    }
}

impl Drop for SignalSink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(unix)]
mod serial {
    use anyhow::{anyhow, Context, Result};
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    use super::SerialLink;
    use crate::config::SerialSettings;

    /// Open a tty in raw mode at the configured baud rate.
    pub(super) fn open(settings: &SerialSettings) -> Result<SerialLink> {
        let speed = baud_constant(settings.baud_rate)?;
        // Non-blocking open so a missing carrier cannot hang us; cleared below.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&settings.port)
            .with_context(|| format!("open serial port {}", settings.port))?;
        configure(&file, speed).with_context(|| format!("configure {}", settings.port))?;
        Ok(Box::new(file))
    }

    fn configure(file: &File, speed: libc::speed_t) -> io::Result<()> {
        let fd = file.as_raw_fd();
        // SAFETY: fd is a valid open descriptor owned by `file`; termios is plain data
        // fully initialised by tcgetattr before use.
        unsafe {
            let mut tio: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut tio) != 0 {
                return Err(io::Error::last_os_error());
            }
            libc::cfmakeraw(&mut tio);
            tio.c_cflag |= libc::CLOCAL | libc::CREAD;
            if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0
            {
                return Err(io::Error::last_os_error());
            }
            if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
                return Err(io::Error::last_os_error());
            }
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    pub(super) fn baud_constant(baud: u32) -> Result<libc::speed_t> {
        let speed = match baud {
            1200 => libc::B1200,
            2400 => libc::B2400,
            4800 => libc::B4800,
            9600 => libc::B9600,
            19200 => libc::B19200,
            38400 => libc::B38400,
            57600 => libc::B57600,
            115200 => libc::B115200,
            230400 => libc::B230400,
            other => return Err(anyhow!("unsupported baud rate {}", other)),
        };
        Ok(speed)
    }
}

#[cfg(not(unix))]
mod serial {
    use anyhow::{Context, Result};
    use std::fs::OpenOptions;

    use super::SerialLink;
    use crate::config::SerialSettings;

    /// Open the port as a plain device file; line settings are left to the driver.
    pub(super) fn open(settings: &SerialSettings) -> Result<SerialLink> {
        let file = OpenOptions::new()
            .write(true)
            .open(&settings.port)
            .with_context(|| format!("open serial port {}", settings.port))?;
        log::warn!(
            "SignalSink: baud rate {} not applied on this platform",
            settings.baud_rate
        );
        Ok(Box::new(file))
    }
}
