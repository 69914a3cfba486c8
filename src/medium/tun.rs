//! Linux TUN device

use super::Medium;
use crate::{Error, Result};
use std::ffi::CStr;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use tokio::io::unix::AsyncFd;
use tracing::info;

const TUNSETIFF: libc::c_ulong = 0x400454ca;

/// Layer-3 TUN device carrying bare IPv4 datagrams
pub struct TunDevice {
    async_fd: AsyncFd<File>,
    name: String,
}

impl TunDevice {
    /// Create (or attach to) the TUN interface `name`, set its MTU and bring
    /// it up. Addresses and routes are left to the operator.
    pub fn open(name: &str, mtu: u16) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open("/dev/net/tun")
            .map_err(|e| device_error(name, format!("open /dev/net/tun: {}", e)))?;

        let mut ifr = ifreq(name)?;
        ifr.ifr_ifru.ifru_flags = (libc::IFF_TUN | libc::IFF_NO_PI) as libc::c_short;

        let ret = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF, &mut ifr) };
        if ret < 0 {
            return Err(device_error(
                name,
                format!("TUNSETIFF: {}", std::io::Error::last_os_error()),
            ));
        }

        let actual = unsafe { CStr::from_ptr(ifr.ifr_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        configure_link(&actual, mtu)?;
        info!(requested = %name, actual = %actual, mtu, "TUN device ready");

        let async_fd = AsyncFd::new(file).map_err(Error::Io)?;
        Ok(Self {
            async_fd,
            name: actual,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let mut guard = self.async_fd.readable_mut().await.map_err(Error::Io)?;

            match guard.try_io(|inner| inner.get_mut().read(buf)) {
                Ok(result) => return result.map_err(Error::Io),
                Err(_would_block) => continue,
            }
        }
    }

    pub async fn send(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            let mut guard = self.async_fd.writable_mut().await.map_err(Error::Io)?;

            match guard.try_io(|inner| inner.get_mut().write(buf)) {
                Ok(result) => return result.map_err(Error::Io),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsRawFd for TunDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.async_fd.get_ref().as_raw_fd()
    }
}

impl Medium for TunDevice {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        TunDevice::recv(self, buf).await
    }

    async fn send(&mut self, buf: &[u8]) -> Result<usize> {
        TunDevice::send(self, buf).await
    }
}

fn device_error(name: &str, reason: String) -> Error {
    Error::Device {
        name: name.to_string(),
        reason,
    }
}

fn ifreq(name: &str) -> Result<libc::ifreq> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() >= libc::IFNAMSIZ || bytes.contains(&0) {
        return Err(device_error(name, "invalid interface name".into()));
    }

    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    for (dst, src) in ifr.ifr_name.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }
    Ok(ifr)
}

/// Set the MTU and IFF_UP through an AF_INET control socket.
fn configure_link(name: &str, mtu: u16) -> Result<()> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }

    let result = (|| {
        let mut ifr = ifreq(name)?;
        ifr.ifr_ifru.ifru_mtu = libc::c_int::from(mtu);
        if unsafe { libc::ioctl(fd, libc::SIOCSIFMTU, &mut ifr) } < 0 {
            return Err(device_error(
                name,
                format!("SIOCSIFMTU: {}", std::io::Error::last_os_error()),
            ));
        }

        let mut ifr = ifreq(name)?;
        if unsafe { libc::ioctl(fd, libc::SIOCGIFFLAGS, &mut ifr) } < 0 {
            return Err(device_error(
                name,
                format!("SIOCGIFFLAGS: {}", std::io::Error::last_os_error()),
            ));
        }
        unsafe {
            ifr.ifr_ifru.ifru_flags |= libc::IFF_UP as libc::c_short;
        }
        if unsafe { libc::ioctl(fd, libc::SIOCSIFFLAGS, &mut ifr) } < 0 {
            return Err(device_error(
                name,
                format!("SIOCSIFFLAGS: {}", std::io::Error::last_os_error()),
            ));
        }
        Ok(())
    })();

    unsafe { libc::close(fd) };
    result
}
