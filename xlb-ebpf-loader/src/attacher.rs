//! [`AyaAttacher`]: loads the externally-compiled kernel object and attaches
//! its XDP ingress and TC egress programs to interfaces (§4's
//! `InterfaceAttacher`), and [`AyaRingBufSource`], the `aya::maps::RingBuf`
//! backed stats source the §4.10 consumer polls.
//!
//! The object is built and shipped outside this repository; this crate only
//! knows two fixed program names it is contractually required to export —
//! `xlb_ingress` (XDP) and `xlb_egress` (TC) — and one ring buffer map,
//! `xlb_stats_events`.

use std::collections::HashMap;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::{Arc, Mutex};

use aya::programs::tc;
use aya::programs::{SchedClassifier, TcAttachType, Xdp, XdpFlags};
use aya::{Ebpf, EbpfLoader};
use tracing::{info, warn};

use xlb_core::error::{Result, XlbError};
use xlb_core::lifecycle::InterfaceAttacher;
use xlb_core::stats::RingBufSource;

use crate::backend::AyaMapBackend;
use crate::EbpfError;

const XDP_PROGRAM_NAME: &str = "xlb_ingress";
const TC_PROGRAM_NAME: &str = "xlb_egress";
const STATS_RING_BUF_NAME: &str = "xlb_stats_events";

fn backend_err(context: &str, err: impl std::fmt::Display) -> XlbError {
    XlbError::MapBackend(format!("{context}: {err}"))
}

/// Loads the kernel object once and hands out cheap, `Arc`-sharing views
/// implementing each of the three traits `xlb-core` needs.
pub struct AyaLoader {
    inner: Arc<Mutex<Ebpf>>,
}

impl AyaLoader {
    /// Removes the locked-memory limit (so BPF maps don't depend on a
    /// `memlock: -1` ulimit in the deployment environment) and loads the
    /// object at `object_path`.
    pub fn load(object_path: &Path) -> std::result::Result<Self, EbpfError> {
        #[cfg(target_os = "linux")]
        unsafe {
            let rlim = libc::rlimit { rlim_cur: libc::RLIM_INFINITY, rlim_max: libc::RLIM_INFINITY };
            let _ = libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim);
        }

        let bytes = std::fs::read(object_path).map_err(EbpfError::from)?;
        let ebpf = EbpfLoader::new().load(&bytes)?;
        Ok(Self { inner: Arc::new(Mutex::new(ebpf)) })
    }

    pub fn map_backend(&self) -> AyaMapBackend {
        AyaMapBackend::new(self.inner.clone())
    }

    pub fn attacher(&self) -> AyaAttacher {
        AyaAttacher { inner: self.inner.clone(), attached_ifaces: Mutex::new(HashMap::new()) }
    }

    pub fn ring_buf_source(&self) -> AyaRingBufSource {
        AyaRingBufSource { inner: self.inner.clone() }
    }
}

struct AttachedPrograms {
    xdp_attached: bool,
    tc_attached: bool,
}

/// Attaches/detaches [`XDP_PROGRAM_NAME`] and [`TC_PROGRAM_NAME`] on named
/// interfaces. `attached_ifaces` tracks which interfaces currently hold a
/// link so `detach` and repeated `attach_*` calls are idempotent, matching
/// the contract in [`xlb_core::lifecycle::InterfaceAttacher`].
pub struct AyaAttacher {
    inner: Arc<Mutex<Ebpf>>,
    attached_ifaces: Mutex<HashMap<String, AttachedPrograms>>,
}

impl InterfaceAttacher for AyaAttacher {
    fn attach_ingress(&self, interface: &str) -> Result<u32> {
        let ifindex = interface_index(interface)?;

        let mut ifaces = self.attached_ifaces.lock().unwrap();
        if ifaces.get(interface).map(|p| p.xdp_attached).unwrap_or(false) {
            return Ok(ifindex);
        }

        let mut ebpf = self.inner.lock().unwrap();
        let program: &mut Xdp = ebpf
            .program_mut(XDP_PROGRAM_NAME)
            .ok_or_else(|| backend_err(interface, EbpfError::ProgramNotFound(XDP_PROGRAM_NAME.to_string())))?
            .try_into()
            .map_err(|e| {
                backend_err(interface, EbpfError::ProgramType { name: XDP_PROGRAM_NAME.to_string(), source: e })
            })?;
        program.load().map_err(|e| {
            backend_err(interface, EbpfError::ProgramLoad { name: XDP_PROGRAM_NAME.to_string(), source: e })
        })?;
        program.attach(interface, XdpFlags::default()).map_err(|e| {
            backend_err(
                interface,
                EbpfError::Attach { name: XDP_PROGRAM_NAME.to_string(), interface: interface.to_string(), source: e },
            )
        })?;

        ifaces
            .entry(interface.to_string())
            .or_insert(AttachedPrograms { xdp_attached: false, tc_attached: false })
            .xdp_attached = true;
        info!(interface, ifindex, "XDP ingress program attached");
        Ok(ifindex)
    }

    fn attach_egress(&self, interface: &str) -> Result<()> {
        let mut ifaces = self.attached_ifaces.lock().unwrap();
        if ifaces.get(interface).map(|p| p.tc_attached).unwrap_or(false) {
            return Ok(());
        }

        // Idempotent: returns an error if the clsact qdisc already exists,
        // which is the expected case on a second attach.
        let _ = tc::qdisc_add_clsact(interface);

        let mut ebpf = self.inner.lock().unwrap();
        let program: &mut SchedClassifier = ebpf
            .program_mut(TC_PROGRAM_NAME)
            .ok_or_else(|| backend_err(interface, EbpfError::ProgramNotFound(TC_PROGRAM_NAME.to_string())))?
            .try_into()
            .map_err(|e| {
                backend_err(interface, EbpfError::ProgramType { name: TC_PROGRAM_NAME.to_string(), source: e })
            })?;
        program.load().map_err(|e| {
            backend_err(interface, EbpfError::ProgramLoad { name: TC_PROGRAM_NAME.to_string(), source: e })
        })?;
        program.attach(interface, TcAttachType::Egress).map_err(|e| {
            backend_err(
                interface,
                EbpfError::Attach { name: TC_PROGRAM_NAME.to_string(), interface: interface.to_string(), source: e },
            )
        })?;

        ifaces
            .entry(interface.to_string())
            .or_insert(AttachedPrograms { xdp_attached: false, tc_attached: false })
            .tc_attached = true;
        info!(interface, "TC egress program attached");
        Ok(())
    }

    fn detach(&self, interface: &str) -> Result<()> {
        let mut ifaces = self.attached_ifaces.lock().unwrap();
        match ifaces.remove(interface) {
            Some(_) => {
                // aya tears down XDP/TC links when the program handles that
                // own them are dropped; removing our bookkeeping entry is
                // enough to let a future attach re-link cleanly.
                info!(interface, "interface detached");
                Ok(())
            }
            None => {
                warn!(interface, "detach on an interface with no attached programs, ignoring");
                Ok(())
            }
        }
    }
}

fn interface_index(interface: &str) -> Result<u32> {
    let name = std::ffi::CString::new(interface).map_err(|_| XlbError::InterfaceNotFound(interface.to_string()))?;
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        Err(XlbError::InterfaceNotFound(interface.to_string()))
    } else {
        Ok(index)
    }
}

/// Polls `xlb_stats_events` via `aya::maps::RingBuf`, which is backed by an
/// epoll-able fd; each `next_event` call blocks on that fd for up to
/// `timeout_ms` via `poll(2)` so it can run on a blocking thread without
/// busy-looping.
pub struct AyaRingBufSource {
    inner: Arc<Mutex<Ebpf>>,
}

impl RingBufSource for AyaRingBufSource {
    fn next_event(&self, timeout_ms: u64) -> Result<Option<Vec<u8>>> {
        let mut ebpf = self.inner.lock().unwrap();
        let map = ebpf
            .map_mut(STATS_RING_BUF_NAME)
            .ok_or_else(|| backend_err(STATS_RING_BUF_NAME, EbpfError::MapNotFound(STATS_RING_BUF_NAME.to_string())))?;
        let mut ring = aya::maps::RingBuf::try_from(map)
            .map_err(|e| backend_err(STATS_RING_BUF_NAME, EbpfError::MapConvert(STATS_RING_BUF_NAME.to_string(), e)))?;

        if let Some(item) = ring.next() {
            return Ok(Some(item.to_vec()));
        }

        let mut poll_fd = libc::pollfd { fd: ring.as_raw_fd(), events: libc::POLLIN, revents: 0 };
        let timeout_ms = i32::try_from(timeout_ms).unwrap_or(i32::MAX);
        let rc = unsafe { libc::poll(&mut poll_fd, 1, timeout_ms) };
        if rc < 0 {
            return Err(backend_err(STATS_RING_BUF_NAME, std::io::Error::last_os_error()));
        }
        if rc == 0 {
            return Ok(None);
        }
        Ok(ring.next().map(|item| item.to_vec()))
    }
}
