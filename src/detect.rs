// ─────────────────────────────────────────────────────────────────────────────
//  pad-flasher :: detect  —  find attached UART bridges and debug probes
//
//  Linux:  walk /sys/class/tty and read idVendor / idProduct of the USB
//          ancestor of each ttyUSB* / ttyACM* node.
//  macOS:  list /dev/cu.* nodes that look like USB serial devices (no
//          VID:PID, so they are reported as unclassified UART ports).
//  Other:  nothing is detected; pass --device explicitly.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::Path;

use crate::config::{DeviceConfig, TransportKind};

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedPort {
    pub port:    String,
    pub vid_pid: Option<(u16, u16)>,
    /// Adapter name if the VID:PID is known.
    pub product: Option<&'static str>,
    /// Link kind the adapter is normally used for.
    pub kind:    TransportKind,
}

impl DetectedPort {
    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig::new(self.kind, self.port.clone())
    }
}

/// (VID, PID) → (product, link kind).  CMSIS-DAP and ST-Link probes expose a
/// virtual COM port next to their debug interface; we report the probe.
static ADAPTERS: &[(u16, u16, &str, TransportKind)] = &[
    // ── USB-UART bridges ──────────────────────────────────────────────────
    (0x0403, 0x6001, "FTDI FT232R",          TransportKind::Uart),
    (0x0403, 0x6015, "FTDI FT231X",          TransportKind::Uart),
    (0x1A86, 0x7523, "WCH CH340",            TransportKind::Uart),
    (0x1A86, 0x55D4, "WCH CH9102",           TransportKind::Uart),
    (0x10C4, 0xEA60, "Silicon Labs CP210x",  TransportKind::Uart),
    (0x067B, 0x2303, "Prolific PL2303",      TransportKind::Uart),
    // ── JTAG probes ───────────────────────────────────────────────────────
    (0x0403, 0x6010, "FTDI FT2232H (JTAG)",  TransportKind::Jtag),
    (0x0403, 0x6014, "FTDI FT232H (JTAG)",   TransportKind::Jtag),
    (0x1366, 0x0101, "SEGGER J-Link",        TransportKind::Jtag),
    (0x1366, 0x1015, "SEGGER J-Link OB",     TransportKind::Jtag),
    // ── SWD probes ────────────────────────────────────────────────────────
    (0x0483, 0x3748, "ST-Link/V2",           TransportKind::Swd),
    (0x0483, 0x374B, "ST-Link/V2-1",         TransportKind::Swd),
    (0x0483, 0x374E, "ST-Link/V3",           TransportKind::Swd),
    (0x0D28, 0x0204, "CMSIS-DAP (DAPLink)",  TransportKind::Swd),
    (0x2E8A, 0x000C, "Raspberry Pi Debug Probe", TransportKind::Swd),
];

/// Every USB serial node found, classified where possible.
pub fn detect_all() -> Vec<DetectedPort> {
    enumerate_raw_ports()
        .into_iter()
        .map(|(port, vid_pid)| classify(port, vid_pid))
        .collect()
}

/// Detected devices as flash targets, in port-name order.
pub fn detected_devices() -> Vec<DeviceConfig> {
    detect_all().iter().map(DetectedPort::device_config).collect()
}

fn classify(port: String, vid_pid: Option<(u16, u16)>) -> DetectedPort {
    let known = vid_pid.and_then(|(vid, pid)| {
        ADAPTERS.iter().find(|(v, p, _, _)| *v == vid && *p == pid)
    });
    match known {
        Some((_, _, product, kind)) => DetectedPort { port, vid_pid, product: Some(*product), kind: *kind },
        None => DetectedPort { port, vid_pid, product: None, kind: TransportKind::Uart },
    }
}

fn enumerate_raw_ports() -> Vec<(String, Option<(u16, u16)>)> {
    #[cfg(target_os = "linux")]
    return linux_enumerate(Path::new("/sys/class/tty"));

    #[cfg(target_os = "macos")]
    return macos_enumerate(Path::new("/dev"));

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    return Vec::new();
}

#[cfg(target_os = "linux")]
fn linux_enumerate(sysfs: &Path) -> Vec<(String, Option<(u16, u16)>)> {
    let entries = match std::fs::read_dir(sysfs) {
        Ok(e) => e,
        Err(e) => {
            log::debug!("cannot list {}: {}", sysfs.display(), e);
            return Vec::new();
        }
    };

    let mut ports: Vec<_> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("ttyUSB") && !name.starts_with("ttyACM") {
                return None;
            }
            let vid_pid = usb_ids(&sysfs.join(&name));
            Some((format!("/dev/{}", name), vid_pid))
        })
        .collect();

    ports.sort_by(|a, b| a.0.cmp(&b.0));
    ports
}

/// The USB device node holding idVendor / idProduct sits a few levels above
/// the tty leaf in the resolved sysfs path.
#[cfg(target_os = "linux")]
fn usb_ids(tty: &Path) -> Option<(u16, u16)> {
    let real = std::fs::canonicalize(tty).ok()?;
    real.ancestors().take(10).find_map(|dir| {
        let vid = read_hex_u16(&dir.join("idVendor"))?;
        let pid = read_hex_u16(&dir.join("idProduct"))?;
        Some((vid, pid))
    })
}

#[cfg(target_os = "linux")]
fn read_hex_u16(path: &Path) -> Option<u16> {
    let s = std::fs::read_to_string(path).ok()?;
    u16::from_str_radix(s.trim(), 16).ok()
}

#[cfg(target_os = "macos")]
fn macos_enumerate(dev: &Path) -> Vec<(String, Option<(u16, u16)>)> {
    let entries = match std::fs::read_dir(dev) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };
    let mut ports: Vec<_> = entries
        .flatten()
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            let usb = name.contains("usbserial") || name.contains("usbmodem") || name.contains("SLAB");
            (name.starts_with("cu.") && usb).then(|| (format!("/dev/{}", name), None))
        })
        .collect();
    ports.sort_by(|a, b| a.0.cmp(&b.0));
    ports
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn known_probe_is_classified() {
        let p = classify("/dev/ttyACM0".into(), Some((0x0483, 0x374B)));
        assert_eq!(p.kind, TransportKind::Swd);
        assert_eq!(p.product, Some("ST-Link/V2-1"));
        assert_eq!(p.device_config().kind, TransportKind::Swd);
    }

    #[test]
    fn unknown_ids_default_to_uart() {
        let p = classify("/dev/ttyUSB3".into(), Some((0xDEAD, 0xBEEF)));
        assert_eq!(p.kind, TransportKind::Uart);
        assert_eq!(p.product, None);

        let p = classify("/dev/ttyUSB4".into(), None);
        assert_eq!(p.vid_pid, None);
        assert_eq!(p.kind, TransportKind::Uart);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn missing_sysfs_yields_nothing() {
        assert_eq!(linux_enumerate(Path::new("/nonexistent/sys/class/tty")), Vec::new());
    }
}
